//! Environment-driven configuration
//!
//! Every knob has a default so a bare `.env`-less start works against a
//! local Ollama. Malformed values are rejected instead of silently ignored.

use crate::error::OrchestrationError;
use crate::models::BackendId;
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const RUNTIME_OLLAMA: &str = "ollama";
pub const RUNTIME_MLX: &str = "mlx";

const DEFAULT_FALLBACK_CHAIN: &str = "mlx/phi3.5:3.8b,mlx/qwen2.5:3b,mlx/tinyllama:1.1b-chat,\
ollama/phi3.5:3.8b,ollama/tinyllama:1.1b-chat,ollama/qwen2.5:3b";

const DEFAULT_HEAVY_MODELS: &str = "qwen2.5-coder:32b,qwq:32b,deepseek-r1-distill-llama:70b,\
llama3.3:70b,command-r-plus:104b";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    pub debug: bool,
    pub backend: BackendConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub delegation: Option<DelegationConfig>,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// `(runtime name, base url)` pairs; the first entry is the primary runtime.
    pub runtimes: Vec<(String, String)>,
    pub primary: BackendId,
    pub fallback_chain: Vec<BackendId>,
    pub heavy_models: Vec<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_fallback_hops: usize,
    pub catalog_ttl: Duration,
}

impl BackendConfig {
    pub fn is_heavy(&self, model: &str) -> bool {
        self.heavy_models.iter().any(|m| m == model)
    }

    pub fn base_url(&self, runtime: &str) -> Option<&str> {
        self.runtimes
            .iter()
            .find(|(name, _)| name == runtime)
            .map(|(_, url)| url.as_str())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            runtimes: vec![
                (RUNTIME_OLLAMA.to_string(), "http://localhost:11434".to_string()),
                (RUNTIME_MLX.to_string(), "http://localhost:11435".to_string()),
            ],
            primary: BackendId::new(RUNTIME_OLLAMA, "qwen2.5-coder:32b"),
            fallback_chain: parse_backend_list(DEFAULT_FALLBACK_CHAIN).unwrap_or_default(),
            heavy_models: split_list(DEFAULT_HEAVY_MODELS),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            max_fallback_hops: 3,
            catalog_ttl: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub block_steps: usize,
    pub history_window: usize,
    pub max_corrections: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 500,
            block_steps: 5,
            history_window: 10,
            max_corrections: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub workspace_root: PathBuf,
    pub command_timeout: Duration,
    pub ssh_user: Option<String>,
    pub ssh_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            command_timeout: Duration::from_secs(30),
            ssh_user: None,
            ssh_timeout: Duration::from_secs(70),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DelegationConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub task_ttl: Duration,
    pub sync_timeout: Duration,
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    pub janitor_interval: Duration,
    pub default_max_steps: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_ttl: Duration::from_secs(3600),
            sync_timeout: Duration::from_secs(300),
            max_concurrent: 8,
            poll_interval: Duration::from_millis(250),
            janitor_interval: Duration::from_secs(60),
            default_max_steps: 500,
        }
    }
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let ollama_url = env.string("OLLAMA_BASE_URL", "http://localhost:11434");
        let mut runtimes = vec![(RUNTIME_OLLAMA.to_string(), trim_url(&ollama_url))];
        if env.parse("USE_MLX_FALLBACK", true)? {
            let mlx_url = env.string("MLX_BASE_URL", "http://localhost:11435");
            runtimes.push((RUNTIME_MLX.to_string(), trim_url(&mlx_url)));
        }

        let fallback_list = env.string("FALLBACK_CHAIN", DEFAULT_FALLBACK_CHAIN);
        let fallback_chain: Vec<BackendId> = parse_backend_list(&fallback_list)?
            .into_iter()
            .filter(|id| runtimes.iter().any(|(name, _)| *name == id.runtime))
            .collect();

        let max_steps = env.parse("AGENT_MAX_STEPS", 500usize)?;

        let backend = BackendConfig {
            runtimes,
            primary: BackendId::new(
                RUNTIME_OLLAMA,
                env.string("EXECUTOR_MODEL", "qwen2.5-coder:32b"),
            ),
            fallback_chain,
            heavy_models: split_list(&env.string("HEAVY_MODELS", DEFAULT_HEAVY_MODELS)),
            request_timeout: env.secs("EXECUTOR_TIMEOUT_SECS", 300)?,
            connect_timeout: env.secs("EXECUTOR_CONNECT_TIMEOUT_SECS", 30)?,
            max_fallback_hops: env.parse("MAX_FALLBACK_HOPS", 3usize)?,
            catalog_ttl: env.secs("MODEL_CATALOG_TTL_SECS", 30)?,
        };

        let agent = AgentConfig {
            max_steps,
            block_steps: env.parse("LOOP_BLOCK_STEPS", 5usize)?,
            ..AgentConfig::default()
        };

        let tools = ToolsConfig {
            workspace_root: PathBuf::from(env.string("WORKSPACE_ROOT", ".")),
            command_timeout: env.secs("COMMAND_TIMEOUT_SECS", 30)?,
            ssh_user: env.optional("SSH_USER"),
            ssh_timeout: env.secs("SSH_TIMEOUT_SECS", 70)?,
        };

        let delegation = match env.optional("DELEGATE_URL") {
            Some(url) => Some(DelegationConfig {
                base_url: trim_url(&url),
                timeout: env.secs("DELEGATE_TIMEOUT_SECS", 45)?,
            }),
            None => None,
        };

        let max_concurrent = env.parse("MAX_CONCURRENT_TASKS", 8usize)?;
        if max_concurrent == 0 {
            return Err(OrchestrationError::Config(
                "MAX_CONCURRENT_TASKS must be at least 1".to_string(),
            ));
        }

        let orchestrator = OrchestratorConfig {
            task_ttl: env.secs("TASK_TTL_SECS", 3600)?,
            sync_timeout: env.secs("SYNC_TIMEOUT_SECS", 300)?,
            max_concurrent,
            default_max_steps: max_steps,
            ..OrchestratorConfig::default()
        };

        let api_port = match env.optional("API_PORT").or_else(|| env.optional("PORT")) {
            Some(raw) => raw.parse().map_err(|_| {
                OrchestrationError::Config(format!("invalid port: {}", raw))
            })?,
            None => 8010,
        };

        Ok(Self {
            api_port,
            debug: env.parse("AGENT_DEBUG", false)?,
            backend,
            agent,
            tools,
            delegation,
            orchestrator,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            Some(raw) => raw.to_lowercase().parse::<T>().map_err(|_| {
                OrchestrationError::Config(format!("invalid value for {}: {}", key, raw))
            }),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: u64) -> Result<Duration> {
        self.parse(key, default).map(Duration::from_secs)
    }
}

fn trim_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_backend_list(raw: &str) -> Result<Vec<BackendId>> {
    split_list(raw)
        .iter()
        .map(|entry| {
            BackendId::parse(entry).ok_or_else(|| {
                OrchestrationError::Config(format!(
                    "fallback entry '{}' must look like runtime/model",
                    entry
                ))
            })
        })
        .collect()
}
