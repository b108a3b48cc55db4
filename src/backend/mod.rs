//! Backend invocation layer
//!
//! Delivers one conversation turn to a working model and returns the parsed
//! step. On failure it walks an ordered fallback chain:
//!
//! - crash (5xx or a known crash signature): the backend is marked failed
//!   for the life of this invoker and the next candidate is tried
//! - timeout: handled like a crash for heavy models, surfaced otherwise
//! - connection failure: the next candidate must live on another runtime
//!
//! Candidates are pre-checked against the runtime's model listing, and the
//! walk is bounded by `max_fallback_hops` per call. Every outcome comes back
//! as a value.

pub mod catalog;
pub mod prompt;
pub mod transport;

use crate::config::BackendConfig;
use crate::error::{BackendError, TransportError};
use crate::memory::Turn;
use crate::models::{AgentStep, BackendId, ToolName};
use crate::parser::parse_reply;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub use catalog::ModelCatalog;
pub use transport::{ChatRequest, ChatTransport, HttpTransport};

/// Error text that means the model runner itself died.
const CRASH_SIGNATURES: &[&str] = &[
    "model runner has unexpectedly stopped",
    "resource limitations",
    "internal error",
    "out of memory",
    "cuda error",
    "metal error",
];

/// The decision-making capability the action loop and planner consume.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Next step for `conversation`, with `blocked` tools announced to the model.
    async fn decide(
        &self,
        conversation: &[Turn],
        blocked: &[ToolName],
    ) -> Result<AgentStep, BackendError>;

    /// Raw text completion.
    async fn complete(&self, conversation: &[Turn]) -> Result<String, BackendError>;

    /// Backend that produced the most recent successful reply.
    async fn last_backend(&self) -> Option<BackendId> {
        None
    }
}

/// Failure memory shared by every task using one invoker.
#[derive(Debug, Clone, Default)]
pub struct FallbackState {
    pub failed: HashSet<BackendId>,
    pub total_fallbacks: u64,
    pub last_good: Option<BackendId>,
}

enum Failure {
    /// Worth trying the next candidate.
    Recoverable { reason: String, switch_runtime: bool },
    /// Give up immediately.
    Fatal(BackendError),
}

pub struct BackendInvoker {
    transport: Arc<dyn ChatTransport>,
    catalog: ModelCatalog,
    config: BackendConfig,
    state: RwLock<FallbackState>,
}

impl BackendInvoker {
    pub fn new(transport: Arc<dyn ChatTransport>, config: BackendConfig) -> Self {
        let catalog = ModelCatalog::new(transport.clone(), config.catalog_ttl);
        Self {
            transport,
            catalog,
            config,
            state: RwLock::new(FallbackState::default()),
        }
    }

    pub async fn fallback_state(&self) -> FallbackState {
        self.state.read().await.clone()
    }

    /// Send `conversation` to `target` (or the primary) and parse the reply.
    pub async fn ask(
        &self,
        conversation: &[Turn],
        target: Option<&BackendId>,
        blocked: &[ToolName],
    ) -> Result<AgentStep, BackendError> {
        let messages = prompt::apply_blocked_tools(conversation, blocked);
        let (text, _) = self.invoke(&messages, target).await?;
        Ok(parse_reply(&text, blocked))
    }

    /// Send `conversation` and return the raw reply with the backend that
    /// produced it.
    pub async fn invoke(
        &self,
        conversation: &[Turn],
        target: Option<&BackendId>,
    ) -> Result<(String, BackendId), BackendError> {
        let requested = target.unwrap_or(&self.config.primary).clone();
        let mut tried: Vec<BackendId> = Vec::new();
        let mut avoided_runtimes: HashSet<String> = HashSet::new();
        let mut hops = 0usize;

        let known_failed = self.state.read().await.failed.contains(&requested);
        let alternate = if known_failed {
            let skip = [requested.clone()];
            self.next_candidate(&requested, &skip, &avoided_runtimes).await
        } else {
            None
        };
        let mut current = match alternate {
            Some(alternate) => {
                debug!(skipped = %requested, using = %alternate, "Requested backend is marked failed");
                alternate
            }
            None => requested,
        };

        loop {
            tried.push(current.clone());

            let failure = match self.call(&current, conversation).await {
                Ok(text) => {
                    self.state.write().await.last_good = Some(current.clone());
                    return Ok((text, current));
                }
                Err(err) => self.classify(&current, err),
            };

            let reason = match failure {
                Failure::Fatal(err) => return Err(err),
                Failure::Recoverable {
                    reason,
                    switch_runtime,
                } => {
                    if switch_runtime {
                        avoided_runtimes.insert(current.runtime.clone());
                        if let Some(url) = self.config.base_url(&current.runtime) {
                            self.catalog.invalidate(url).await;
                        }
                    } else {
                        self.state.write().await.failed.insert(current.clone());
                    }
                    reason
                }
            };

            if hops >= self.config.max_fallback_hops {
                warn!(hops, last = %reason, "Fallback hops exhausted");
                return Err(BackendError::Exhausted { hops, last: reason });
            }

            let Some(next) = self.next_candidate(&current, &tried, &avoided_runtimes).await else {
                warn!(hops, last = %reason, "No fallback candidate left");
                return Err(BackendError::Exhausted { hops, last: reason });
            };

            hops += 1;
            self.state.write().await.total_fallbacks += 1;
            warn!(from = %current, to = %next, hop = hops, reason = %reason, "Falling back");
            current = next;
        }
    }

    async fn call(
        &self,
        backend: &BackendId,
        conversation: &[Turn],
    ) -> Result<String, TransportError> {
        let base_url = self.config.base_url(&backend.runtime).ok_or_else(|| {
            TransportError::Other(format!("runtime '{}' is not configured", backend.runtime))
        })?;

        let request = ChatRequest::new(&backend.model, conversation.to_vec());
        info!(backend = %backend, turns = conversation.len(), "Invoking backend");

        self.transport
            .chat(base_url, &request, self.config.request_timeout)
            .await
    }

    fn classify(&self, backend: &BackendId, err: TransportError) -> Failure {
        let name = backend.to_string();
        match err {
            TransportError::Status { code, body } if code >= 500 || is_crash(&body) => {
                Failure::Recoverable {
                    reason: format!("{} crashed (HTTP {}): {}", name, code, body),
                    switch_runtime: false,
                }
            }
            TransportError::Status { code, body } => Failure::Fatal(BackendError::Http {
                backend: name,
                status: code,
                body,
            }),
            TransportError::Timeout if self.config.is_heavy(&backend.model) => {
                Failure::Recoverable {
                    reason: format!("{} timed out", name),
                    switch_runtime: false,
                }
            }
            TransportError::Timeout => Failure::Fatal(BackendError::Timeout { backend: name }),
            TransportError::Connect(message) => Failure::Recoverable {
                reason: format!("{} unreachable: {}", name, message),
                switch_runtime: true,
            },
            TransportError::Body(message) if is_crash(&message) => Failure::Recoverable {
                reason: format!("{} crashed: {}", name, message),
                switch_runtime: false,
            },
            TransportError::Body(message) => Failure::Fatal(BackendError::Malformed {
                backend: name,
                message,
            }),
            TransportError::Other(message) => Failure::Fatal(BackendError::Unreachable {
                backend: name,
                message,
            }),
        }
    }

    /// First candidate that has not been tried, is not known-failed, runs on
    /// an allowed runtime and is listed by that runtime right now.
    ///
    /// The same model on another runtime comes before the configured chain.
    async fn next_candidate(
        &self,
        current: &BackendId,
        tried: &[BackendId],
        avoided_runtimes: &HashSet<String>,
    ) -> Option<BackendId> {
        let same_model_elsewhere = self
            .config
            .runtimes
            .iter()
            .filter(|(name, _)| *name != current.runtime)
            .map(|(name, _)| BackendId::new(name.clone(), current.model.clone()));

        let candidates: Vec<BackendId> = same_model_elsewhere
            .chain(self.config.fallback_chain.iter().cloned())
            .collect();

        let failed = self.state.read().await.failed.clone();

        for candidate in candidates {
            if tried.contains(&candidate)
                || failed.contains(&candidate)
                || avoided_runtimes.contains(&candidate.runtime)
            {
                continue;
            }
            let Some(base_url) = self.config.base_url(&candidate.runtime) else {
                continue;
            };
            if !self.catalog.is_available(base_url, &candidate.model).await {
                debug!(candidate = %candidate, "Skipping fallback, model not listed");
                continue;
            }
            return Some(candidate);
        }
        None
    }
}

fn is_crash(text: &str) -> bool {
    let lower = text.to_lowercase();
    CRASH_SIGNATURES.iter().any(|s| lower.contains(s))
}

#[async_trait]
impl Reasoner for BackendInvoker {
    async fn decide(
        &self,
        conversation: &[Turn],
        blocked: &[ToolName],
    ) -> Result<AgentStep, BackendError> {
        self.ask(conversation, None, blocked).await
    }

    async fn complete(&self, conversation: &[Turn]) -> Result<String, BackendError> {
        self.invoke(conversation, None).await.map(|(text, _)| text)
    }

    async fn last_backend(&self) -> Option<BackendId> {
        self.state.read().await.last_good.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use crate::models::{Finish, FinishKind};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const OLLAMA: &str = "http://ollama";
    const MLX: &str = "http://mlx";

    type Responder = Box<dyn Fn(&str, &str) -> Result<String, TransportError> + Send + Sync>;

    /// Transport whose replies are decided by `(base_url, model)`.
    struct ScriptedTransport {
        respond: Responder,
        listings: HashMap<String, Vec<String>>,
        chats: Mutex<Vec<(String, ChatRequest)>>,
    }

    impl ScriptedTransport {
        fn new(respond: Responder) -> Self {
            let mut listings = HashMap::new();
            listings.insert(
                OLLAMA.to_string(),
                vec!["big:32b".to_string(), "small:3b".to_string(), "tiny:1b".to_string()],
            );
            listings.insert(MLX.to_string(), vec!["small:3b".to_string()]);
            Self {
                respond,
                listings,
                chats: Mutex::new(Vec::new()),
            }
        }

        fn with_listing(mut self, base_url: &str, models: &[&str]) -> Self {
            self.listings.insert(
                base_url.to_string(),
                models.iter().map(|m| m.to_string()).collect(),
            );
            self
        }

        fn called(&self) -> Vec<String> {
            self.chats
                .lock()
                .unwrap()
                .iter()
                .map(|(url, req)| format!("{}@{}", req.model, url.trim_start_matches("http://")))
                .collect()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn chat(
            &self,
            base_url: &str,
            request: &ChatRequest,
            _timeout: Duration,
        ) -> Result<String, TransportError> {
            self.chats
                .lock()
                .unwrap()
                .push((base_url.to_string(), request.clone()));
            (self.respond)(base_url, &request.model)
        }

        async fn list_models(&self, base_url: &str) -> Result<Vec<String>, TransportError> {
            self.listings
                .get(base_url)
                .cloned()
                .ok_or_else(|| TransportError::Connect("no such runtime".into()))
        }
    }

    fn config() -> BackendConfig {
        BackendConfig {
            runtimes: vec![
                ("ollama".to_string(), OLLAMA.to_string()),
                ("mlx".to_string(), MLX.to_string()),
            ],
            primary: BackendId::new("ollama", "big:32b"),
            fallback_chain: vec![
                BackendId::new("mlx", "small:3b"),
                BackendId::new("ollama", "small:3b"),
                BackendId::new("ollama", "tiny:1b"),
            ],
            heavy_models: vec!["big:32b".to_string()],
            request_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            max_fallback_hops: 3,
            catalog_ttl: Duration::from_secs(60),
        }
    }

    fn finish_json(text: &str) -> String {
        format!(r#"{{"tool": "finish", "tool_input": {{"output": "{}"}}}}"#, text)
    }

    fn crash() -> TransportError {
        TransportError::Status {
            code: 500,
            body: "model runner has unexpectedly stopped".to_string(),
        }
    }

    fn conversation() -> Vec<Turn> {
        vec![Turn::system("system"), Turn::user("do it")]
    }

    #[tokio::test]
    async fn test_primary_success_records_last_good() {
        let transport = Arc::new(ScriptedTransport::new(Box::new(|_, _| Ok(finish_json("ok")))));
        let invoker = BackendInvoker::new(transport.clone(), config());

        let step = invoker.ask(&conversation(), None, &[]).await.unwrap();
        assert_eq!(step, AgentStep::Finish(Finish::answer("ok", "")));

        let state = invoker.fallback_state().await;
        assert_eq!(state.last_good, Some(BackendId::new("ollama", "big:32b")));
        assert_eq!(state.total_fallbacks, 0);
        assert_eq!(transport.called(), vec!["big:32b@ollama"]);
    }

    #[tokio::test]
    async fn test_crash_falls_back_and_skips_unlisted_candidate() {
        let transport = Arc::new(ScriptedTransport::new(Box::new(|_, model| {
            if model == "big:32b" {
                Err(crash())
            } else {
                Ok(finish_json("recovered"))
            }
        })));
        let invoker = BackendInvoker::new(transport.clone(), config());

        let (text, used) = invoker.invoke(&conversation(), None).await.unwrap();
        assert!(text.contains("recovered"));
        assert_eq!(used, BackendId::new("mlx", "small:3b"));
        // big:32b is not listed on mlx, so it never received a chat call there
        assert_eq!(transport.called(), vec!["big:32b@ollama", "small:3b@mlx"]);

        let state = invoker.fallback_state().await;
        assert!(state.failed.contains(&BackendId::new("ollama", "big:32b")));
        assert_eq!(state.total_fallbacks, 1);
        assert_eq!(state.last_good, Some(used));
    }

    #[tokio::test]
    async fn test_same_model_on_alternate_runtime_is_preferred() {
        let transport = Arc::new(
            ScriptedTransport::new(Box::new(|url, _| {
                if url == OLLAMA {
                    Err(crash())
                } else {
                    Ok(finish_json("mlx"))
                }
            }))
            .with_listing(MLX, &["big:32b", "small:3b"]),
        );
        let invoker = BackendInvoker::new(transport.clone(), config());

        let (_, used) = invoker.invoke(&conversation(), None).await.unwrap();
        assert_eq!(used, BackendId::new("mlx", "big:32b"));
    }

    #[tokio::test]
    async fn test_persistent_crash_is_bounded_by_max_hops() {
        let transport = Arc::new(
            ScriptedTransport::new(Box::new(|_, _| Err(crash())))
                .with_listing(MLX, &["big:32b", "small:3b"]),
        );
        let invoker = BackendInvoker::new(transport.clone(), config());

        let err = invoker.ask(&conversation(), None, &[]).await.unwrap_err();
        assert!(matches!(err, BackendError::Exhausted { hops: 3, .. }));
        assert_eq!(transport.called().len(), 4);
        assert_eq!(invoker.fallback_state().await.failed.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_backends_are_remembered_across_calls() {
        let transport = Arc::new(ScriptedTransport::new(Box::new(|_, model| {
            if model == "big:32b" {
                Err(crash())
            } else {
                Ok(finish_json("ok"))
            }
        })));
        let invoker = BackendInvoker::new(transport.clone(), config());

        invoker.invoke(&conversation(), None).await.unwrap();
        invoker.invoke(&conversation(), None).await.unwrap();

        assert_eq!(
            transport.called(),
            vec!["big:32b@ollama", "small:3b@mlx", "small:3b@mlx"]
        );
    }

    #[tokio::test]
    async fn test_timeout_on_light_model_is_surfaced() {
        let transport = Arc::new(ScriptedTransport::new(Box::new(|_, _| Err(TransportError::Timeout))));
        let invoker = BackendInvoker::new(transport.clone(), config());

        let target = BackendId::new("ollama", "small:3b");
        let err = invoker.invoke(&conversation(), Some(&target)).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout { .. }));
        assert_eq!(transport.called().len(), 1);
        assert!(invoker.fallback_state().await.failed.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_on_heavy_model_falls_back() {
        let transport = Arc::new(ScriptedTransport::new(Box::new(|_, model| {
            if model == "big:32b" {
                Err(TransportError::Timeout)
            } else {
                Ok(finish_json("fast"))
            }
        })));
        let invoker = BackendInvoker::new(transport, config());

        let (_, used) = invoker.invoke(&conversation(), None).await.unwrap();
        assert_eq!(used, BackendId::new("mlx", "small:3b"));
    }

    #[tokio::test]
    async fn test_connection_failure_switches_runtime() {
        let mut cfg = config();
        cfg.fallback_chain = vec![
            BackendId::new("ollama", "small:3b"),
            BackendId::new("mlx", "small:3b"),
        ];
        let transport = Arc::new(ScriptedTransport::new(Box::new(|url, _| {
            if url == OLLAMA {
                Err(TransportError::Connect("connection refused".into()))
            } else {
                Ok(finish_json("other runtime"))
            }
        })));
        let invoker = BackendInvoker::new(transport.clone(), cfg);

        let (_, used) = invoker.invoke(&conversation(), None).await.unwrap();
        assert_eq!(used, BackendId::new("mlx", "small:3b"));
        assert_eq!(transport.called(), vec!["big:32b@ollama", "small:3b@mlx"]);
        // connection trouble is not a crash
        assert!(invoker.fallback_state().await.failed.is_empty());
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(Box::new(|_, _| {
            Err(TransportError::Status {
                code: 404,
                body: "model not found".into(),
            })
        })));
        let invoker = BackendInvoker::new(transport.clone(), config());

        let err = invoker.invoke(&conversation(), None).await.unwrap_err();
        assert!(matches!(err, BackendError::Http { status: 404, .. }));
        assert_eq!(transport.called().len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_tools_reach_the_system_prompt() {
        let transport = Arc::new(ScriptedTransport::new(Box::new(|_, _| {
            Ok(r#"{"tool": "run_local_command", "tool_input": {"command": "ls"}}"#.to_string())
        })));
        let invoker = BackendInvoker::new(transport.clone(), config());

        let step = invoker
            .ask(&conversation(), None, &[ToolName::RunLocalCommand])
            .await
            .unwrap();
        match step {
            AgentStep::Finish(f) => assert_eq!(f.kind, FinishKind::Correction),
            other => panic!("expected correction, got {:?}", other),
        }

        let chats = transport.chats.lock().unwrap();
        let system = &chats[0].1.messages[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("BLOCKED TOOLS"));
        assert!(system.content.contains("run_local_command"));
    }
}
