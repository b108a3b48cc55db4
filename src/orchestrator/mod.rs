//! Task orchestrator
//!
//! SUBMIT → QUEUED → (permit) → RUNNING → CLASSIFY → DELEGATE? → AGENT_RUN → COMPLETED | FAILED
//!
//! Every submitted task runs as its own tokio task. Intake is unbounded;
//! a semaphore bounds how many run at once, the rest wait in `queued`.

use crate::agent::{ActionLoop, CarriedBlock, LoopOutcome, RunOptions};
use crate::backend::{BackendInvoker, HttpTransport};
use crate::classifier::{TaskCategory, TaskClassifier};
use crate::config::{Config, OrchestratorConfig};
use crate::delegation::{Delegate, DelegationClient};
use crate::error::OrchestrationError;
use crate::execution::ExecutionEngine;
use crate::models::{DelegationResult, TaskHandle, TaskRecord, TaskRequest};
use crate::planner::ReasonerPlanner;
use crate::state::{is_expired, InMemoryTaskStore, TaskStore, TaskUpdate};
use crate::tools::create_default_registry;
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const GOAL_PREVIEW_CHARS: usize = 100;

/// Blocks left behind by a failed run, waiting for the next run in the
/// same project context.
struct SessionBlocks {
    blocks: Vec<CarriedBlock>,
    stored_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    store: Arc<dyn TaskStore>,
    agent: Arc<ActionLoop>,
    delegate: Option<Arc<dyn Delegate>>,
    config: OrchestratorConfig,
    permits: Arc<Semaphore>,
    /// Keyed by project context.
    session_blocks: Arc<Mutex<HashMap<String, SessionBlocks>>>,
}

impl TaskOrchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        agent: Arc<ActionLoop>,
        delegate: Option<Arc<dyn Delegate>>,
        config: OrchestratorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            store,
            agent,
            delegate,
            config,
            permits,
            session_blocks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wire the production stack: HTTP transport, fallback invoker, default
    /// tools, in-memory store and the optional peer delegate.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.backend.connect_timeout)?);
        let invoker = Arc::new(BackendInvoker::new(transport, config.backend.clone()));

        let execution = ExecutionEngine::new(create_default_registry(&config.tools));
        let agent = ActionLoop::new(
            invoker.clone(),
            Arc::new(ReasonerPlanner::new(invoker)),
            execution,
            config.agent.clone(),
        );

        let delegate: Option<Arc<dyn Delegate>> = match &config.delegation {
            Some(delegation) => Some(Arc::new(DelegationClient::new(delegation)?)),
            None => None,
        };

        Ok(Self::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(agent),
            delegate,
            config.orchestrator.clone(),
        ))
    }

    /// Record the task as queued and start it in the background.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskHandle> {
        let task_id = Uuid::new_v4();
        let correlation_id = request
            .correlation_id
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.store
            .insert(TaskRecord::queued(task_id, correlation_id.clone()))
            .await?;

        info!(
            task_id = %task_id,
            correlation_id = %correlation_id,
            goal_chars = request.goal.chars().count(),
            "Task accepted"
        );

        let worker = self.clone();
        let supervisor = self.clone();
        let correlation = correlation_id.clone();
        tokio::spawn(async move {
            let handle = tokio::spawn(async move { worker.execute(task_id, correlation, request).await });
            if let Err(join_error) = handle.await {
                error!(task_id = %task_id, error = %join_error, "Task worker crashed");
                supervisor
                    .fail(task_id, format!("Task worker crashed: {}", join_error), None)
                    .await;
            }
        });

        Ok(TaskHandle {
            task_id,
            correlation_id,
        })
    }

    /// Snapshot of a task. Expired records are evicted on the way.
    pub async fn get_status(&self, task_id: Uuid) -> Result<TaskRecord> {
        let record = self
            .store
            .get(task_id)
            .await?
            .ok_or(OrchestrationError::TaskNotFound(task_id))?;

        if is_expired(&record, Utc::now(), self.config.task_ttl) {
            self.store.evict_expired(Utc::now(), self.config.task_ttl).await?;
            return Err(OrchestrationError::TaskNotFound(task_id));
        }
        Ok(record)
    }

    /// Submit and poll until the task is terminal or the sync timeout hits.
    pub async fn run_sync(&self, request: TaskRequest) -> Result<TaskRecord> {
        let handle = self.submit(request).await?;
        let task_id = handle.task_id;

        let poll = async {
            loop {
                let record = self.get_status(task_id).await?;
                if record.status.is_terminal() {
                    return Ok(record);
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.config.sync_timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                warn!(task_id = %task_id, "Synchronous wait timed out");
                Err(OrchestrationError::SyncTimeout {
                    task_id,
                    secs: self.config.sync_timeout.as_secs(),
                })
            }
        }
    }

    /// Periodically sweep expired records and stale session blocks.
    pub fn spawn_janitor(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let period = self.config.janitor_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                orchestrator.sweep().await;
            }
        })
    }

    async fn sweep(&self) {
        let now = Utc::now();
        let ttl = self.config.task_ttl;

        match self.store.evict_expired(now, ttl).await {
            Ok(0) => {}
            Ok(evicted) => debug!(evicted, "Expired tasks evicted"),
            Err(e) => warn!(error = %e, "Task eviction failed"),
        }

        let mut sessions = self.session_blocks.lock().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            let age = now.signed_duration_since(entry.stored_at);
            age.to_std().map(|age| age <= ttl).unwrap_or(true)
        });
        let dropped = before - sessions.len();
        if dropped > 0 {
            debug!(dropped, "Stale session blocks dropped");
        }
    }

    async fn execute(&self, task_id: Uuid, correlation_id: String, request: TaskRequest) {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                self.fail(task_id, format!("Worker pool closed: {}", e), None).await;
                return;
            }
        };

        if let Err(e) = self.store.update(task_id, TaskUpdate::Start).await {
            warn!(task_id = %task_id, error = %e, "Could not start task");
            return;
        }

        let goal = request.goal.trim().to_string();
        let category = TaskClassifier::classify(&goal);
        let max_steps = request.max_steps.unwrap_or(self.config.default_max_steps);
        let context = request.project_context.clone();

        info!(
            task_id = %task_id,
            correlation_id = %correlation_id,
            %category,
            "Task running"
        );

        let trace = |routed_to: &str, steps: usize| {
            json!({
                "category": category,
                "routed_to": routed_to,
                "correlation_id": correlation_id,
                "goal_preview": goal.chars().take(GOAL_PREVIEW_CHARS).collect::<String>(),
                "steps": steps,
            })
        };

        // === DELEGATE ===
        if let Some(delegate) = self.delegation_target(&goal, category) {
            self.set_stage(task_id, "delegate").await;

            match delegate
                .delegate(&goal, context.as_deref(), &correlation_id, Some(max_steps))
                .await
            {
                Some(result) if result.is_success() => {
                    info!(task_id = %task_id, target = delegate.target(), "Task delegated");
                    let knowledge = delegated_knowledge(&result, delegate.target(), trace("delegate", 0));
                    self.complete(task_id, result.output, knowledge).await;
                    return;
                }
                Some(result) => {
                    warn!(task_id = %task_id, status = %result.status, "Delegate did not succeed, running locally");
                }
                None => {
                    debug!(task_id = %task_id, "No delegation, running locally");
                }
            }
        }

        // === AGENT_RUN ===
        self.set_stage(task_id, "agent_run").await;

        let inherited_blocks = match &context {
            Some(key) => self
                .session_blocks
                .lock()
                .await
                .remove(key)
                .map(|entry| entry.blocks)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let outcome = self
            .agent
            .run(
                &goal,
                RunOptions {
                    max_steps: Some(max_steps),
                    category: Some(category),
                    context: context.clone(),
                    inherited_blocks,
                },
            )
            .await;

        if let Some(key) = &context {
            if !outcome.blocked.is_empty() {
                self.session_blocks.lock().await.insert(
                    key.clone(),
                    SessionBlocks {
                        blocks: outcome.blocked.clone(),
                        stored_at: Utc::now(),
                    },
                );
            }
        }

        let knowledge = self.local_knowledge(&outcome, trace("agent", outcome.steps)).await;
        if outcome.is_finished() {
            self.complete(task_id, outcome.output, knowledge).await;
        } else {
            self.fail(task_id, outcome.output, Some(knowledge)).await;
        }
    }

    fn delegation_target(&self, goal: &str, category: TaskCategory) -> Option<&Arc<dyn Delegate>> {
        if category != TaskCategory::Delegate
            || goal.is_empty()
            || TaskClassifier::is_reference_query(goal)
        {
            return None;
        }
        self.delegate.as_ref()
    }

    async fn local_knowledge(&self, outcome: &LoopOutcome, mut trace: Value) -> Value {
        let model_used = self
            .agent
            .model_in_use()
            .await
            .map(|b| b.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        trace["trace"] = json!(outcome.trace);

        let mut knowledge = json!({
            "metadata": {"model_used": model_used, "source": "local"},
            "execution_trace": trace,
        });
        if !outcome.blocked.is_empty() {
            knowledge["blocked_tools"] = json!(outcome.blocked);
        }
        knowledge
    }

    async fn set_stage(&self, task_id: Uuid, stage: &str) {
        if let Err(e) = self.store.update(task_id, TaskUpdate::Stage(stage.to_string())).await {
            warn!(task_id = %task_id, stage, error = %e, "Stage update rejected");
        }
    }

    async fn complete(&self, task_id: Uuid, output: String, knowledge: Value) {
        match self
            .store
            .update(task_id, TaskUpdate::Complete { output, knowledge })
            .await
        {
            Ok(_) => info!(task_id = %task_id, "Task completed"),
            Err(e) => warn!(task_id = %task_id, error = %e, "Completion rejected"),
        }
    }

    async fn fail(&self, task_id: Uuid, error: String, knowledge: Option<Value>) {
        warn!(task_id = %task_id, error = %error, "Task failed");
        if let Err(e) = self
            .store
            .update(task_id, TaskUpdate::Fail { error, knowledge })
            .await
        {
            warn!(task_id = %task_id, error = %e, "Failure update rejected");
        }
    }
}

fn delegated_knowledge(result: &DelegationResult, target: &str, trace: Value) -> Value {
    let mut knowledge = match &result.knowledge {
        Value::Object(map) => Value::Object(map.clone()),
        _ => json!({}),
    };
    knowledge["metadata"] = json!({"model_used": "delegate", "source": "delegate"});
    knowledge["delegated_to"] = json!(target);
    knowledge["execution_trace"] = trace;
    knowledge
}
