//! Action loop controller
//!
//! PLANNING → ACTING → OBSERVING → (ACTING | FINISHED | FAILED)
//!
//! One run owns its memory, command fingerprints and block windows. Steps
//! are strictly sequential: a tool's observation is in memory before the
//! next backend call is made.

use crate::backend::prompt::executor_system_prompt;
use crate::backend::Reasoner;
use crate::classifier::{TaskCategory, TaskClassifier};
use crate::config::AgentConfig;
use crate::execution::ExecutionEngine;
use crate::memory::{Memory, Turn};
use crate::models::{Action, AgentStep, BackendId, BlockedTool, ToolName};
use crate::parser::blocked_tool_correction;
use crate::planner::{direct_plan, sanitize_plan, Planner};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identical actions allowed before the third one trips cycle detection.
const MAX_IDENTICAL_ACTIONS: usize = 2;

/// First words of commands that only make sense on this machine.
const LOCAL_ONLY_COMMANDS: &[&str] = &["docker exec", "ls", "cat", "find", "pwd", "grep", "echo"];

const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Planning,
    Acting,
    Observing,
    Finished,
    Failed,
}

/// A block that outlived its run, expressed relative to the next run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarriedBlock {
    pub tool: ToolName,
    pub remaining_steps: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_steps: Option<usize>,
    pub category: Option<TaskCategory>,
    pub context: Option<String>,
    pub inherited_blocks: Vec<CarriedBlock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    pub state: LoopState,
    pub output: String,
    pub steps: usize,
    pub blocked: Vec<CarriedBlock>,
    pub trace: Vec<String>,
}

impl LoopOutcome {
    pub fn is_finished(&self) -> bool {
        self.state == LoopState::Finished
    }
}

/// Everything that lives and dies with one run.
struct RunState {
    state: LoopState,
    memory: Memory,
    fingerprints: HashMap<String, usize>,
    blocks: Vec<BlockedTool>,
    step: usize,
    corrections: usize,
    trace: Vec<String>,
}

impl RunState {
    fn new(inherited: &[CarriedBlock]) -> Self {
        Self {
            state: LoopState::Planning,
            memory: Memory::new(),
            fingerprints: HashMap::new(),
            blocks: inherited
                .iter()
                .filter(|b| b.remaining_steps > 0)
                .map(|b| BlockedTool {
                    tool: b.tool,
                    until_step: b.remaining_steps + 1,
                })
                .collect(),
            step: 0,
            corrections: 0,
            trace: Vec::new(),
        }
    }

    fn enter(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, step = self.step, "Loop transition");
        self.state = next;
    }

    fn active_blocks(&self) -> Vec<ToolName> {
        let mut tools: Vec<ToolName> = self
            .blocks
            .iter()
            .filter(|b| b.is_active(self.step))
            .map(|b| b.tool)
            .collect();
        tools.sort();
        tools.dedup();
        tools
    }

    fn block(&mut self, tool: ToolName, steps: usize) {
        let until_step = self.step + steps + 1;
        self.blocks.retain(|b| b.tool != tool);
        self.blocks.push(BlockedTool { tool, until_step });
    }

    /// Active blocks, rebased onto the start of a future run.
    fn carried(&self) -> Vec<CarriedBlock> {
        self.blocks
            .iter()
            .filter(|b| b.until_step > self.step + 1)
            .map(|b| CarriedBlock {
                tool: b.tool,
                remaining_steps: b.until_step - self.step - 1,
            })
            .collect()
    }

    fn finish(mut self, state: LoopState, output: String) -> LoopOutcome {
        self.enter(state);
        LoopOutcome {
            state,
            output,
            steps: self.step,
            blocked: self.carried(),
            trace: self.trace,
        }
    }
}

pub struct ActionLoop {
    reasoner: Arc<dyn Reasoner>,
    planner: Arc<dyn Planner>,
    execution: ExecutionEngine,
    config: AgentConfig,
}

impl ActionLoop {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        planner: Arc<dyn Planner>,
        execution: ExecutionEngine,
        config: AgentConfig,
    ) -> Self {
        Self {
            reasoner,
            planner,
            execution,
            config,
        }
    }

    pub async fn model_in_use(&self) -> Option<BackendId> {
        self.reasoner.last_backend().await
    }

    /// Run `goal` to completion, step-limit or cycle failure.
    pub async fn run(&self, goal: &str, options: RunOptions) -> LoopOutcome {
        let max_steps = options.max_steps.unwrap_or(self.config.max_steps).max(1);
        let category = options
            .category
            .unwrap_or_else(|| TaskClassifier::classify(goal));
        let mut run = RunState::new(&options.inherited_blocks);

        info!(%category, max_steps, "Action loop: starting run");

        // === PLANNING ===
        let plan = self.plan(goal, category).await;
        run.trace.push(format!("PLAN: {}", plan));

        run.memory.push(Turn::system(executor_system_prompt(
            &self.execution.describe_tools(),
        )));
        let mut task = format!("Task: {}\n\nPlan:\n{}", goal.trim(), plan);
        if let Some(context) = options.context.as_deref().filter(|c| !c.trim().is_empty()) {
            task.push_str(&format!("\n\nProject context: {}", context));
        }
        run.memory.push(Turn::user(task));

        loop {
            // === ACTING ===
            run.enter(LoopState::Acting);

            if run.step >= max_steps {
                warn!(max_steps, "Step limit reached");
                let output = format!(
                    "Step limit reached: the task did not finish within {} steps.",
                    max_steps
                );
                return run.finish(LoopState::Failed, output);
            }
            run.step += 1;

            let blocked = run.active_blocks();
            let conversation = self.conversation(&run.memory);

            let decision = match self.reasoner.decide(&conversation, &blocked).await {
                Ok(step) => step,
                Err(e) => {
                    warn!(step = run.step, error = %e, "Backend failed");
                    return run.finish(LoopState::Failed, format!("Agent failure: {}", e));
                }
            };

            let action = match decision {
                AgentStep::Finish(finish) => {
                    if finish.is_correction() && run.corrections < self.config.max_corrections {
                        run.corrections += 1;
                        debug!(step = run.step, "Corrective reply, re-prompting");
                        run.memory.push(Turn::user(finish.output_text()));
                        continue;
                    }
                    run.trace.push(format!("FINISH at step {}", run.step));
                    info!(steps = run.step, "Action loop: finished");
                    return run.finish(LoopState::Finished, finish.output_text());
                }
                AgentStep::Action(action) => action,
            };
            run.corrections = 0;

            let action = correct_local_operation(action);
            let fingerprint = fingerprint(&action);
            let seen = run.fingerprints.get(&fingerprint).copied().unwrap_or(0);

            if seen >= MAX_IDENTICAL_ACTIONS {
                run.block(action.tool, self.config.block_steps);
                warn!(
                    tool = %action.tool,
                    step = run.step,
                    block_steps = self.config.block_steps,
                    "Cycle detected"
                );
                let output = format!(
                    "Cycle detected: '{}' was requested {} times with identical input. \
                     '{}' is blocked for the next {} steps.",
                    action.tool,
                    seen + 1,
                    action.tool,
                    self.config.block_steps
                );
                run.trace.push(format!("CYCLE at step {}: {}", run.step, action.tool));
                return run.finish(LoopState::Failed, output);
            }

            if blocked.contains(&action.tool) {
                debug!(tool = %action.tool, step = run.step, "Blocked tool requested");
                run.memory.push(Turn::user(format!(
                    "Observation: {}",
                    blocked_tool_correction(action.tool, &blocked)
                )));
                continue;
            }

            *run.fingerprints.entry(fingerprint).or_insert(0) += 1;
            run.memory.push(Turn::assistant(render_action(&action)));

            // === OBSERVING ===
            run.enter(LoopState::Observing);
            info!(step = run.step, tool = %action.tool, "Executing action");

            let observation = self.execution.observe(&action).await;
            run.trace.push(format!(
                "ACT step {}: {} ({:?}, {} ms)",
                run.step, action.tool, observation.status, observation.elapsed_ms
            ));
            run.memory.push(Turn::user(format!(
                "Observation from {}:\n{}",
                action.tool, observation.output
            )));
        }
    }

    async fn plan(&self, goal: &str, category: TaskCategory) -> String {
        if category == TaskCategory::Trivial {
            return direct_plan(goal);
        }
        match self.planner.create_plan(goal).await {
            Ok(plan) => sanitize_plan(goal, &plan),
            Err(e) => {
                warn!(error = %e, "Planning failed, executing directly");
                direct_plan(goal)
            }
        }
    }

    /// System prompt and task, then the most recent turns.
    fn conversation(&self, memory: &Memory) -> Vec<Turn> {
        let turns = memory.turns();
        let head = turns.len().min(2);
        let recent = memory.window(self.config.history_window);
        let overlap = head.saturating_sub(turns.len() - recent.len());

        turns[..head]
            .iter()
            .chain(recent[overlap..].iter())
            .cloned()
            .collect()
    }
}

/// SHA-256 over the tool name and its canonical (key-sorted) input.
pub fn fingerprint(action: &Action) -> String {
    let canonical = Value::Object(action.tool_input.clone()).to_string();
    let mut hasher = Sha256::new();
    hasher.update(action.tool.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// A remote command aimed at this machine runs locally instead.
fn correct_local_operation(action: Action) -> Action {
    if action.tool != ToolName::RunRemoteCommand {
        return action;
    }

    let host = action.input_str("host").unwrap_or("").trim().to_lowercase();
    let command = action.input_str("command").unwrap_or("").trim().to_string();

    let local_host = host.is_empty() || LOCAL_HOSTS.contains(&host.as_str());
    let local_command = LOCAL_ONLY_COMMANDS.iter().any(|prefix| {
        command == *prefix || command.starts_with(&format!("{} ", prefix))
    });

    if !(local_host || local_command) {
        return action;
    }

    debug!(host = %host, command = %command, "Rewriting remote command to local");
    let mut input = Map::new();
    input.insert("command".to_string(), Value::String(command));
    Action {
        tool: ToolName::RunLocalCommand,
        tool_input: input,
        thought: action.thought,
    }
}

fn render_action(action: &Action) -> String {
    serde_json::json!({
        "thought": action.thought,
        "tool": action.tool,
        "tool_input": action.tool_input,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, OrchestrationError};
    use crate::memory::Role;
    use crate::models::Finish;
    use crate::planner::DirectPlanner;
    use crate::tools::{Tool, ToolRegistry};
    use crate::Result;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script, then finishes.
    struct ScriptedReasoner {
        script: Mutex<VecDeque<std::result::Result<AgentStep, BackendError>>>,
        seen: Mutex<Vec<(Vec<Turn>, Vec<ToolName>)>>,
    }

    impl ScriptedReasoner {
        fn new(steps: Vec<std::result::Result<AgentStep, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn decide(
            &self,
            conversation: &[Turn],
            blocked: &[ToolName],
        ) -> std::result::Result<AgentStep, BackendError> {
            self.seen
                .lock()
                .unwrap()
                .push((conversation.to_vec(), blocked.to_vec()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(AgentStep::Finish(Finish::answer("script done", ""))))
        }

        async fn complete(&self, _conversation: &[Turn]) -> std::result::Result<String, BackendError> {
            Ok("1. do the thing".to_string())
        }
    }

    /// Issues a fresh command every step and never finishes.
    struct EndlessReasoner;

    #[async_trait::async_trait]
    impl Reasoner for EndlessReasoner {
        async fn decide(
            &self,
            conversation: &[Turn],
            _blocked: &[ToolName],
        ) -> std::result::Result<AgentStep, BackendError> {
            Ok(AgentStep::Action(local(&format!("echo {}", conversation.len()))))
        }

        async fn complete(&self, _conversation: &[Turn]) -> std::result::Result<String, BackendError> {
            Ok(String::new())
        }
    }

    struct FakeTool {
        name: ToolName,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> ToolName {
            self.name
        }

        fn description(&self) -> &'static str {
            "fake"
        }

        async fn execute(&self, input: &Map<String, Value>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OrchestrationError::ToolError("disk on fire".into()));
            }
            Ok(format!("ran {}", Value::Object(input.clone())))
        }
    }

    struct Harness {
        local_calls: Arc<AtomicUsize>,
        read_calls: Arc<AtomicUsize>,
    }

    fn engine(read_fails: bool) -> (ExecutionEngine, Harness) {
        let local_calls = Arc::new(AtomicUsize::new(0));
        let read_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool {
            name: ToolName::RunLocalCommand,
            calls: local_calls.clone(),
            fail: false,
        }));
        registry.register(Arc::new(FakeTool {
            name: ToolName::ReadFile,
            calls: read_calls.clone(),
            fail: read_fails,
        }));
        (
            ExecutionEngine::new(registry),
            Harness {
                local_calls,
                read_calls,
            },
        )
    }

    fn action_loop(reasoner: Arc<dyn Reasoner>, execution: ExecutionEngine) -> ActionLoop {
        ActionLoop::new(reasoner, Arc::new(DirectPlanner), execution, AgentConfig::default())
    }

    fn local(command: &str) -> Action {
        Action::new(
            ToolName::RunLocalCommand,
            json!({ "command": command }).as_object().cloned().unwrap(),
        )
    }

    fn act(action: Action) -> std::result::Result<AgentStep, BackendError> {
        Ok(AgentStep::Action(action))
    }

    fn done(text: &str) -> std::result::Result<AgentStep, BackendError> {
        Ok(AgentStep::Finish(Finish::answer(text, "")))
    }

    #[tokio::test]
    async fn test_immediate_finish() {
        let (execution, _) = engine(false);
        let reasoner = ScriptedReasoner::new(vec![done("42")]);
        let outcome = action_loop(reasoner, execution).run("answer", RunOptions::default()).await;

        assert_eq!(outcome.state, LoopState::Finished);
        assert_eq!(outcome.output, "42");
        assert_eq!(outcome.steps, 1);
        assert!(outcome.blocked.is_empty());
    }

    #[tokio::test]
    async fn test_third_identical_action_fails_and_blocks_tool() {
        let (execution, harness) = engine(false);
        let reasoner = ScriptedReasoner::new(vec![
            act(local("ls -la")),
            act(local("ls -la")),
            act(local("ls -la")),
            done("never reached"),
        ]);
        let outcome = action_loop(reasoner, execution)
            .run("list files", RunOptions::default())
            .await;

        assert_eq!(outcome.state, LoopState::Failed);
        assert!(outcome.output.starts_with("Cycle detected"));
        assert_eq!(outcome.steps, 3);
        assert_eq!(
            outcome.blocked,
            vec![CarriedBlock {
                tool: ToolName::RunLocalCommand,
                remaining_steps: 5
            }]
        );
        assert_eq!(harness.local_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tool_error_is_observed_and_loop_continues() {
        let (execution, harness) = engine(true);
        let read = Action::new(
            ToolName::ReadFile,
            json!({"file_path": "x"}).as_object().cloned().unwrap(),
        );
        let reasoner = ScriptedReasoner::new(vec![act(read), done("recovered")]);
        let outcome = action_loop(reasoner.clone(), execution)
            .run("read x", RunOptions::default())
            .await;

        assert_eq!(outcome.state, LoopState::Finished);
        assert_eq!(outcome.output, "recovered");
        assert_eq!(harness.read_calls.load(Ordering::SeqCst), 1);

        let seen = reasoner.seen.lock().unwrap();
        let last_turn = seen[1].0.last().unwrap();
        assert!(last_turn.content.contains("Error: Tool error: disk on fire"));
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_observed() {
        let (execution, _) = engine(false);
        let list = Action::new(ToolName::ListDirectory, Map::new());
        let reasoner = ScriptedReasoner::new(vec![act(list), done("ok")]);
        let outcome = action_loop(reasoner.clone(), execution)
            .run("look", RunOptions::default())
            .await;

        assert!(outcome.is_finished());
        let seen = reasoner.seen.lock().unwrap();
        assert!(seen[1].0.last().unwrap().content.contains("Valid tools"));
    }

    #[tokio::test]
    async fn test_remote_command_on_local_host_runs_locally() {
        let (execution, harness) = engine(false);
        let remote = Action::new(
            ToolName::RunRemoteCommand,
            json!({"host": "127.0.0.1", "command": "uptime"}).as_object().cloned().unwrap(),
        );
        let reasoner = ScriptedReasoner::new(vec![act(remote), done("up")]);
        let outcome = action_loop(reasoner, execution)
            .run("check uptime", RunOptions::default())
            .await;

        assert!(outcome.is_finished());
        assert_eq!(harness.local_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_local_correction_rules() {
        let remote = |host: &str, command: &str| {
            Action::new(
                ToolName::RunRemoteCommand,
                json!({"host": host, "command": command}).as_object().cloned().unwrap(),
            )
        };

        let rewritten = correct_local_operation(remote("10.0.0.7", "docker exec api ls /app"));
        assert_eq!(rewritten.tool, ToolName::RunLocalCommand);
        assert_eq!(rewritten.input_str("command"), Some("docker exec api ls /app"));
        assert!(rewritten.input_str("host").is_none());

        let kept = correct_local_operation(remote("10.0.0.7", "systemctl status nginx"));
        assert_eq!(kept.tool, ToolName::RunRemoteCommand);

        // "lsblk" is not "ls"
        let kept = correct_local_operation(remote("db1", "lsblk"));
        assert_eq!(kept.tool, ToolName::RunRemoteCommand);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let (execution, harness) = engine(false);
        let outcome = action_loop(Arc::new(EndlessReasoner), execution)
            .run(
                "loop forever",
                RunOptions {
                    max_steps: Some(3),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(outcome.state, LoopState::Failed);
        assert!(outcome.output.contains("within 3 steps"));
        assert_eq!(outcome.steps, 3);
        assert_eq!(harness.local_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_inherited_block_skips_execution() {
        let (execution, harness) = engine(false);
        let reasoner = ScriptedReasoner::new(vec![act(local("ls")), done("gave up on ls")]);
        let outcome = action_loop(reasoner.clone(), execution)
            .run(
                "list",
                RunOptions {
                    inherited_blocks: vec![CarriedBlock {
                        tool: ToolName::RunLocalCommand,
                        remaining_steps: 2,
                    }],
                    ..Default::default()
                },
            )
            .await;

        assert!(outcome.is_finished());
        assert_eq!(harness.local_calls.load(Ordering::SeqCst), 0);

        let seen = reasoner.seen.lock().unwrap();
        assert_eq!(seen[0].1, vec![ToolName::RunLocalCommand]);
        assert!(seen[1].0.last().unwrap().content.contains("temporarily blocked"));
        // the block window is two steps, so it is gone after step 2
        assert!(outcome.blocked.is_empty());
    }

    #[tokio::test]
    async fn test_corrective_finish_reprompts() {
        let (execution, _) = engine(false);
        let reasoner = ScriptedReasoner::new(vec![
            Ok(AgentStep::Finish(Finish::correction("Unknown tool 'rm'. Choose one of: ..."))),
            done("fixed"),
        ]);
        let outcome = action_loop(reasoner.clone(), execution)
            .run("tidy up", RunOptions::default())
            .await;

        assert_eq!(outcome.output, "fixed");
        assert_eq!(outcome.steps, 2);
        let seen = reasoner.seen.lock().unwrap();
        assert!(seen[1].0.last().unwrap().content.starts_with("Unknown tool 'rm'"));
    }

    #[tokio::test]
    async fn test_repeated_corrections_end_the_run() {
        let (execution, _) = engine(false);
        let correction = || Ok(AgentStep::Finish(Finish::correction("bad format")));
        let reasoner = ScriptedReasoner::new(vec![correction(), correction(), correction()]);
        let outcome = action_loop(reasoner.clone(), execution)
            .run("tidy up", RunOptions::default())
            .await;

        assert_eq!(outcome.state, LoopState::Finished);
        assert_eq!(outcome.output, "bad format");
        assert_eq!(reasoner.calls(), 3);
    }

    #[tokio::test]
    async fn test_backend_error_fails_the_run() {
        let (execution, _) = engine(false);
        let reasoner = ScriptedReasoner::new(vec![Err(BackendError::Exhausted {
            hops: 3,
            last: "crash".into(),
        })]);
        let outcome = action_loop(reasoner, execution)
            .run("anything", RunOptions::default())
            .await;

        assert_eq!(outcome.state, LoopState::Failed);
        assert!(outcome.output.starts_with("Agent failure"));
    }

    #[tokio::test]
    async fn test_conversation_keeps_task_and_recent_turns() {
        let (execution, _) = engine(false);
        let reasoner = ScriptedReasoner::new(vec![
            act(local("echo 0")),
            act(local("echo 1")),
            act(local("echo 2")),
            act(local("echo 3")),
            done("ok"),
        ]);
        let config = AgentConfig {
            history_window: 3,
            ..AgentConfig::default()
        };
        let agent = ActionLoop::new(reasoner.clone(), Arc::new(DirectPlanner), execution, config);
        agent.run("walk the tree", RunOptions::default()).await;

        let seen = reasoner.seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0].0.len(), 2);
        for (conversation, _) in seen.iter() {
            assert!(conversation.len() <= 5);
            assert_eq!(conversation[0].role, Role::System);
            assert!(conversation[1].content.starts_with("Task: walk the tree"));
            assert!(conversation[2..].iter().all(|t| !t.content.starts_with("Task:")));
        }
        let last = seen[4].0.last().unwrap();
        assert!(last.content.contains("echo 3"));
    }

    #[tokio::test]
    async fn test_each_run_starts_with_fresh_memory() {
        let (execution, _) = engine(false);
        let reasoner = ScriptedReasoner::new(vec![act(local("pwd")), done("one"), done("two")]);
        let agent = action_loop(reasoner.clone(), execution);

        agent.run("first", RunOptions::default()).await;
        agent.run("second", RunOptions::default()).await;

        let seen = reasoner.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].0.len(), 2);
        assert!(seen[2].0[1].content.contains("second"));
    }

    #[tokio::test]
    async fn test_plan_from_reasoner_seeds_memory_unless_trivial() {
        let (execution, _) = engine(false);
        let reasoner = ScriptedReasoner::new(vec![done("a"), done("b")]);
        let planner = Arc::new(crate::planner::ReasonerPlanner::new(reasoner.clone()));
        let agent = ActionLoop::new(reasoner.clone(), planner, execution, AgentConfig::default());

        agent.run("draft a migration plan", RunOptions::default()).await;
        agent
            .run(
                "hello",
                RunOptions {
                    category: Some(TaskCategory::Trivial),
                    ..Default::default()
                },
            )
            .await;

        let seen = reasoner.seen.lock().unwrap();
        assert!(seen[0].0[1].content.contains("1. do the thing"));
        assert!(seen[1].0[1].content.contains("Execute: hello"));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = Action::new(
            ToolName::RunRemoteCommand,
            json!({"host": "h", "command": "c"}).as_object().cloned().unwrap(),
        );
        let b = Action::new(
            ToolName::RunRemoteCommand,
            json!({"command": "c", "host": "h"}).as_object().cloned().unwrap(),
        );
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&local("c")));
        assert_eq!(fingerprint(&a).len(), 64);
    }
}
