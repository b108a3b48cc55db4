//! Planner trait and implementations
//!
//! A plan is a short piece of text that seeds the action loop's memory. It
//! is advisory: the loop still decides every step itself.

use crate::backend::prompt::PLANNER_SYSTEM_PROMPT;
use crate::backend::Reasoner;
use crate::error::OrchestrationError;
use crate::memory::Turn;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Plans longer than this are rambling, not planning.
const MAX_PLAN_CHARS: usize = 600;

/// Markers of an error message or a model talking to itself.
const GARBAGE_MARKERS: &[&str] = &[
    "error:",
    "traceback",
    "exception",
    "<think>",
    "</think>",
    "as an ai",
    "i cannot",
];

/// Trait for plan generation
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, goal: &str) -> Result<String>;
}

/// Asks the backend for a one- or two-step plan.
pub struct ReasonerPlanner {
    reasoner: Arc<dyn Reasoner>,
}

impl ReasonerPlanner {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl Planner for ReasonerPlanner {
    async fn create_plan(&self, goal: &str) -> Result<String> {
        let conversation = vec![Turn::system(PLANNER_SYSTEM_PROMPT), Turn::user(goal)];
        let plan = self
            .reasoner
            .complete(&conversation)
            .await
            .map_err(|e| OrchestrationError::PlanningError(e.to_string()))?;
        debug!(chars = plan.len(), "Plan received");
        Ok(plan)
    }
}

/// Skips the backend and executes the goal as stated.
pub struct DirectPlanner;

#[async_trait]
impl Planner for DirectPlanner {
    async fn create_plan(&self, goal: &str) -> Result<String> {
        Ok(direct_plan(goal))
    }
}

pub fn direct_plan(goal: &str) -> String {
    format!("Execute: {}", goal.trim())
}

/// Keep a usable plan, replace anything else with the direct plan.
pub fn sanitize_plan(goal: &str, plan: &str) -> String {
    let trimmed = plan.trim();
    let lower = trimmed.to_lowercase();

    if trimmed.is_empty()
        || trimmed.chars().count() > MAX_PLAN_CHARS
        || GARBAGE_MARKERS.iter().any(|m| lower.contains(m))
    {
        return direct_plan(goal);
    }
    trimmed.to_string()
}
