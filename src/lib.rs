//! Agent Task Orchestrator
//!
//! A resilient task-execution engine that:
//! - Drives a reason/act/observe loop against local model runtimes
//! - Falls back across backends when one crashes, hangs or disappears
//! - Detects repeated actions and blocks the offending tool for a while
//! - Hands hands-on tasks to a peer executor before running them locally
//! - Tracks every submitted task for async polling
//!
//! UNIFIED LOOP:
//! SUBMIT → CLASSIFY → DELEGATE? → PLAN → ACT → OBSERVE → … → FINISH | FAIL

pub mod agent;
pub mod api;
pub mod backend;
pub mod classifier;
pub mod config;
pub mod delegation;
pub mod error;
pub mod execution;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod planner;
pub mod state;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use classifier::{TaskCategory, TaskClassifier};
pub use config::Config;
