use agent_task_orchestrator::{orchestrator::TaskOrchestrator, Config, TaskRequest, TaskStatus};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// One-shot run: `orchestrator <goal...>`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let goal = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if goal.trim().is_empty() {
        eprintln!("usage: orchestrator <goal>");
        std::process::exit(2);
    }

    info!(goal = %goal, "Agent Task Orchestrator starting");

    let orchestrator = TaskOrchestrator::from_config(&config)?;
    let record = orchestrator.run_sync(TaskRequest::new(goal)).await?;

    println!("\n=== TASK {} ===", record.id);
    println!("Status: {}", record.status);
    println!("Correlation ID: {}", record.correlation_id);

    if let Some(trace) = record.knowledge["execution_trace"]["trace"].as_array() {
        println!("\nTrace:");
        for (i, entry) in trace.iter().enumerate() {
            println!("  {}: {}", i + 1, entry.as_str().unwrap_or_default());
        }
    }

    match record.status {
        TaskStatus::Completed => {
            println!("\n{}", record.output.unwrap_or_default());
            Ok(())
        }
        _ => {
            let error = record.error.unwrap_or_else(|| "unknown failure".to_string());
            eprintln!("\nTask failed: {}", error);
            std::process::exit(1);
        }
    }
}
