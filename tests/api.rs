use agent_task_orchestrator::{
    agent::ActionLoop,
    api::create_router,
    backend::Reasoner,
    config::{AgentConfig, OrchestratorConfig},
    error::BackendError,
    execution::ExecutionEngine,
    memory::Turn,
    orchestrator::TaskOrchestrator,
    planner::DirectPlanner,
    state::InMemoryTaskStore,
    tools::ToolRegistry,
    AgentStep, Finish, ToolName,
};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Echoes the task line back, after an optional delay.
struct EchoReasoner {
    delay: Duration,
}

#[async_trait::async_trait]
impl Reasoner for EchoReasoner {
    async fn decide(
        &self,
        conversation: &[Turn],
        _blocked: &[ToolName],
    ) -> Result<AgentStep, BackendError> {
        tokio::time::sleep(self.delay).await;
        let task = conversation
            .get(1)
            .map(|t| t.content.lines().next().unwrap_or_default().to_string())
            .unwrap_or_default();
        Ok(AgentStep::Finish(Finish::answer(task, "")))
    }

    async fn complete(&self, _conversation: &[Turn]) -> Result<String, BackendError> {
        Ok(String::new())
    }
}

fn app(delay: Duration, sync_timeout: Duration) -> Router {
    let agent = ActionLoop::new(
        Arc::new(EchoReasoner { delay }),
        Arc::new(DirectPlanner),
        ExecutionEngine::new(ToolRegistry::new()),
        AgentConfig::default(),
    );
    let orchestrator = TaskOrchestrator::new(
        Arc::new(InMemoryTaskStore::new()),
        Arc::new(agent),
        None,
        OrchestratorConfig {
            sync_timeout,
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        },
    );
    create_router(Arc::new(orchestrator))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_run(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = app(Duration::ZERO, Duration::from_secs(5));
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_sync_run_returns_terminal_record() {
    let app = app(Duration::ZERO, Duration::from_secs(5));
    let (status, body) = send(
        &app,
        post_run("/run", json!({"goal": "summarise the changelog", "correlation_id": "c-1"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["output"], "Task: summarise the changelog");
    assert_eq!(body["correlation_id"], "c-1");
    assert_eq!(body["knowledge"]["metadata"]["source"], "local");
}

#[tokio::test]
async fn test_correlation_header_is_used_when_body_has_none() {
    let app = app(Duration::ZERO, Duration::from_secs(5));
    let request = Request::builder()
        .method("POST")
        .uri("/run")
        .header("content-type", "application/json")
        .header("X-Correlation-ID", "hdr-7")
        .body(Body::from(json!({"goal": "summarise"}).to_string()))
        .unwrap();

    let (_, body) = send(&app, request).await;
    assert_eq!(body["correlation_id"], "hdr-7");
}

#[tokio::test]
async fn test_async_submit_then_poll() {
    let app = app(Duration::from_millis(50), Duration::from_secs(5));
    let (status, body) = send(&app, post_run("/run?async_mode=true", json!({"goal": "draft notes"}))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert_eq!(body["status_url"], format!("/run/status/{}", task_id));

    let status_url = format!("/run/status/{}", task_id);
    let record = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (code, record) = send(&app, get(&status_url)).await;
            assert_eq!(code, StatusCode::OK);
            if record["status"] == "completed" {
                return record;
            }
            assert!(["queued", "running"].contains(&record["status"].as_str().unwrap()));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(record["output"], "Task: draft notes");
    assert_eq!(record["stage"], "completed");
    assert!(record["updated_at"].is_string());
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let app = app(Duration::ZERO, Duration::from_secs(5));

    let (status, body) = send(&app, get(&format!("/run/status/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, get("/run/status/not-a-uuid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sync_timeout_is_504() {
    let app = app(Duration::from_secs(2), Duration::from_millis(100));
    let (status, body) = send(&app, post_run("/run", json!({"goal": "slow work"}))).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(body["error"].as_str().unwrap().contains("did not finish"));
}
