//! Delegation client
//!
//! Hands a goal to a peer executor's `/run` endpoint. Every failure mode
//! collapses into `None` so the caller can fall back to local execution.

use crate::config::DelegationConfig;
use crate::models::DelegationResult;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

#[async_trait]
pub trait Delegate: Send + Sync {
    /// Where delegated tasks go, for the task's knowledge record.
    fn target(&self) -> &str;

    /// `None` means "run it yourself".
    async fn delegate(
        &self,
        goal: &str,
        context: Option<&str>,
        correlation_id: &str,
        max_steps: Option<usize>,
    ) -> Option<DelegationResult>;
}

#[derive(Debug, Serialize)]
struct DelegationRequest<'a> {
    goal: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_context: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_steps: Option<usize>,
    correlation_id: &'a str,
}

pub struct DelegationClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl DelegationClient {
    pub fn new(config: &DelegationConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/run", self.base_url)
    }
}

#[async_trait]
impl Delegate for DelegationClient {
    fn target(&self) -> &str {
        &self.base_url
    }

    async fn delegate(
        &self,
        goal: &str,
        context: Option<&str>,
        correlation_id: &str,
        max_steps: Option<usize>,
    ) -> Option<DelegationResult> {
        if goal.trim().is_empty() {
            return None;
        }

        let body = DelegationRequest {
            goal,
            project_context: context,
            max_steps,
            correlation_id,
        };

        info!(correlation_id, url = %self.endpoint(), "Delegating task");

        let response = match self
            .client
            .post(self.endpoint())
            .header(CORRELATION_HEADER, correlation_id)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(correlation_id, error = %e, timeout = e.is_timeout(), "Delegation request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(correlation_id, status = status.as_u16(), "Delegate answered with an error status");
            return None;
        }

        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(correlation_id, error = %e, "Delegate reply is not JSON");
                return None;
            }
        };

        let result = normalize(payload, correlation_id);
        if result.is_none() {
            warn!(correlation_id, "Delegate reply is not a JSON object");
        }
        result
    }
}

/// Coerce a peer's reply into a `DelegationResult`.
fn normalize(payload: Value, correlation_id: &str) -> Option<DelegationResult> {
    let Value::Object(mut object) = payload else {
        return None;
    };

    let status = match object.remove("status") {
        Some(Value::String(s)) => s,
        _ => "unknown".to_string(),
    };
    let output = match object.remove("output") {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let knowledge = match object.remove("knowledge") {
        Some(Value::Object(map)) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };
    let correlation_id = match object.remove("correlation_id") {
        Some(Value::String(s)) => s,
        _ => correlation_id.to_string(),
    };

    Some(DelegationResult {
        status,
        output,
        knowledge,
        correlation_id: Some(correlation_id),
    })
}
