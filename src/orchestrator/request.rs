use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{Error, ExecutionFailure};
use crate::ledger::{ExecutionRecord, ExecutionStatus};
use crate::schema::Variables;
use crate::{CallerId, ExecutionId, PromptId, Result};

/// One execution request.
///
/// Unset provider, model and temperature fall back to the engine's
/// configured defaults; an unset `max_tokens` defers to the vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub prompt_id: PromptId,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    pub caller_id: CallerId,
}

impl ExecutionRequest {
    pub fn new(prompt_id: PromptId, caller_id: CallerId) -> Self {
        Self {
            prompt_id,
            variables: Variables::new(),
            provider_name: None,
            model_name: None,
            temperature: None,
            max_tokens: None,
            caller_id,
        }
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }
}

/// Result of a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub execution_id: ExecutionId,
    pub prompt_id: PromptId,
    pub output: String,
    pub provider_name: String,
    pub model_name: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_seconds: f64,
    pub status: ExecutionStatus,
}

impl ExecutionResponse {
    pub(crate) fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            execution_id: record.id,
            prompt_id: record.prompt_id,
            output: record.output.clone().unwrap_or_default(),
            provider_name: record.provider_name.clone(),
            model_name: record.model_name.clone(),
            tokens_used: record.tokens_used,
            cost_usd: record.cost_usd,
            duration_seconds: record.duration_seconds,
            status: record.status,
        }
    }
}

/// A background execution started by [`super::ExecutionEngine::submit`].
///
/// The `pending` record exists as soon as the handle is returned; dropping
/// the handle does not cancel the vendor call.
#[derive(Debug)]
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    pub(crate) provider_name: String,
    pub(crate) task: JoinHandle<Result<ExecutionResponse>>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the background step to reach a terminal status.
    pub async fn join(self) -> Result<ExecutionResponse> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::execution(
                self.provider_name,
                ExecutionFailure::Aborted,
                format!("background execution {} did not complete: {}", self.execution_id, e),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let req = ExecutionRequest::new(3, 9)
            .variable("topic", "rust")
            .variable("count", 2)
            .provider("claude")
            .model("claude-3-haiku-20240307")
            .temperature(0.2)
            .max_tokens(200);
        assert_eq!(req.variables["topic"], "rust");
        assert_eq!(req.variables["count"], 2);
        assert_eq!(req.provider_name.as_deref(), Some("claude"));
        assert_eq!(req.max_tokens, Some(200));
    }

    #[test]
    fn test_request_deserializes_minimal_body() {
        let req: ExecutionRequest =
            serde_json::from_value(json!({"prompt_id": 1, "caller_id": 2})).unwrap();
        assert!(req.variables.is_empty());
        assert!(req.provider_name.is_none());
        assert!(req.temperature.is_none());
    }

    #[test]
    fn test_response_serializes_status_lowercase() {
        let resp = ExecutionResponse {
            execution_id: 1,
            prompt_id: 1,
            output: "hi".into(),
            provider_name: "openai".into(),
            model_name: "gpt-4".into(),
            tokens_used: 3,
            cost_usd: 0.0001,
            duration_seconds: 0.2,
            status: ExecutionStatus::Success,
        };
        assert_eq!(serde_json::to_value(&resp).unwrap()["status"], "success");
    }
}
