//! Anthropic Messages API 驱动：实现 Claude 特有的请求/响应格式转换
//!
//! Anthropic Messages API driver. Differences from OpenAI:
//! - The key travels in an `x-api-key` header plus a pinned `anthropic-version`.
//! - Content uses typed blocks: `[{"type": "text", "text": "..."}]`.
//! - Response text is `content[0].text`; usage is split into input/output.
//! - `max_tokens` is required, so a default is always sent.

use serde_json::Value;
use std::collections::HashMap;

use crate::provider::{CompletionRequest, ProviderKind};
use crate::Result;

use super::{malformed, AuthScheme, DriverRequest, DriverResponse, ProviderDriver, UsageInfo};

pub const DEFAULT_MAX_TOKENS: u32 = 1024;
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API driver.
#[derive(Debug)]
pub struct AnthropicDriver {
    provider_id: String,
}

impl AnthropicDriver {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }
}

impl ProviderDriver for AnthropicDriver {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn build_request(&self, request: &CompletionRequest) -> DriverRequest {
        let body = serde_json::json!({
            "model": request.model,
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": request.prompt}]
            }],
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        let mut headers = HashMap::new();
        headers.insert("anthropic-version".into(), API_VERSION.into());

        DriverRequest {
            path: "/messages".into(),
            headers,
            body,
            auth: AuthScheme::Header("x-api-key"),
        }
    }

    fn parse_response(&self, body: &Value) -> Result<DriverResponse> {
        // { content: [{type: "text", text: "..."}], stop_reason, usage: {input_tokens, output_tokens} }
        let content = body
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            })
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| malformed(&self.provider_id, "content[0].text"))?;

        let finish_reason = body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(|r| match r {
                "end_turn" | "stop_sequence" => "stop".to_string(),
                "max_tokens" => "length".to_string(),
                other => other.to_string(),
            });

        let usage = body
            .get("usage")
            .filter(|u| u.is_object())
            .map(|u| {
                let input = u["input_tokens"].as_u64().unwrap_or(0);
                let output = u["output_tokens"].as_u64().unwrap_or(0);
                UsageInfo {
                    prompt_tokens: input,
                    completion_tokens: output,
                    total_tokens: input + output,
                }
            });

        Ok(DriverResponse {
            content,
            finish_reason,
            usage,
            model: body.get("model").and_then(|m| m.as_str()).map(String::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_build_request_defaults_max_tokens() {
        let driver = AnthropicDriver::new("claude");
        let req = driver.build_request(&CompletionRequest {
            prompt: "Hello".into(),
            model: "claude-3-sonnet-20240229".into(),
            temperature: 0.2,
            max_tokens: None,
        });
        assert_eq!(req.path, "/messages");
        assert_eq!(req.body["max_tokens"], 1024);
        assert_eq!(req.body["model"], "claude-3-sonnet-20240229");
        assert_eq!(req.body["messages"][0]["content"][0]["text"], "Hello");
        assert_eq!(req.headers["anthropic-version"], "2023-06-01");
        assert_eq!(req.auth, AuthScheme::Header("x-api-key"));
    }

    #[test]
    fn test_anthropic_parse_response() {
        let driver = AnthropicDriver::new("claude");
        let body = serde_json::json!({
            "content": [{"type": "text", "text": "Hello!"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let resp = driver.parse_response(&body).unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_anthropic_stop_reason_normalization() {
        let driver = AnthropicDriver::new("claude");
        let body = serde_json::json!({
            "content": [{"type": "text", "text": "cut"}],
            "stop_reason": "max_tokens"
        });
        let resp = driver.parse_response(&body).unwrap();
        assert_eq!(resp.finish_reason.as_deref(), Some("length"));
        assert!(resp.usage.is_none());
    }

    #[test]
    fn test_anthropic_missing_text_is_malformed() {
        let driver = AnthropicDriver::new("claude");
        assert!(driver
            .parse_response(&serde_json::json!({"content": []}))
            .is_err());
    }
}
