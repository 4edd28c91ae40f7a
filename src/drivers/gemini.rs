//! Gemini Generate API 驱动：实现 Google Gemini 特有的请求/响应格式转换
//!
//! Google Gemini generateContent API driver. Differences from OpenAI:
//! - The model is part of the path: `/models/{model}:generateContent`.
//! - Uses `contents` with `parts` instead of `messages`.
//! - `generationConfig` wraps temperature and `maxOutputTokens`.
//! - Response text is `candidates[0].content.parts[0].text`.
//! - The key is passed as the `?key=` query parameter, not in headers.

use serde_json::Value;
use std::collections::HashMap;

use crate::provider::{CompletionRequest, ProviderKind};
use crate::Result;

use super::{malformed, AuthScheme, DriverRequest, DriverResponse, ProviderDriver, UsageInfo};

/// Google Gemini generateContent API driver.
#[derive(Debug)]
pub struct GeminiDriver {
    provider_id: String,
}

impl GeminiDriver {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }
}

impl ProviderDriver for GeminiDriver {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn build_request(&self, request: &CompletionRequest) -> DriverRequest {
        let mut gen_config = serde_json::json!({ "temperature": request.temperature });
        if let Some(mt) = request.max_tokens {
            gen_config["maxOutputTokens"] = serde_json::json!(mt);
        }

        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": gen_config,
        });

        DriverRequest {
            path: format!("/models/{}:generateContent", model_segment(&request.model)),
            headers: HashMap::new(),
            body,
            auth: AuthScheme::QueryParam("key"),
        }
    }

    fn parse_response(&self, body: &Value) -> Result<DriverResponse> {
        // { candidates: [{ content: { parts: [{text}] }, finishReason }], usageMetadata }
        let content = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| malformed(&self.provider_id, "candidates[0].content.parts[0].text"))?;

        let finish_reason = body
            .pointer("/candidates/0/finishReason")
            .and_then(|v| v.as_str())
            .map(|r| match r {
                "STOP" => "stop".to_string(),
                "MAX_TOKENS" => "length".to_string(),
                "SAFETY" | "RECITATION" => "content_filter".to_string(),
                other => other.to_lowercase(),
            });

        // Some deployments omit usage; the provider falls back to a word-count estimate.
        let usage = body
            .get("usageMetadata")
            .and_then(|u| u.get("totalTokenCount").map(|_| u))
            .map(|u| UsageInfo {
                prompt_tokens: u["promptTokenCount"].as_u64().unwrap_or(0),
                completion_tokens: u["candidatesTokenCount"].as_u64().unwrap_or(0),
                total_tokens: u["totalTokenCount"].as_u64().unwrap_or(0),
            });

        Ok(DriverResponse {
            content,
            finish_reason,
            usage,
            model: body
                .get("modelVersion")
                .and_then(|m| m.as_str())
                .map(String::from),
        })
    }
}

/// The model name is a single path segment; anything outside the unreserved
/// set is percent-encoded.
fn model_segment(model: &str) -> String {
    url::form_urlencoded::byte_serialize(model.as_bytes()).collect()
}
