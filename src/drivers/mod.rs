//! Provider 驱动抽象层：通过 trait 实现多厂商补全 API 的请求/响应转换
//!
//! Provider driver layer. A driver turns a vendor-neutral [`CompletionRequest`]
//! into the vendor's HTTP request shape and parses the vendor's response back
//! into a [`DriverResponse`]. Drivers never touch the network; the
//! [`crate::transport::HttpTransport`] sends what they build.
//!
//! One driver exists per [`ProviderKind`]; adding a vendor means adding a
//! variant and a driver, never branching on provider names in shared logic.

pub mod anthropic;
pub mod gemini;

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, ExecutionFailure};
use crate::provider::{CompletionRequest, ProviderKind};
use crate::Result;

pub use anthropic::AnthropicDriver;
pub use gemini::GeminiDriver;

/// How the credential is attached to a vendor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// A vendor-specific header carrying the raw key.
    Header(&'static str),
    /// A query parameter carrying the raw key.
    QueryParam(&'static str),
}

/// Vendor HTTP request, relative to the provider's base URL.
#[derive(Debug, Clone)]
pub struct DriverRequest {
    /// Path appended to the base URL (e.g. `/chat/completions`).
    pub path: String,
    /// Extra request headers beyond auth and content type.
    pub headers: HashMap<String, String>,
    /// JSON request body.
    pub body: Value,
    pub auth: AuthScheme,
}

/// Parsed vendor response.
#[derive(Debug, Clone)]
pub struct DriverResponse {
    /// Generated text.
    pub content: String,
    /// Finish reason normalized to `stop` / `length` / `content_filter` where known.
    pub finish_reason: Option<String>,
    /// Vendor-reported usage, when the vendor returns it.
    pub usage: Option<UsageInfo>,
    /// Model identifier echoed by the vendor, if any.
    pub model: Option<String>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageInfo {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Vendor-specific request/response adaptation.
///
/// The trait is object-safe; providers hold a `Box<dyn ProviderDriver>`
/// chosen by [`create_driver`].
pub trait ProviderDriver: Send + Sync + std::fmt::Debug {
    /// Provider name this driver was created for.
    fn provider_id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Build the vendor request for a single-turn completion.
    fn build_request(&self, request: &CompletionRequest) -> DriverRequest;

    /// Parse a successful (2xx) response body.
    fn parse_response(&self, body: &Value) -> Result<DriverResponse>;
}

pub(crate) fn malformed(provider_id: &str, what: &str) -> Error {
    Error::execution(
        provider_id,
        ExecutionFailure::MalformedResponse,
        format!("Malformed vendor response: missing {}", what),
    )
}

/// OpenAI chat completions driver.
#[derive(Debug)]
pub struct OpenAiDriver {
    provider_id: String,
}

impl OpenAiDriver {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }
}

impl ProviderDriver for OpenAiDriver {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn build_request(&self, request: &CompletionRequest) -> DriverRequest {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.temperature,
        });
        if let Some(mt) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(mt);
        }

        DriverRequest {
            path: "/chat/completions".into(),
            headers: HashMap::new(),
            body,
            auth: AuthScheme::Bearer,
        }
    }

    fn parse_response(&self, body: &Value) -> Result<DriverResponse> {
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| malformed(&self.provider_id, "choices[0].message.content"))?;
        let finish_reason = body
            .pointer("/choices/0/finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from);
        let usage = body
            .get("usage")
            .filter(|u| u.is_object())
            .map(|u| UsageInfo {
                prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
                completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
                total_tokens: u["total_tokens"].as_u64().unwrap_or(0),
            });

        Ok(DriverResponse {
            content,
            finish_reason,
            usage,
            model: body.get("model").and_then(|m| m.as_str()).map(String::from),
        })
    }
}

/// Create the driver for a provider kind.
pub fn create_driver(kind: ProviderKind, provider_id: &str) -> Box<dyn ProviderDriver> {
    match kind {
        ProviderKind::OpenAi => Box::new(OpenAiDriver::new(provider_id)),
        ProviderKind::Gemini => Box::new(GeminiDriver::new(provider_id)),
        ProviderKind::Claude => Box::new(AnthropicDriver::new(provider_id)),
    }
}
