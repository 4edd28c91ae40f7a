//! 厂商抽象层：统一的补全执行与成本计算接口。
//!
//! # Provider Abstraction
//!
//! A [`Provider`] binds one configured vendor integration: its wire driver,
//! an HTTP transport carrying the credential, and the provider's price table.
//! Every provider exposes the same two capabilities:
//!
//! - [`Provider::execute`]: one single-turn completion, no retries.
//! - [`Provider::calculate_cost`]: the shared cost normalization policy.
//!
//! Providers are resolved by name through the [`ProviderRegistry`]; the
//! credential is read from the environment at construction time, so a missing
//! key fails before any template work happens.

mod registry;

pub use registry::{ModelDescriptor, ProviderDescriptor, ProviderRegistry};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::drivers::{create_driver, ProviderDriver};
use crate::error::{Error, ErrorContext, ExecutionFailure};
use crate::tokens::{CostEstimate, PriceTable, TokenCounter, WhitespaceCounter};
use crate::transport::{HttpTransport, TransportError};
use crate::Result;

/// Vendor wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "claude", alias = "anthropic")]
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderKind::Claude => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Claude => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor-neutral single-turn completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Fully rendered prompt text.
    pub prompt: String,
    /// Vendor model identifier.
    pub model: String,
    pub temperature: f64,
    /// Output cap; `None` defers to the vendor's (or driver's) default.
    pub max_tokens: Option<u32>,
}

/// Result of [`Provider::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub output: String,
    pub tokens_used: u64,
    /// Model identifier the request was sent with.
    pub model: String,
    /// False when `tokens_used` is a word-count estimate.
    pub usage_reported: bool,
}

/// Model selection after catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Identifier sent to the vendor and used for pricing.
    pub identifier: String,
    pub max_tokens: Option<u32>,
    /// False when the model is not in the catalog and was passed through.
    pub known: bool,
}

/// A configured, credentialed vendor integration.
pub struct Provider {
    name: String,
    driver: Box<dyn ProviderDriver>,
    transport: HttpTransport,
    prices: PriceTable,
    models: Vec<ModelDescriptor>,
    default_model: String,
    counter: WhitespaceCounter,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("kind", &self.driver.kind())
            .field("base_url", &self.transport.base_url())
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl Provider {
    /// Build a provider from its descriptor, reading the credential from the
    /// process environment.
    pub fn from_descriptor(descriptor: &ProviderDescriptor, timeout: Duration) -> Result<Self> {
        let env_var = descriptor.credential_env();
        let api_key = std::env::var(env_var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::MissingCredential {
                provider: descriptor.name.clone(),
                env_var: env_var.to_string(),
            })?;

        let default = descriptor.default_model_descriptor().ok_or_else(|| {
            Error::configuration_with_context(
                format!("default model '{}' is not configured", descriptor.default_model),
                ErrorContext::new()
                    .with_field_path(format!("providers.{}.default_model", descriptor.name))
                    .with_source("provider"),
            )
        })?;

        let mut prices = PriceTable::new(default.pricing());
        for model in descriptor.models.iter().filter(|m| m.active) {
            prices.insert(model.pricing());
        }

        let base_url = descriptor
            .base_url
            .as_deref()
            .unwrap_or_else(|| descriptor.kind.default_base_url());
        let transport = HttpTransport::new(base_url, api_key, timeout).map_err(|e| {
            Error::configuration_with_context(
                e.to_string(),
                ErrorContext::new()
                    .with_field_path(format!("providers.{}", descriptor.name))
                    .with_source("transport"),
            )
        })?;

        Ok(Self {
            name: descriptor.name.clone(),
            driver: create_driver(descriptor.kind, &descriptor.name),
            transport,
            prices,
            models: descriptor.models.clone(),
            default_model: default.model_identifier.clone(),
            counter: WhitespaceCounter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.driver.kind()
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Map a requested model name (descriptor name or vendor identifier) to
    /// the identifier to send, clamping `max_tokens` to the model's budget.
    ///
    /// Unknown or inactive models pass through unchanged unless `strict`.
    pub fn resolve_model(
        &self,
        requested: Option<&str>,
        max_tokens: Option<u32>,
        strict: bool,
    ) -> Result<ResolvedModel> {
        let name = requested.unwrap_or(&self.default_model);
        if !is_model_identifier(name) {
            return Err(Error::invalid(
                "model_name",
                format!("'{}' is not a valid model identifier", name),
            ));
        }
        let found = self
            .models
            .iter()
            .filter(|m| m.active)
            .find(|m| m.name == name || m.model_identifier == name);

        match found {
            Some(model) => {
                let max_tokens = match (max_tokens, model.max_tokens) {
                    (Some(req), Some(budget)) if req > budget => {
                        debug!(
                            provider = %self.name,
                            model = %model.model_identifier,
                            requested = req,
                            budget = budget,
                            "clamped max_tokens to model budget"
                        );
                        Some(budget)
                    }
                    (req, _) => req,
                };
                Ok(ResolvedModel {
                    identifier: model.model_identifier.clone(),
                    max_tokens,
                    known: true,
                })
            }
            None if strict => Err(Error::UnknownModel {
                provider: self.name.clone(),
                model: name.to_string(),
                available: self
                    .models
                    .iter()
                    .filter(|m| m.active)
                    .map(|m| m.name.clone())
                    .collect(),
            }),
            None => {
                warn!(
                    provider = %self.name,
                    model = %name,
                    "model not in catalog, passing through with fallback pricing"
                );
                Ok(ResolvedModel {
                    identifier: name.to_string(),
                    max_tokens,
                    known: false,
                })
            }
        }
    }

    /// Send one completion request to the vendor.
    pub async fn execute(&self, request: &CompletionRequest) -> Result<Completion> {
        let wire = self.driver.build_request(request);
        let body = self
            .transport
            .post_json(&wire)
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.driver.parse_response(&body)?;

        let (tokens_used, usage_reported) = match response.usage {
            Some(usage) => (usage.total_tokens, true),
            None => (
                self.counter.count_exchange(&request.prompt, &response.content),
                false,
            ),
        };

        Ok(Completion {
            output: response.content,
            tokens_used,
            model: request.model.clone(),
            usage_reported,
        })
    }

    pub fn calculate_cost(&self, tokens: u64, model: &str) -> f64 {
        self.prices.calculate_cost(tokens, model)
    }

    pub fn estimate_cost(&self, tokens: u64, model: &str) -> CostEstimate {
        self.prices.estimate(tokens, model)
    }

    fn transport_error(&self, err: TransportError) -> Error {
        let failure = match &err {
            e if e.is_timeout() => ExecutionFailure::Timeout,
            TransportError::Status { status, .. } => ExecutionFailure::Vendor { status: *status },
            TransportError::Decode(_) => ExecutionFailure::MalformedResponse,
            TransportError::Http(_) | TransportError::Other(_) => ExecutionFailure::Transport,
        };
        let message = match err {
            TransportError::Status { status, body } => {
                format!("HTTP {}: {}", status, truncate(&body, 512))
            }
            other => other.to_string(),
        };
        Error::execution(&self.name, failure, message)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Model identifiers end up in vendor URL paths, so only a conservative
/// alphabet is accepted.
fn is_model_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(env: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            name: "openai".into(),
            kind: ProviderKind::OpenAi,
            active: true,
            api_key_env: Some(env.into()),
            base_url: Some("http://127.0.0.1:9".into()),
            default_model: "gpt-4".into(),
            models: vec![
                ModelDescriptor::priced("gpt-4", 0.03, 0.06).with_max_tokens(8192),
                ModelDescriptor::priced("gpt-3.5-turbo", 0.0005, 0.0015),
            ],
        }
    }

    #[test]
    fn test_missing_credential_fails_fast() {
        let err = Provider::from_descriptor(
            &descriptor("PROMPT_ENGINE_TEST_UNSET_KEY_1"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        match err {
            Error::MissingCredential { provider, env_var } => {
                assert_eq!(provider, "openai");
                assert_eq!(env_var, "PROMPT_ENGINE_TEST_UNSET_KEY_1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_model_resolution() {
        std::env::set_var("PROMPT_ENGINE_TEST_PROVIDER_KEY_2", "sk");
        let p = Provider::from_descriptor(
            &descriptor("PROMPT_ENGINE_TEST_PROVIDER_KEY_2"),
            Duration::from_secs(1),
        )
        .unwrap();

        let default = p.resolve_model(None, None, false).unwrap();
        assert_eq!(default.identifier, "gpt-4");
        assert!(default.known);

        let clamped = p.resolve_model(Some("gpt-4"), Some(100_000), false).unwrap();
        assert_eq!(clamped.max_tokens, Some(8192));

        let unbounded = p.resolve_model(Some("gpt-3.5-turbo"), Some(100_000), false).unwrap();
        assert_eq!(unbounded.max_tokens, Some(100_000));

        let passthrough = p.resolve_model(Some("gpt-5"), None, false).unwrap();
        assert_eq!(passthrough.identifier, "gpt-5");
        assert!(!passthrough.known);

        let strict = p.resolve_model(Some("gpt-5"), None, true).unwrap_err();
        assert!(matches!(strict, Error::UnknownModel { .. }));
    }

    #[test]
    fn test_model_names_with_path_characters_are_rejected() {
        std::env::set_var("PROMPT_ENGINE_TEST_PROVIDER_KEY_4", "sk");
        let p = Provider::from_descriptor(
            &descriptor("PROMPT_ENGINE_TEST_PROVIDER_KEY_4"),
            Duration::from_secs(1),
        )
        .unwrap();

        for bad in ["x/../../other-endpoint?", "gpt-4?alt=sse", "a#b", "..", "gpt 4", ""] {
            let err = p.resolve_model(Some(bad), None, false).unwrap_err();
            assert_eq!(err.code(), crate::ErrorCode::InvalidVariables, "{bad}");
            assert_eq!(err.violations()[0].path, "model_name");
        }
        // fine-tuned identifiers keep working
        let tuned = p
            .resolve_model(Some("ft:gpt-3.5-turbo:acme:custom_1"), None, false)
            .unwrap();
        assert!(!tuned.known);
    }

    #[test]
    fn test_cost_uses_fallback_for_unknown_model() {
        std::env::set_var("PROMPT_ENGINE_TEST_PROVIDER_KEY_3", "sk");
        let p = Provider::from_descriptor(
            &descriptor("PROMPT_ENGINE_TEST_PROVIDER_KEY_3"),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(p.calculate_cost(1000, "gpt-4"), 0.0375);
        assert_eq!(p.calculate_cost(1000, "mystery"), 0.0375);
        assert!(p.estimate_cost(1000, "mystery").fallback_used);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
