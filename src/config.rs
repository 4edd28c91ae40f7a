//! 配置：引擎默认值、环境变量覆盖与 YAML 设置文件。
//!
//! Engine configuration.
//!
//! [`EngineConfig`] holds the defaulting rules applied to every request.
//! [`Settings`] is the YAML document the CLI (or a host service) loads:
//!
//! ```yaml
//! engine:
//!   default_provider: openai
//!   request_timeout_secs: 30
//! providers:
//!   - name: openai
//!     kind: openai
//!     default_model: gpt-4
//!     models:
//!       - { name: gpt-4, model_identifier: gpt-4, input_price: 0.03, output_price: 0.06 }
//! ```
//!
//! An empty `providers` list selects the built-in OpenAI, Gemini and Claude
//! catalog.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, ErrorContext};
use crate::provider::{ProviderDescriptor, ProviderRegistry};
use crate::Result;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_batch_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Provider used when a request names none.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Temperature used when a request specifies none.
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
    /// Upper bound on each vendor call.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Reject models missing from the catalog instead of passing them through.
    #[serde(default)]
    pub strict_models: bool,
    /// Concurrent executions in one batch.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_temperature: default_temperature(),
            request_timeout_secs: default_timeout_secs(),
            strict_models: false,
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `PROMPT_ENGINE_*` environment variables.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(p) = env::var("PROMPT_ENGINE_DEFAULT_PROVIDER") {
            if !p.trim().is_empty() {
                self.default_provider = p.trim().to_string();
            }
        }
        if let Some(t) = env::var("PROMPT_ENGINE_DEFAULT_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
        {
            self.default_temperature = t;
        }
        if let Some(t) = env::var("PROMPT_ENGINE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.request_timeout_secs = t;
        }
        if let Ok(s) = env::var("PROMPT_ENGINE_STRICT_MODELS") {
            self.strict_models = matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(n) = env::var("PROMPT_ENGINE_BATCH_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            self.batch_concurrency = n;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let ctx = |field: &str| {
            ErrorContext::new()
                .with_field_path(format!("engine.{}", field))
                .with_source("settings")
        };
        if !(0.0..=1.0).contains(&self.default_temperature) {
            return Err(Error::configuration_with_context(
                format!(
                    "default_temperature {} is outside [0, 1]",
                    self.default_temperature
                ),
                ctx("default_temperature"),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::configuration_with_context(
                "request_timeout_secs must be positive",
                ctx("request_timeout_secs"),
            ));
        }
        if self.batch_concurrency == 0 {
            return Err(Error::configuration_with_context(
                "batch_concurrency must be positive",
                ctx("batch_concurrency"),
            ));
        }
        Ok(())
    }
}

/// Top-level settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read settings: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("settings"),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut settings: Settings = serde_yaml::from_str(text)?;
        settings.engine = settings.engine.with_env_overrides();
        settings.engine.validate()?;
        Ok(settings)
    }

    /// Registry for the configured providers, or the built-in catalog.
    pub fn provider_registry(&self) -> Result<ProviderRegistry> {
        if self.providers.is_empty() {
            Ok(ProviderRegistry::with_defaults())
        } else {
            ProviderRegistry::from_descriptors(self.providers.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.default_provider, "openai");
        assert_eq!(c.default_temperature, 0.7);
        assert_eq!(c.request_timeout(), Duration::from_secs(60));
        assert!(!c.strict_models);
        assert_eq!(c.batch_concurrency, 4);
        c.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let s = Settings::from_yaml_str("engine:\n  request_timeout_secs: 5\n").unwrap();
        assert_eq!(s.engine.request_timeout_secs, 5);
        assert_eq!(s.engine.default_temperature, 0.7);
        let registry = s.provider_registry().unwrap();
        assert_eq!(registry.names(), vec!["claude", "gemini", "openai"]);
    }

    #[test]
    fn test_custom_providers_replace_builtins() {
        let yaml = r#"
engine:
  default_provider: local
providers:
  - name: local
    kind: openai
    base_url: http://localhost:11434/v1
    api_key_env: LOCAL_LLM_KEY
    default_model: llama
    models:
      - name: llama
        model_identifier: llama3
        input_price: 0.0
        output_price: 0.0
"#;
        let s = Settings::from_yaml_str(yaml).unwrap();
        let registry = s.provider_registry().unwrap();
        assert_eq!(registry.names(), vec!["local"]);
        assert_eq!(registry.descriptor("local").unwrap().credential_env(), "LOCAL_LLM_KEY");
    }

    #[test]
    fn test_out_of_range_temperature_rejected() {
        let err = Settings::from_yaml_str("engine:\n  default_temperature: 1.5\n").unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("engine.default_temperature")
        );
    }
}
