use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::time::Duration;

use super::{Provider, ProviderKind};
use crate::error::{Error, ErrorContext};
use crate::tokens::ModelPricing;
use crate::Result;

fn default_true() -> bool {
    true
}

/// One model offered by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Catalog name callers may request.
    pub name: String,
    /// Identifier sent to the vendor.
    pub model_identifier: String,
    /// Output token budget; requests above it are clamped.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// USD per thousand input tokens; absent means free.
    #[serde(default)]
    pub input_price: Option<f64>,
    /// USD per thousand output tokens; absent means free.
    #[serde(default)]
    pub output_price: Option<f64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl ModelDescriptor {
    /// A model whose catalog name equals its vendor identifier.
    pub fn priced(identifier: &str, input_price: f64, output_price: f64) -> Self {
        Self {
            name: identifier.to_string(),
            model_identifier: identifier.to_string(),
            max_tokens: None,
            input_price: Some(input_price),
            output_price: Some(output_price),
            active: true,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn is_priced(&self) -> bool {
        self.input_price.is_some() && self.output_price.is_some()
    }

    pub fn pricing(&self) -> ModelPricing {
        ModelPricing::new(
            &self.model_identifier,
            self.input_price.unwrap_or(0.0),
            self.output_price.unwrap_or(0.0),
        )
    }
}

/// Configuration of one vendor integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Environment variable holding the credential; defaults per kind.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Overrides the vendor's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    pub default_model: String,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

impl ProviderDescriptor {
    pub fn credential_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_key_env())
    }

    pub fn default_model_descriptor(&self) -> Option<&ModelDescriptor> {
        self.models
            .iter()
            .find(|m| m.name == self.default_model || m.model_identifier == self.default_model)
    }

    pub fn openai() -> Self {
        Self {
            name: "openai".into(),
            kind: ProviderKind::OpenAi,
            active: true,
            api_key_env: None,
            base_url: None,
            default_model: "gpt-4".into(),
            models: vec![
                ModelDescriptor::priced("gpt-4", 0.03, 0.06).with_max_tokens(8192),
                ModelDescriptor::priced("gpt-4-turbo", 0.01, 0.03).with_max_tokens(4096),
                ModelDescriptor::priced("gpt-3.5-turbo", 0.0005, 0.0015).with_max_tokens(4096),
            ],
        }
    }

    pub fn gemini() -> Self {
        Self {
            name: "gemini".into(),
            kind: ProviderKind::Gemini,
            active: true,
            api_key_env: None,
            base_url: None,
            default_model: "gemini-pro".into(),
            models: vec![
                ModelDescriptor::priced("gemini-pro", 0.00025, 0.0005).with_max_tokens(8192),
                ModelDescriptor::priced("gemini-2.5-flash", 0.000075, 0.0003)
                    .with_max_tokens(65536),
            ],
        }
    }

    pub fn claude() -> Self {
        Self {
            name: "claude".into(),
            kind: ProviderKind::Claude,
            active: true,
            api_key_env: None,
            base_url: None,
            default_model: "claude-3-sonnet-20240229".into(),
            models: vec![
                ModelDescriptor::priced("claude-3-opus-20240229", 0.015, 0.075)
                    .with_max_tokens(4096),
                ModelDescriptor::priced("claude-3-sonnet-20240229", 0.003, 0.015)
                    .with_max_tokens(4096),
                ModelDescriptor::priced("claude-3-haiku-20240307", 0.00025, 0.00125)
                    .with_max_tokens(4096),
            ],
        }
    }

    fn validate(&self) -> Result<()> {
        let ctx = |field: &str| {
            ErrorContext::new()
                .with_field_path(format!("providers.{}.{}", self.name, field))
                .with_source("provider_registry")
        };

        if self.name.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "provider name must not be empty",
                ErrorContext::new()
                    .with_field_path("providers[].name")
                    .with_source("provider_registry"),
            ));
        }

        if let Some(base_url) = &self.base_url {
            let parsed = url::Url::parse(base_url).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid base_url '{}': {}", base_url, e),
                    ctx("base_url"),
                )
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::configuration_with_context(
                    format!("base_url '{}' must use http or https", base_url),
                    ctx("base_url"),
                ));
            }
        }

        let mut identifiers = HashSet::new();
        for model in &self.models {
            if !identifiers.insert(model.model_identifier.as_str()) {
                return Err(Error::configuration_with_context(
                    format!(
                        "model identifier '{}' is declared twice for provider '{}'",
                        model.model_identifier, self.name
                    ),
                    ctx("models"),
                ));
            }
        }

        match self.default_model_descriptor() {
            None => Err(Error::configuration_with_context(
                format!("default model '{}' is not among the declared models", self.default_model),
                ctx("default_model"),
            )),
            Some(m) if !m.active => Err(Error::configuration_with_context(
                format!("default model '{}' is inactive", self.default_model),
                ctx("default_model").with_details("activate it or choose another default_model"),
            )),
            Some(m) if !m.is_priced() => Err(Error::configuration_with_context(
                format!(
                    "default model '{}' has no pricing; it prices unknown models",
                    self.default_model
                ),
                ctx("default_model").with_details("set input_price and output_price"),
            )),
            Some(_) => Ok(()),
        }
    }
}

/// Named provider catalog.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// OpenAI, Gemini and Claude with their public endpoints and prices.
    pub fn with_defaults() -> Self {
        let mut providers = BTreeMap::new();
        for d in [
            ProviderDescriptor::openai(),
            ProviderDescriptor::gemini(),
            ProviderDescriptor::claude(),
        ] {
            providers.insert(d.name.clone(), d);
        }
        Self { providers }
    }

    pub fn from_descriptors(descriptors: Vec<ProviderDescriptor>) -> Result<Self> {
        let mut registry = Self::new();
        for d in descriptors {
            registry.register(d)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: ProviderDescriptor) -> Result<()> {
        descriptor.validate()?;
        if self.providers.contains_key(&descriptor.name) {
            return Err(Error::configuration_with_context(
                format!("provider '{}' is already registered", descriptor.name),
                ErrorContext::new()
                    .with_field_path(format!("providers.{}", descriptor.name))
                    .with_source("provider_registry"),
            ));
        }
        self.providers.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Active provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.providers
            .values()
            .filter(|d| d.active)
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.get(name).map_or(false, |d| d.active)
    }

    /// The active descriptor named `name`.
    pub fn descriptor(&self, name: &str) -> Result<&ProviderDescriptor> {
        self.providers
            .get(name)
            .filter(|d| d.active)
            .ok_or_else(|| Error::UnknownProvider {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Construct the provider named `name`; fails on unknown names and
    /// missing credentials.
    pub fn resolve(&self, name: &str, timeout: Duration) -> Result<Provider> {
        Provider::from_descriptor(self.descriptor(name)?, timeout)
    }
}
