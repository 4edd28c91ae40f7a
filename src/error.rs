use crate::error_code::ErrorCode;
use crate::ledger::LedgerError;
use crate::schema::SchemaViolation;
use thiserror::Error;

/// Structured error context for configuration problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "providers[0].default_model")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected value)
    pub details: Option<String>,
    /// Source of the error (e.g., "provider_registry", "settings")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a vendor call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// Connection, TLS or body transfer failure.
    Transport,
    /// Vendor answered with a non-success HTTP status.
    Vendor { status: u16 },
    /// The configured timeout elapsed before the vendor answered.
    Timeout,
    /// The vendor answered 2xx but the body lacked the expected fields.
    MalformedResponse,
    /// The background task running the call was cancelled or panicked.
    Aborted,
}

/// Unified error type for the execution engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Variable validation failed:\n{}", format_violations(.violations))]
    Validation { violations: Vec<SchemaViolation> },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Unknown LLM provider: {name}. Available providers: {}", .available.join(", "))]
    UnknownProvider { name: String, available: Vec<String> },

    #[error("Unknown model '{model}' for provider '{provider}'. Available models: {}", .available.join(", "))]
    UnknownModel {
        provider: String,
        model: String,
        available: Vec<String>,
    },

    #[error("{env_var} environment variable not set (required by provider '{provider}')")]
    MissingCredential { provider: String, env_var: String },

    #[error("Missing variable in template: '{name}'")]
    MissingVariable { name: String },

    #[error("Execution failed ({provider}): {message}")]
    Execution {
        provider: String,
        message: String,
        failure: ExecutionFailure,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// A single validation failure, for request parameters outside any schema.
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            violations: vec![SchemaViolation::new(path, message)],
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn execution(
        provider: impl Into<String>,
        failure: ExecutionFailure,
        message: impl Into<String>,
    ) -> Self {
        Error::Execution {
            provider: provider.into(),
            message: message.into(),
            failure,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new())
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Validation violations, when this is a validation error.
    pub fn violations(&self) -> &[SchemaViolation] {
        match self {
            Error::Validation { violations } => violations,
            _ => &[],
        }
    }

    /// Stable classification used by outer layers to pick a status code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation { .. } => ErrorCode::InvalidVariables,
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::UnknownProvider { .. } => ErrorCode::UnknownProvider,
            Error::UnknownModel { .. } => ErrorCode::UnknownModel,
            Error::MissingCredential { .. } => ErrorCode::MissingCredential,
            Error::MissingVariable { .. } => ErrorCode::MissingVariable,
            Error::Execution { failure, .. } => match failure {
                ExecutionFailure::Vendor { status } => ErrorCode::from_vendor_status(*status),
                ExecutionFailure::Timeout => ErrorCode::Timeout,
                ExecutionFailure::MalformedResponse => ErrorCode::MalformedResponse,
                ExecutionFailure::Transport | ExecutionFailure::Aborted => {
                    ErrorCode::ExecutionFailed
                }
            },
            Error::Configuration { .. } | Error::Yaml(_) => ErrorCode::Configuration,
            Error::Ledger(LedgerError::TerminalConflict { .. }) => ErrorCode::LedgerConflict,
            Error::Ledger(LedgerError::NotFound(_)) => ErrorCode::NotFound,
            Error::Ledger(_) | Error::Io(_) => ErrorCode::LedgerStorage,
            Error::Serialization(_) => ErrorCode::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_violation() {
        let err = Error::Validation {
            violations: vec![
                SchemaViolation::new("name", "\"name\" is a required property"),
                SchemaViolation::new("root", "additional properties are not allowed"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Variable validation failed:"));
        assert!(msg.contains("name: \"name\" is a required property"));
        assert!(msg.contains("root: additional properties"));
        assert_eq!(err.code().http_status(), 400);
    }

    #[test]
    fn test_unknown_provider_lists_names() {
        let err = Error::UnknownProvider {
            name: "foo".into(),
            available: vec!["claude".into(), "gemini".into(), "openai".into()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown LLM provider: foo. Available providers: claude, gemini, openai"
        );
    }

    #[test]
    fn test_execution_failure_codes() {
        let timeout = Error::execution("openai", ExecutionFailure::Timeout, "timed out");
        assert_eq!(timeout.code(), ErrorCode::Timeout);
        let vendor = Error::execution("openai", ExecutionFailure::Vendor { status: 503 }, "busy");
        assert_eq!(vendor.code(), ErrorCode::VendorUnavailable);
        assert!(vendor.code().retryable());
    }

    #[test]
    fn test_configuration_context_is_rendered() {
        let err = Error::configuration_with_context(
            "default model has no pricing",
            ErrorContext::new()
                .with_field_path("providers.openai.default_model")
                .with_source("provider_registry"),
        );
        let msg = err.to_string();
        assert!(msg.contains("field: providers.openai.default_model"));
        assert!(msg.contains("source: provider_registry"));
        assert!(err.context().is_some());
    }
}
