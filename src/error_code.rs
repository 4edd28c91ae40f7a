//! 标准错误码：为执行引擎的每类错误定义稳定的错误码与 HTTP 语义。
//!
//! Standard error codes for the execution engine.
//!
//! Every [`crate::Error`] maps to exactly one [`ErrorCode`], which carries the
//! HTTP-equivalent status an outer API layer should answer with, a stable
//! machine-readable code, and an advisory `retryable` flag. The engine itself
//! never retries; the flag is for callers and external supervisors.
//!
//! ## Error Code Categories
//!
//! | Prefix | Category      | Description                                   |
//! |--------|---------------|-----------------------------------------------|
//! | E1xxx  | client        | Caller-correctable request problems           |
//! | E2xxx  | configuration | Provider/model catalog or credential problems |
//! | E3xxx  | vendor        | The LLM vendor call failed or timed out       |
//! | E4xxx  | operational   | Ledger state conflicts and storage failures   |
//! | E9xxx  | unknown       | Catch-all                                     |
//!
//! ## Example
//!
//! ```rust
//! use prompt_engine::error_code::ErrorCode;
//!
//! let code = ErrorCode::from_vendor_status(429);
//! assert_eq!(code.code(), "E3002");
//! assert!(code.retryable());
//! assert_eq!(code.http_status(), 500);
//! ```

use std::fmt;

/// Stable error code for every failure the engine can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// E1001: Variables failed schema validation, or request parameters are out of range
    InvalidVariables,
    /// E1002: Template references a variable that is absent after enrichment
    MissingVariable,
    /// E1003: Prompt template or execution record does not exist
    NotFound,
    /// E1004: Requested provider is not configured or inactive
    UnknownProvider,
    /// E1005: Requested model is not configured for the provider (strict mode only)
    UnknownModel,
    /// E2001: Provider credential is absent from the process environment
    MissingCredential,
    /// E2002: Catalog or engine configuration is inconsistent
    Configuration,
    /// E3001: Vendor call failed (transport error or non-retryable vendor status)
    ExecutionFailed,
    /// E3002: Vendor rejected the call for rate or quota reasons
    RateLimited,
    /// E3003: Vendor reported a server-side failure
    VendorUnavailable,
    /// E3004: Vendor call exceeded the configured timeout
    Timeout,
    /// E3005: Vendor answered with a body the driver could not interpret
    MalformedResponse,
    /// E4001: Attempt to overwrite a terminal execution status with a different one
    LedgerConflict,
    /// E4002: Ledger storage failed
    LedgerStorage,
    /// E9999: Error could not be classified
    Unknown,
}

impl ErrorCode {
    /// Returns the canonical code string (e.g., `"E1001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidVariables => "E1001",
            Self::MissingVariable => "E1002",
            Self::NotFound => "E1003",
            Self::UnknownProvider => "E1004",
            Self::UnknownModel => "E1005",
            Self::MissingCredential => "E2001",
            Self::Configuration => "E2002",
            Self::ExecutionFailed => "E3001",
            Self::RateLimited => "E3002",
            Self::VendorUnavailable => "E3003",
            Self::Timeout => "E3004",
            Self::MalformedResponse => "E3005",
            Self::LedgerConflict => "E4001",
            Self::LedgerStorage => "E4002",
            Self::Unknown => "E9999",
        }
    }

    /// Returns the standard name (e.g., `"invalid_variables"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidVariables => "invalid_variables",
            Self::MissingVariable => "missing_variable",
            Self::NotFound => "not_found",
            Self::UnknownProvider => "unknown_provider",
            Self::UnknownModel => "unknown_model",
            Self::MissingCredential => "missing_credential",
            Self::Configuration => "configuration",
            Self::ExecutionFailed => "execution_failed",
            Self::RateLimited => "rate_limited",
            Self::VendorUnavailable => "vendor_unavailable",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed_response",
            Self::LedgerConflict => "ledger_conflict",
            Self::LedgerStorage => "ledger_storage",
            Self::Unknown => "unknown",
        }
    }

    /// HTTP-equivalent status for an outer API layer.
    #[inline]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidVariables
            | Self::MissingVariable
            | Self::UnknownProvider
            | Self::UnknownModel => 400,
            Self::NotFound => 404,
            Self::LedgerConflict => 409,
            // a timed-out vendor call is an execution failure like any other
            Self::Timeout
            | Self::MissingCredential
            | Self::Configuration
            | Self::ExecutionFailed
            | Self::RateLimited
            | Self::VendorUnavailable
            | Self::MalformedResponse
            | Self::LedgerStorage
            | Self::Unknown => 500,
        }
    }

    /// Whether a caller may reasonably retry with a new request.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::VendorUnavailable | Self::Timeout | Self::ExecutionFailed
        )
    }

    /// Returns the category: `"client"`, `"configuration"`, `"vendor"`, `"operational"` or `"unknown"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidVariables
            | Self::MissingVariable
            | Self::NotFound
            | Self::UnknownProvider
            | Self::UnknownModel => "client",
            Self::MissingCredential | Self::Configuration => "configuration",
            Self::ExecutionFailed
            | Self::RateLimited
            | Self::VendorUnavailable
            | Self::Timeout
            | Self::MalformedResponse => "vendor",
            Self::LedgerConflict | Self::LedgerStorage => "operational",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a vendor HTTP status to the most likely code.
    pub fn from_vendor_status(status: u16) -> Self {
        match status {
            408 | 504 => Self::Timeout,
            429 => Self::RateLimited,
            500..=599 => Self::VendorUnavailable,
            _ => Self::ExecutionFailed,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_status_mapping() {
        assert_eq!(ErrorCode::from_vendor_status(429), ErrorCode::RateLimited);
        assert_eq!(ErrorCode::from_vendor_status(503), ErrorCode::VendorUnavailable);
        assert_eq!(ErrorCode::from_vendor_status(504), ErrorCode::Timeout);
        assert_eq!(ErrorCode::from_vendor_status(401), ErrorCode::ExecutionFailed);
    }

    #[test]
    fn test_client_errors_are_400_and_not_retryable() {
        for code in [
            ErrorCode::InvalidVariables,
            ErrorCode::MissingVariable,
            ErrorCode::UnknownProvider,
            ErrorCode::UnknownModel,
        ] {
            assert_eq!(code.http_status(), 400, "{}", code.name());
            assert!(!code.retryable(), "{}", code.name());
            assert_eq!(code.category(), "client");
        }
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
    }

    #[test]
    fn test_execution_failures_are_500() {
        for code in [
            ErrorCode::ExecutionFailed,
            ErrorCode::RateLimited,
            ErrorCode::VendorUnavailable,
            ErrorCode::Timeout,
            ErrorCode::MalformedResponse,
        ] {
            assert_eq!(code.http_status(), 500, "{}", code.name());
        }
    }

    #[test]
    fn test_display_uses_code() {
        assert_eq!(ErrorCode::LedgerConflict.to_string(), "E4001");
        assert_eq!(ErrorCode::LedgerConflict.http_status(), 409);
    }
}
