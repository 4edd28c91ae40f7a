//! 传输层：封装对 LLM 厂商的 HTTP 调用。
//!
//! HTTP transport for vendor calls.

pub mod http;

pub use http::HttpTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vendor returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode vendor response: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout(),
            TransportError::Status { status, .. } => matches!(status, 408 | 504),
            _ => false,
        }
    }
}
