//! # prompt-engine
//!
//! 专家提示词执行编排引擎：变量校验与补全、多厂商模型调用、成本归一化与可审计的执行账本。
//!
//! Prompt execution orchestration engine. Takes a stored prompt template,
//! validates and enriches caller variables against the template's JSON
//! Schema, renders the prompt, dispatches it to one of several LLM vendors,
//! prices the result in USD and records every attempt in an execution ledger.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prompt_engine::{ExecutionEngine, ExecutionRequest, InMemoryPromptCatalog, PromptTemplate};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> prompt_engine::Result<()> {
//!     let catalog = InMemoryPromptCatalog::new().with_template(
//!         PromptTemplate::new(1, "Summary", "Summarize {text} in a {tone} tone.").with_schema(json!({
//!             "type": "object",
//!             "properties": {
//!                 "text": {"type": "string"},
//!                 "tone": {"type": "string", "enum": ["formal", "casual"], "default": "formal"}
//!             },
//!             "required": ["text"]
//!         })),
//!     )?;
//!
//!     let engine = ExecutionEngine::builder()
//!         .catalog(Arc::new(catalog))
//!         .build()?;
//!
//!     let response = engine
//!         .execute(ExecutionRequest::new(1, 42).variable("text", "the release notes"))
//!         .await?;
//!     println!("{} (${})", response.output, response.cost_usd);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`schema`] | Variable schemas, validation with defaults, example generation |
//! | [`template`] | Prompt templates and placeholder rendering |
//! | [`catalog`] | Template lookup |
//! | [`provider`] | Provider catalog, credential resolution, vendor calls |
//! | [`drivers`] | Vendor wire formats (OpenAI, Gemini, Claude) |
//! | [`transport`] | HTTP transport |
//! | [`tokens`] | Token counting and cost normalization |
//! | [`orchestrator`] | The execution engine |
//! | [`ledger`] | Execution records (in-memory and JSONL journal) |
//! | [`telemetry`] | Execution metrics |
//! | [`config`] | Engine settings |

pub mod catalog;
pub mod config;
pub mod drivers;
pub mod error_code;
pub mod ledger;
pub mod orchestrator;
pub mod provider;
pub mod schema;
pub mod telemetry;
pub mod template;
pub mod tokens;
pub mod transport;

// Re-export main types for convenience
pub use catalog::{InMemoryPromptCatalog, PromptCatalog};
pub use config::{EngineConfig, Settings};
pub use error_code::ErrorCode;
pub use ledger::{
    ExecutionLedger, ExecutionRecord, ExecutionStatus, InMemoryLedger, JsonlLedger, LedgerQuery,
    Pagination,
};
pub use orchestrator::{
    ExecutionEngine, ExecutionEngineBuilder, ExecutionHandle, ExecutionRequest, ExecutionResponse,
};
pub use provider::{ModelDescriptor, ProviderDescriptor, ProviderKind, ProviderRegistry};
pub use schema::{validate_and_enrich, VariableSchema, Variables};
pub use telemetry::ExecutionMetrics;
pub use template::PromptTemplate;

/// Identifier of a stored prompt template.
pub type PromptId = u64;

/// Identifier of the authenticated caller on whose behalf an execution runs.
pub type CallerId = u64;

/// Identifier of an execution record, assigned by the ledger.
pub type ExecutionId = u64;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ExecutionFailure};
