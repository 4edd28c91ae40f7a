//! 执行账本：记录每一次执行尝试的请求、输出、成本、耗时与状态。
//!
//! # Execution Ledger
//!
//! Append-only history of execution attempts. A record is created either in
//! `pending` state (asynchronous dispatch) or directly in a terminal state
//! (synchronous dispatch), and is moved to a terminal state at most once.
//!
//! ## Terminal status rule
//!
//! - `pending -> success | error` is the only permitted transition.
//! - Writing the terminal status a record already has is a no-op.
//! - Writing a *different* terminal status fails with
//!   [`LedgerError::TerminalConflict`].
//!
//! Backends must serialize writes per execution id, never across ids.
//!
//! | Backend | Description |
//! |---------|-------------|
//! | [`InMemoryLedger`] | Process-local map, the default |
//! | [`JsonlLedger`] | Append-only JSON-lines journal replayed on open |

mod jsonl;
mod memory;

pub use jsonl::JsonlLedger;
pub use memory::InMemoryLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::schema::Variables;
use crate::{CallerId, ExecutionId, PromptId};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Execution {0} not found")]
    NotFound(ExecutionId),

    #[error("Execution {id} is already '{current}'; refusing to overwrite with '{attempted}'")]
    TerminalConflict {
        id: ExecutionId,
        current: ExecutionStatus,
        attempted: ExecutionStatus,
    },

    #[error("Ledger storage error: {0}")]
    Storage(String),

    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "success" => Ok(ExecutionStatus::Success),
            "error" => Ok(ExecutionStatus::Error),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// One persisted execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub prompt_id: PromptId,
    pub caller_id: CallerId,
    /// Enriched variables actually used for rendering.
    pub variables: Variables,
    pub output: Option<String>,
    pub provider_name: String,
    pub model_name: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_seconds: f64,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub(crate) fn from_new(id: ExecutionId, new: NewExecution, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            id,
            prompt_id: new.prompt_id,
            caller_id: new.caller_id,
            variables: new.variables,
            output: None,
            provider_name: new.provider_name,
            model_name: new.model_name,
            tokens_used: 0,
            cost_usd: 0.0,
            duration_seconds: 0.0,
            status: ExecutionStatus::Pending,
            error_message: None,
            created_at: now,
            completed_at: None,
        };
        if let Some(outcome) = new.outcome {
            record.fill(outcome, now);
        }
        record
    }

    /// Move to the terminal state described by `outcome`.
    ///
    /// Returns `Ok(false)` when the record already holds that terminal status.
    pub(crate) fn apply(
        &mut self,
        outcome: ExecutionOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let attempted = outcome.status();
        if self.status.is_terminal() {
            if self.status == attempted {
                return Ok(false);
            }
            return Err(LedgerError::TerminalConflict {
                id: self.id,
                current: self.status,
                attempted,
            });
        }
        self.fill(outcome, at);
        Ok(true)
    }

    fn fill(&mut self, outcome: ExecutionOutcome, at: DateTime<Utc>) {
        match outcome {
            ExecutionOutcome::Success {
                output,
                tokens_used,
                cost_usd,
                duration_seconds,
            } => {
                self.status = ExecutionStatus::Success;
                self.output = Some(output);
                self.tokens_used = tokens_used;
                self.cost_usd = cost_usd;
                self.duration_seconds = duration_seconds;
                self.error_message = None;
            }
            ExecutionOutcome::Failure {
                error_message,
                duration_seconds,
            } => {
                self.status = ExecutionStatus::Error;
                self.output = None;
                self.tokens_used = 0;
                self.cost_usd = 0.0;
                self.duration_seconds = duration_seconds;
                self.error_message = Some(error_message);
            }
        }
        self.completed_at = Some(at);
    }
}

/// Input to [`ExecutionLedger::create`].
///
/// `outcome: None` opens the record in `pending` state.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub prompt_id: PromptId,
    pub caller_id: CallerId,
    pub variables: Variables,
    pub provider_name: String,
    pub model_name: String,
    pub outcome: Option<ExecutionOutcome>,
}

/// Terminal result written to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success {
        output: String,
        tokens_used: u64,
        cost_usd: f64,
        duration_seconds: f64,
    },
    #[serde(rename = "error")]
    Failure {
        error_message: String,
        duration_seconds: f64,
    },
}

impl ExecutionOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Success { .. } => ExecutionStatus::Success,
            ExecutionOutcome::Failure { .. } => ExecutionStatus::Error,
        }
    }
}

/// Filters for [`ExecutionLedger::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub caller_id: Option<CallerId>,
    pub prompt_id: Option<PromptId>,
    pub status: Option<ExecutionStatus>,
}

impl LedgerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn caller(mut self, caller_id: CallerId) -> Self {
        self.caller_id = Some(caller_id);
        self
    }

    pub fn prompt(mut self, prompt_id: PromptId) -> Self {
        self.prompt_id = Some(prompt_id);
        self
    }

    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        self.caller_id.map_or(true, |c| record.caller_id == c)
            && self.prompt_id.map_or(true, |p| record.prompt_id == p)
            && self.status.map_or(true, |s| record.status == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub skip: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
        }
    }
}

impl Pagination {
    pub fn new(skip: usize, limit: usize) -> Self {
        Self { skip, limit }
    }
}

/// Newest first (creation time, then id), then the requested page.
pub(crate) fn order_and_page(
    mut records: Vec<ExecutionRecord>,
    page: Pagination,
) -> Vec<ExecutionRecord> {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    records.into_iter().skip(page.skip).take(page.limit).collect()
}

/// Persistence seam for execution records.
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn create(&self, new: NewExecution) -> Result<ExecutionId, LedgerError>;

    /// Move a pending record to its terminal state and return the result.
    async fn update_terminal(
        &self,
        id: ExecutionId,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord, LedgerError>;

    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, LedgerError>;

    async fn list(
        &self,
        query: &LedgerQuery,
        page: Pagination,
    ) -> Result<Vec<ExecutionRecord>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> ExecutionRecord {
        ExecutionRecord::from_new(
            7,
            NewExecution {
                prompt_id: 1,
                caller_id: 2,
                variables: Variables::new(),
                provider_name: "openai".into(),
                model_name: "gpt-4".into(),
                outcome: None,
            },
            Utc::now(),
        )
    }

    fn success() -> ExecutionOutcome {
        ExecutionOutcome::Success {
            output: "done".into(),
            tokens_used: 10,
            cost_usd: 0.0003,
            duration_seconds: 0.5,
        }
    }

    #[test]
    fn test_pending_to_success() {
        let mut r = pending();
        assert_eq!(r.status, ExecutionStatus::Pending);
        assert!(r.apply(success(), Utc::now()).unwrap());
        assert_eq!(r.status, ExecutionStatus::Success);
        assert_eq!(r.output.as_deref(), Some("done"));
        assert!(r.completed_at.is_some());
    }

    #[test]
    fn test_same_terminal_status_is_noop() {
        let mut r = pending();
        r.apply(success(), Utc::now()).unwrap();
        let again = ExecutionOutcome::Success {
            output: "other".into(),
            tokens_used: 99,
            cost_usd: 1.0,
            duration_seconds: 9.0,
        };
        assert!(!r.apply(again, Utc::now()).unwrap());
        assert_eq!(r.output.as_deref(), Some("done"));
        assert_eq!(r.tokens_used, 10);
    }

    #[test]
    fn test_different_terminal_status_conflicts() {
        let mut r = pending();
        r.apply(success(), Utc::now()).unwrap();
        let err = r
            .apply(
                ExecutionOutcome::Failure {
                    error_message: "late".into(),
                    duration_seconds: 1.0,
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::TerminalConflict {
                id: 7,
                current: ExecutionStatus::Success,
                attempted: ExecutionStatus::Error
            }
        ));
    }

    #[test]
    fn test_failure_zeroes_usage() {
        let mut r = pending();
        r.apply(
            ExecutionOutcome::Failure {
                error_message: "vendor down".into(),
                duration_seconds: 2.5,
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(r.status, ExecutionStatus::Error);
        assert_eq!(r.tokens_used, 0);
        assert_eq!(r.cost_usd, 0.0);
        assert_eq!(r.duration_seconds, 2.5);
        assert_eq!(r.error_message.as_deref(), Some("vendor down"));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ExecutionOutcome::Failure {
            error_message: "x".into(),
            duration_seconds: 0.0,
        })
        .unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!("SUCCESS".parse::<ExecutionStatus>(), Ok(ExecutionStatus::Success));
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_query_matching() {
        let r = pending();
        assert!(LedgerQuery::new().matches(&r));
        assert!(LedgerQuery::new().caller(2).prompt(1).matches(&r));
        assert!(!LedgerQuery::new().caller(3).matches(&r));
        assert!(!LedgerQuery::new().status(ExecutionStatus::Error).matches(&r));
    }
}
