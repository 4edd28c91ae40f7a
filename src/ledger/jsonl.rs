use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    ExecutionLedger, ExecutionOutcome, ExecutionRecord, InMemoryLedger, LedgerError, LedgerQuery,
    NewExecution, Pagination,
};
use crate::ExecutionId;

/// One line of the journal.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JournalEvent {
    Created {
        record: ExecutionRecord,
    },
    Completed {
        id: ExecutionId,
        completed_at: DateTime<Utc>,
        outcome: ExecutionOutcome,
    },
}

/// Append-only JSON-lines ledger.
///
/// Every creation and terminal transition is appended as one line; opening
/// the file replays the journal into an in-memory index that serves reads.
/// Lines are never rewritten.
pub struct JsonlLedger {
    path: PathBuf,
    index: InMemoryLedger,
    file: Mutex<File>,
}

impl JsonlLedger {
    /// Open (or create) the journal at `path` and replay it.
    ///
    /// A final line that does not parse is the remains of an interrupted
    /// append: it is dropped and the file truncated before it. Corruption
    /// anywhere else is a storage error.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let index = InMemoryLedger::new();
        let mut needs_newline = false;

        if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read(&path).await?;
            let lines: Vec<&[u8]> = contents.split_inclusive(|b| *b == b'\n').collect();
            let last = lines.iter().rposition(|l| !is_blank(l));
            let mut offset = 0usize;
            let mut replayed = 0usize;
            let mut keep_len = None;
            for (lineno, raw) in lines.iter().enumerate() {
                let start = offset;
                offset += raw.len();
                if is_blank(raw) {
                    continue;
                }
                let event: JournalEvent = match serde_json::from_slice(raw) {
                    Ok(event) => event,
                    Err(e) if Some(lineno) == last => {
                        warn!(
                            path = %path.display(),
                            line = lineno + 1,
                            error = %e,
                            "dropping incomplete final journal line"
                        );
                        keep_len = Some(start);
                        break;
                    }
                    Err(e) => {
                        return Err(LedgerError::Storage(format!(
                            "corrupt journal line {} in {}: {}",
                            lineno + 1,
                            path.display(),
                            e
                        )))
                    }
                };
                match event {
                    JournalEvent::Created { record } => index.restore(record).await,
                    JournalEvent::Completed {
                        id,
                        completed_at,
                        outcome,
                    } => {
                        index.apply_terminal(id, outcome, completed_at).await?;
                    }
                }
                replayed += 1;
            }
            info!(path = %path.display(), events = replayed, "replayed execution journal");

            let kept = &contents[..keep_len.unwrap_or(contents.len())];
            if let Some(len) = keep_len {
                let file = OpenOptions::new().write(true).open(&path).await?;
                file.set_len(len as u64).await?;
            }
            // an unterminated last event must not swallow the next append
            needs_newline = kept.last().map_or(false, |b| *b != b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if needs_newline {
            file.write_all(b"\n").await?;
            file.flush().await?;
        }

        Ok(Self {
            path,
            index,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &JournalEvent) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

#[async_trait]
impl ExecutionLedger for JsonlLedger {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn create(&self, new: NewExecution) -> Result<ExecutionId, LedgerError> {
        let record = self.index.insert_new(new, Utc::now()).await;
        let id = record.id;
        if let Err(e) = self.append(&JournalEvent::Created { record }).await {
            self.index.remove(id).await;
            return Err(e);
        }
        debug!(execution_id = id, "journaled execution record");
        Ok(id)
    }

    async fn update_terminal(
        &self,
        id: ExecutionId,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord, LedgerError> {
        let completed_at = Utc::now();
        // The record stays locked until the journal has the transition, so the
        // index never shows an outcome that a reopen would not replay.
        let mut record = self.index.lock_record(id).await?;
        let mut next = record.clone();
        if next.apply(outcome.clone(), completed_at)? {
            self.append(&JournalEvent::Completed {
                id,
                completed_at,
                outcome,
            })
            .await?;
            *record = next;
        }
        Ok(record.clone())
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, LedgerError> {
        self.index.get(id).await
    }

    async fn list(
        &self,
        query: &LedgerQuery,
        page: Pagination,
    ) -> Result<Vec<ExecutionRecord>, LedgerError> {
        self.index.list(query, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ExecutionStatus;
    use crate::schema::Variables;

    fn pending() -> NewExecution {
        NewExecution {
            prompt_id: 1,
            caller_id: 1,
            variables: Variables::new(),
            provider_name: "openai".into(),
            model_name: "gpt-4".into(),
            outcome: None,
        }
    }

    fn success() -> ExecutionOutcome {
        ExecutionOutcome::Success {
            output: "ok".into(),
            tokens_used: 10,
            cost_usd: 0.0004,
            duration_seconds: 0.2,
        }
    }

    #[tokio::test]
    async fn test_failed_append_leaves_record_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let ledger = JsonlLedger::open(&path).await.unwrap();
        let id = ledger.create(pending()).await.unwrap();

        // swap in a read-only handle so the next append fails
        let writable = std::mem::replace(
            &mut *ledger.file.lock().await,
            File::open(&path).await.unwrap(),
        );
        assert!(ledger.update_terminal(id, success()).await.is_err());
        let record = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Pending);
        assert!(record.completed_at.is_none());

        *ledger.file.lock().await = writable;
        let record = ledger.update_terminal(id, success()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Success);
        drop(ledger);

        let reopened = JsonlLedger::open(&path).await.unwrap();
        assert_eq!(
            reopened.get(id).await.unwrap().unwrap().status,
            ExecutionStatus::Success
        );
    }
}
