use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{
    order_and_page, ExecutionLedger, ExecutionOutcome, ExecutionRecord, LedgerError, LedgerQuery,
    NewExecution, Pagination,
};
use crate::ExecutionId;

/// Process-local ledger.
///
/// The map lock is held only to look up or insert an entry; each record has
/// its own mutex, so writes to different executions never wait on each other.
pub struct InMemoryLedger {
    records: RwLock<HashMap<ExecutionId, Arc<Mutex<ExecutionRecord>>>>,
    next_id: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn entry(&self, id: ExecutionId) -> Result<Arc<Mutex<ExecutionRecord>>, LedgerError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    pub(crate) async fn insert_new(&self, new: NewExecution, now: DateTime<Utc>) -> ExecutionRecord {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = ExecutionRecord::from_new(id, new, now);
        self.records
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(record.clone())));
        record
    }

    /// Put back a record read from durable storage.
    pub(crate) async fn restore(&self, record: ExecutionRecord) {
        self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
        self.records
            .write()
            .await
            .insert(record.id, Arc::new(Mutex::new(record)));
    }

    pub(crate) async fn remove(&self, id: ExecutionId) {
        self.records.write().await.remove(&id);
    }

    /// Hold one record exclusively, e.g. while its transition is persisted.
    pub(crate) async fn lock_record(
        &self,
        id: ExecutionId,
    ) -> Result<OwnedMutexGuard<ExecutionRecord>, LedgerError> {
        Ok(self.entry(id).await?.lock_owned().await)
    }

    /// Apply a terminal outcome; the flag is false when it was a no-op.
    pub(crate) async fn apply_terminal(
        &self,
        id: ExecutionId,
        outcome: ExecutionOutcome,
        at: DateTime<Utc>,
    ) -> Result<(ExecutionRecord, bool), LedgerError> {
        let entry = self.entry(id).await?;
        let mut record = entry.lock().await;
        let changed = record.apply(outcome, at)?;
        Ok((record.clone(), changed))
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionLedger for InMemoryLedger {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, new: NewExecution) -> Result<ExecutionId, LedgerError> {
        Ok(self.insert_new(new, Utc::now()).await.id)
    }

    async fn update_terminal(
        &self,
        id: ExecutionId,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord, LedgerError> {
        self.apply_terminal(id, outcome, Utc::now())
            .await
            .map(|(record, _)| record)
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, LedgerError> {
        let entry = self.records.read().await.get(&id).cloned();
        match entry {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        query: &LedgerQuery,
        page: Pagination,
    ) -> Result<Vec<ExecutionRecord>, LedgerError> {
        let entries: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut matched = Vec::new();
        for entry in entries {
            let record = entry.lock().await;
            if query.matches(&record) {
                matched.push(record.clone());
            }
        }
        Ok(order_and_page(matched, page))
    }
}
