//! In-process [`Storage`](crate::repository::Storage) for development and tests.
//!
//! One mutex guards all three tables, so every operation is a single
//! critical section with the same semantics as the Postgres transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{DecksterError, Result};
use crate::models::{
    FileStatus, GenerationMethod, IngestedFile, KnowledgeStore, LedgerEntry, LedgerOutcome,
    LedgerStats, NewFile,
};
use crate::repository::{
    FileRepository, LedgerRepository, StoreRepository, STALE_PENDING_REASON,
};

#[derive(Debug, Default)]
struct Tables {
    stores: HashMap<String, KnowledgeStore>,
    files: Vec<IngestedFile>,
    ledger: Vec<LedgerEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the ledger, in append order.
    pub async fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.tables.lock().await.ledger.clone()
    }
}

fn fail_pending(file: &mut IngestedFile, reason: &str) {
    file.status = FileStatus::Failed;
    file.failure_reason = Some(reason.to_string());
    file.updated_at = Utc::now();
}

#[async_trait]
impl StoreRepository for MemoryRepository {
    async fn find_store(&self, session_id: &str) -> Result<Option<KnowledgeStore>> {
        Ok(self.tables.lock().await.stores.get(session_id).cloned())
    }

    async fn insert_store_if_absent(&self, store: KnowledgeStore) -> Result<KnowledgeStore> {
        let mut tables = self.tables.lock().await;
        let winner = tables
            .stores
            .entry(store.session_id.clone())
            .or_insert(store);
        Ok(winner.clone())
    }

    async fn increment_file_count(&self, session_id: &str) -> Result<()> {
        if let Some(store) = self.tables.lock().await.stores.get_mut(session_id) {
            store.file_count += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl FileRepository for MemoryRepository {
    async fn reserve_slot(
        &self,
        file: NewFile,
        max_files: u32,
        stale_after: chrono::Duration,
    ) -> Result<IngestedFile> {
        let now = Utc::now();
        let mut tables = self.tables.lock().await;

        let mut current = 0u32;
        for existing in tables.files.iter_mut().filter(|f| f.session_id == file.session_id) {
            if existing.status == FileStatus::Pending && !existing.holds_slot(now, stale_after) {
                tracing::warn!(file_id = %existing.file_id, session_id = %existing.session_id, "Sweeping stale pending file");
                fail_pending(existing, STALE_PENDING_REASON);
            }
            if existing.holds_slot(now, stale_after) {
                current += 1;
            }
        }

        if current >= max_files {
            return Err(DecksterError::SessionFileLimitExceeded { current, max: max_files });
        }

        let record = file.into_pending(now);
        tables.files.push(record.clone());
        Ok(record)
    }

    async fn mark_indexed(&self, file_id: Uuid, external_uri: &str) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables
            .files
            .iter_mut()
            .find(|f| f.file_id == file_id && f.status == FileStatus::Pending)
        {
            Some(file) => {
                file.status = FileStatus::Indexed;
                file.external_uri = Some(external_uri.to_string());
                file.failure_reason = None;
                file.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failed(&self, file_id: Uuid, reason: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(file) = tables
            .files
            .iter_mut()
            .find(|f| f.file_id == file_id && f.status == FileStatus::Pending)
        {
            fail_pending(file, reason);
        }
        Ok(())
    }

    async fn find_file(&self, file_id: Uuid) -> Result<Option<IngestedFile>> {
        let tables = self.tables.lock().await;
        Ok(tables.files.iter().find(|f| f.file_id == file_id).cloned())
    }

    async fn list_files(&self, session_id: &str) -> Result<Vec<IngestedFile>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .files
            .iter()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn indexed_files(&self, session_id: &str) -> Result<Vec<IngestedFile>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .files
            .iter()
            .filter(|f| f.session_id == session_id && f.is_indexed())
            .cloned()
            .collect())
    }

    async fn sweep_stale(&self, stale_after: chrono::Duration) -> Result<u64> {
        let now = Utc::now();
        let mut tables = self.tables.lock().await;
        let mut swept = 0;
        for file in tables
            .files
            .iter_mut()
            .filter(|f| f.status == FileStatus::Pending && !f.holds_slot(now, stale_after))
        {
            fail_pending(file, STALE_PENDING_REASON);
            swept += 1;
        }
        Ok(swept)
    }
}

#[async_trait]
impl LedgerRepository for MemoryRepository {
    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.ledger.iter().any(|e| e.request_id == entry.request_id) {
            tracing::warn!(request_id = %entry.request_id, "Ledger already holds this request id, entry ignored");
            return Ok(());
        }
        tables.ledger.push(entry.clone());
        Ok(())
    }

    async fn contains(&self, request_id: Uuid) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.ledger.iter().any(|e| e.request_id == request_id))
    }

    async fn stats(&self) -> Result<LedgerStats> {
        let tables = self.tables.lock().await;
        let (mut grounded, mut fallback, mut failed, mut citations) = (0u64, 0u64, 0u64, 0u64);
        for entry in &tables.ledger {
            match (entry.outcome, entry.method) {
                (LedgerOutcome::Succeeded, Some(GenerationMethod::Grounded)) => {
                    grounded += 1;
                    citations += entry.citations.len() as u64;
                }
                (LedgerOutcome::Succeeded, _) => fallback += 1,
                (LedgerOutcome::Failed, _) => failed += 1,
            }
        }
        Ok(LedgerStats::from_counts(grounded, fallback, failed, citations))
    }
}
