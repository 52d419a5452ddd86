//! Persistence seams.
//!
//! Three narrow repositories, one per table, plus [`Storage`] for callers
//! that need all of them behind one trait object. Implementations:
//! [`crate::pg_repository::PgRepository`] and
//! [`crate::memory_repository::MemoryRepository`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{IngestedFile, KnowledgeStore, LedgerEntry, LedgerStats, NewFile};

// =============================================================================
// STORE REGISTRY
// =============================================================================

#[async_trait]
pub trait StoreRepository: Send + Sync {
    async fn find_store(&self, session_id: &str) -> Result<Option<KnowledgeStore>>;

    /// Insert `store` unless the session already has one. Returns the record
    /// that is persisted afterwards, which may belong to a concurrent winner.
    async fn insert_store_if_absent(&self, store: KnowledgeStore) -> Result<KnowledgeStore>;

    async fn increment_file_count(&self, session_id: &str) -> Result<()>;
}

// =============================================================================
// INGESTED FILES
// =============================================================================

#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Atomically sweep stale pending rows of the session, count the rows
    /// still holding a slot and insert a pending row if below `max_files`.
    ///
    /// Fails with `SessionFileLimitExceeded` when the cap is reached.
    async fn reserve_slot(
        &self,
        file: NewFile,
        max_files: u32,
        stale_after: chrono::Duration,
    ) -> Result<IngestedFile>;

    /// Move a pending record to indexed. Returns `false` if the record was
    /// no longer pending (e.g. swept as stale).
    async fn mark_indexed(&self, file_id: Uuid, external_uri: &str) -> Result<bool>;

    async fn mark_failed(&self, file_id: Uuid, reason: &str) -> Result<()>;

    async fn find_file(&self, file_id: Uuid) -> Result<Option<IngestedFile>>;

    /// All records of a session, oldest first.
    async fn list_files(&self, session_id: &str) -> Result<Vec<IngestedFile>>;

    async fn indexed_files(&self, session_id: &str) -> Result<Vec<IngestedFile>>;

    /// Mark every pending record older than `stale_after` as failed, across
    /// all sessions. Returns the number of records swept.
    async fn sweep_stale(&self, stale_after: chrono::Duration) -> Result<u64>;
}

// =============================================================================
// GENERATION LEDGER
// =============================================================================

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Append one entry. A duplicate `request_id` is ignored.
    async fn append(&self, entry: &LedgerEntry) -> Result<()>;

    /// Whether an entry with this `request_id` has been recorded.
    async fn contains(&self, request_id: Uuid) -> Result<bool>;

    async fn stats(&self) -> Result<LedgerStats>;
}

/// Everything the service needs from persistence.
pub trait Storage: StoreRepository + FileRepository + LedgerRepository {}

impl<T> Storage for T where T: StoreRepository + FileRepository + LedgerRepository {}

/// Reason recorded on pending rows swept by [`FileRepository::sweep_stale`].
pub const STALE_PENDING_REASON: &str = "indexing attempt abandoned";
