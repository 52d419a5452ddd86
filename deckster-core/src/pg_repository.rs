//! Postgres-backed [`Storage`](crate::repository::Storage).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DecksterError, Result};
use crate::models::{
    FileStatus, IngestedFile, KnowledgeStore, LedgerEntry, LedgerStats, NewFile,
};
use crate::repository::{
    FileRepository, LedgerRepository, StoreRepository, STALE_PENDING_REASON,
};

#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FileRow {
    file_id: Uuid,
    session_id: String,
    user_id: Option<String>,
    name: String,
    size_bytes: i64,
    media_type: String,
    external_uri: Option<String>,
    status: String,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FileRow> for IngestedFile {
    type Error = DecksterError;

    fn try_from(row: FileRow) -> Result<Self> {
        let status: FileStatus = row.status.parse().map_err(DecksterError::Other)?;
        Ok(IngestedFile {
            file_id: row.file_id,
            session_id: row.session_id,
            user_id: row.user_id,
            name: row.name,
            size_bytes: u64::try_from(row.size_bytes)
                .map_err(|_| DecksterError::Other(format!("negative size on file {}", row.file_id)))?,
            media_type: row.media_type,
            external_uri: row.external_uri,
            status,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const FILE_COLUMNS: &str = "file_id, session_id, user_id, name, size_bytes, media_type, \
     external_uri, status, failure_reason, created_at, updated_at";

fn into_files(rows: Vec<FileRow>) -> Result<Vec<IngestedFile>> {
    rows.into_iter().map(IngestedFile::try_from).collect()
}

// =============================================================================
// STORE REGISTRY
// =============================================================================

#[async_trait]
impl StoreRepository for PgRepository {
    async fn find_store(&self, session_id: &str) -> Result<Option<KnowledgeStore>> {
        let store = sqlx::query_as::<_, KnowledgeStore>(
            "SELECT session_id, user_id, store_handle, display_name, file_count, created_at
             FROM knowledge_stores WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(store)
    }

    async fn insert_store_if_absent(&self, store: KnowledgeStore) -> Result<KnowledgeStore> {
        sqlx::query(
            "INSERT INTO knowledge_stores
                 (session_id, user_id, store_handle, display_name, file_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(&store.session_id)
        .bind(&store.user_id)
        .bind(&store.store_handle)
        .bind(&store.display_name)
        .bind(store.file_count)
        .bind(store.created_at)
        .execute(&self.pool)
        .await?;

        self.find_store(&store.session_id)
            .await?
            .ok_or_else(|| DecksterError::Other(format!(
                "knowledge store for session {} vanished after insert",
                store.session_id
            )))
    }

    async fn increment_file_count(&self, session_id: &str) -> Result<()> {
        sqlx::query("UPDATE knowledge_stores SET file_count = file_count + 1 WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// INGESTED FILES
// =============================================================================

#[async_trait]
impl FileRepository for PgRepository {
    async fn reserve_slot(
        &self,
        file: NewFile,
        max_files: u32,
        stale_after: chrono::Duration,
    ) -> Result<IngestedFile> {
        let now = Utc::now();
        let cutoff = now - stale_after;
        let record = file.into_pending(now);

        let mut tx = self.pool.begin().await?;

        // Serializes reservations per session; released at commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&record.session_id)
            .execute(&mut *tx)
            .await?;

        let swept = sqlx::query(
            "UPDATE ingested_files
             SET status = 'failed', failure_reason = $3, updated_at = $4
             WHERE session_id = $1 AND status = 'pending' AND created_at < $2",
        )
        .bind(&record.session_id)
        .bind(cutoff)
        .bind(STALE_PENDING_REASON)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if swept > 0 {
            tracing::warn!(session_id = %record.session_id, swept, "Swept stale pending files");
        }

        let (current,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM ingested_files
             WHERE session_id = $1 AND status IN ('pending', 'indexed')",
        )
        .bind(&record.session_id)
        .fetch_one(&mut *tx)
        .await?;

        if current >= i64::from(max_files) {
            tx.rollback().await?;
            return Err(DecksterError::SessionFileLimitExceeded {
                current: current as u32,
                max: max_files,
            });
        }

        let size_bytes = i64::try_from(record.size_bytes)
            .map_err(|_| DecksterError::InvalidUpload("file size out of range".to_string()))?;

        sqlx::query(
            "INSERT INTO ingested_files
                 (file_id, session_id, user_id, name, size_bytes, media_type,
                  external_uri, status, failure_reason, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, NULL, 'pending', NULL, $7, $7)",
        )
        .bind(record.file_id)
        .bind(&record.session_id)
        .bind(&record.user_id)
        .bind(&record.name)
        .bind(size_bytes)
        .bind(&record.media_type)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn mark_indexed(&self, file_id: Uuid, external_uri: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ingested_files
             SET status = 'indexed', external_uri = $2, failure_reason = NULL, updated_at = NOW()
             WHERE file_id = $1 AND status = 'pending'",
        )
        .bind(file_id)
        .bind(external_uri)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, file_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE ingested_files
             SET status = 'failed', failure_reason = $2, updated_at = NOW()
             WHERE file_id = $1 AND status = 'pending'",
        )
        .bind(file_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_file(&self, file_id: Uuid) -> Result<Option<IngestedFile>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM ingested_files WHERE file_id = $1"
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(IngestedFile::try_from).transpose()
    }

    async fn list_files(&self, session_id: &str) -> Result<Vec<IngestedFile>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM ingested_files
             WHERE session_id = $1 ORDER BY created_at, file_id"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        into_files(rows)
    }

    async fn indexed_files(&self, session_id: &str) -> Result<Vec<IngestedFile>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM ingested_files
             WHERE session_id = $1 AND status = 'indexed' ORDER BY created_at, file_id"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        into_files(rows)
    }

    async fn sweep_stale(&self, stale_after: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - stale_after;
        let result = sqlx::query(
            "UPDATE ingested_files
             SET status = 'failed', failure_reason = $2, updated_at = NOW()
             WHERE status = 'pending' AND created_at < $1",
        )
        .bind(cutoff)
        .bind(STALE_PENDING_REASON)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// GENERATION LEDGER
// =============================================================================

#[async_trait]
impl LedgerRepository for PgRepository {
    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO generation_ledger
                 (request_id, session_id, prompt, slide_type, context, outcome, method,
                  fallback_reason, citations, citation_count, attempts, latency_ms, error,
                  recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (request_id) DO NOTHING",
        )
        .bind(entry.request_id)
        .bind(&entry.session_id)
        .bind(&entry.prompt)
        .bind(&entry.slide_type)
        .bind(Json(&entry.context))
        .bind(entry.outcome.as_str())
        .bind(entry.method.map(|m| m.as_str()))
        .bind(entry.fallback_reason.map(|r| r.as_str()))
        .bind(Json(&entry.citations))
        .bind(entry.citations.len() as i32)
        .bind(entry.attempts as i32)
        .bind(entry.latency_ms as i64)
        .bind(&entry.error)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(request_id = %entry.request_id, "Ledger already holds this request id, entry ignored");
        }
        Ok(())
    }

    async fn contains(&self, request_id: Uuid) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM generation_ledger WHERE request_id = $1)")
                .bind(request_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn stats(&self) -> Result<LedgerStats> {
        let (grounded, fallback, failed, grounded_citations): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT
                 COUNT(*) FILTER (WHERE outcome = 'succeeded' AND method = 'grounded'),
                 COUNT(*) FILTER (WHERE outcome = 'succeeded' AND method = 'fallback'),
                 COUNT(*) FILTER (WHERE outcome = 'failed'),
                 COALESCE(SUM(citation_count) FILTER (WHERE outcome = 'succeeded' AND method = 'grounded'), 0)::BIGINT
             FROM generation_ledger",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats::from_counts(
            grounded as u64,
            fallback as u64,
            failed as u64,
            grounded_citations as u64,
        ))
    }
}
