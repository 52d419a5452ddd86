//! File ingestion: validate, reserve a slot, stage, index, record.
//!
//! Indexing is never retried here. A failed attempt leaves a `failed`
//! record, which frees the slot so the caller can re-submit.
//!
//! `index_timeout` bounds the whole attempt (staging, store resolution and
//! indexing). A pending row only goes stale after twice that, so a sweep
//! never fails a row whose attempt is still running.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use deckster_core::config::IngestionConfig;
use deckster_core::models::{FileStatus, IngestedFile, NewFile};
use deckster_core::{
    DecksterError, DocumentMetadata, FileRepository, Result, RetrievalProvider, RetryPolicy,
    StagingArea, Storage, StoreRepository,
};
use uuid::Uuid;

use crate::registry::StoreRegistry;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub max_file_bytes: u64,
    pub max_files_per_session: u32,
    pub index_timeout: Duration,
    pub store_retry: RetryPolicy,
    pub staging_dir: PathBuf,
}

impl IngestSettings {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes,
            max_files_per_session: config.max_files_per_session,
            index_timeout: config.index_timeout(),
            store_retry: config.store_retry_policy(),
            staging_dir: PathBuf::from(config.staging_path()),
        }
    }

    /// Age after which a pending record no longer holds its slot.
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.index_timeout * 2).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

/// An uploaded file as received from a transport.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub media_type: String,
    pub bytes: Bytes,
}

pub struct IngestionPipeline {
    storage: Arc<dyn Storage>,
    registry: StoreRegistry<dyn Storage>,
    provider: Arc<dyn RetrievalProvider>,
    staging: StagingArea,
    settings: IngestSettings,
}

impl IngestionPipeline {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn RetrievalProvider>,
        settings: IngestSettings,
    ) -> Self {
        let registry = StoreRegistry::new(storage.clone(), provider.clone(), settings.store_retry.clone());
        let staging = StagingArea::new(settings.staging_dir.clone());
        Self {
            storage,
            registry,
            provider,
            staging,
            settings,
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn registry(&self) -> &StoreRegistry<dyn Storage> {
        &self.registry
    }

    pub async fn ingest(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        upload: Upload,
    ) -> Result<IngestedFile> {
        let size_bytes = upload.bytes.len() as u64;
        self.validate(session_id, &upload)?;

        let record = self
            .storage
            .reserve_slot(
                NewFile {
                    session_id: session_id.to_string(),
                    user_id: user_id.map(str::to_string),
                    name: upload.name.clone(),
                    size_bytes,
                    media_type: upload.media_type.clone(),
                },
                self.settings.max_files_per_session,
                self.settings.stale_after(),
            )
            .await?;

        tracing::info!(
            session_id = %session_id,
            file_id = %record.file_id,
            name = %record.name,
            size_bytes,
            "Ingesting file"
        );

        let timeout = self.settings.index_timeout;
        let attempt = self.index(record.file_id, session_id, user_id, upload);
        let outcome = tokio::time::timeout(timeout, attempt).await.unwrap_or_else(|_| {
            Err(DecksterError::IngestionFailed(format!(
                "ingestion attempt timed out after {timeout:?}"
            )))
        });

        let external_uri = match outcome {
            Ok(uri) => uri,
            Err(e) => {
                let reason = e.to_string();
                if let Err(mark_err) = self.storage.mark_failed(record.file_id, &reason).await {
                    tracing::error!(file_id = %record.file_id, error = %mark_err, "Failed to record ingestion failure");
                }
                tracing::warn!(session_id = %session_id, file_id = %record.file_id, error = %reason, "Ingestion failed");
                return Err(e);
            }
        };

        if !self.storage.mark_indexed(record.file_id, &external_uri).await? {
            tracing::warn!(file_id = %record.file_id, "File record left pending state before indexing finished");
            return Err(DecksterError::IngestionFailed(
                "file record expired before indexing finished".to_string(),
            ));
        }
        self.storage.increment_file_count(session_id).await?;

        tracing::info!(session_id = %session_id, file_id = %record.file_id, document = %external_uri, "File indexed");

        Ok(IngestedFile {
            external_uri: Some(external_uri),
            status: FileStatus::Indexed,
            updated_at: Utc::now(),
            ..record
        })
    }

    pub async fn list_files(&self, session_id: &str) -> Result<Vec<IngestedFile>> {
        self.storage.list_files(session_id).await
    }

    fn validate(&self, session_id: &str, upload: &Upload) -> Result<()> {
        let size_bytes = upload.bytes.len() as u64;
        if size_bytes > self.settings.max_file_bytes {
            return Err(DecksterError::FileTooLarge {
                size_bytes,
                max_bytes: self.settings.max_file_bytes,
            });
        }
        if session_id.trim().is_empty() {
            return Err(DecksterError::InvalidUpload("session_id is required".to_string()));
        }
        if upload.name.trim().is_empty() {
            return Err(DecksterError::InvalidUpload("file name is required".to_string()));
        }
        if size_bytes == 0 {
            return Err(DecksterError::InvalidUpload("file is empty".to_string()));
        }
        Ok(())
    }

    /// Stage, resolve the store and index. Returns the provider document handle.
    async fn index(
        &self,
        file_id: Uuid,
        session_id: &str,
        user_id: Option<&str>,
        upload: Upload,
    ) -> Result<String> {
        let metadata = DocumentMetadata {
            display_name: upload.name.clone(),
            session_id: session_id.to_string(),
            user_id: user_id.map(str::to_string),
        };

        let staged = self
            .staging
            .stage(&upload.name, &upload.media_type, upload.bytes)
            .await
            .map_err(|e| DecksterError::IngestionFailed(format!("staging failed: {e}")))?;

        let store = self.registry.get_or_create(session_id, user_id).await?;

        // The row may have been swept while the store was being created.
        let still_pending = self
            .storage
            .find_file(file_id)
            .await?
            .is_some_and(|f| f.status == FileStatus::Pending);
        if !still_pending {
            return Err(DecksterError::IngestionFailed(
                "file record left pending state before indexing started".to_string(),
            ));
        }

        let indexed = self
            .provider
            .index_file(&store.store_handle, &staged, &metadata)
            .await
            .map_err(|e| DecksterError::IngestionFailed(e.to_string()))?;

        Ok(indexed.external_uri)
    }
}
