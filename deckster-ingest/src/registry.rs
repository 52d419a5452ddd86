//! Session -> knowledge store mapping.
//!
//! The persisted row is the only source of truth. Creation is optimistic:
//! the provider store is created without holding any lock, then recorded
//! with insert-if-absent. A caller that loses the race adopts the winner's
//! handle; its own provider store is orphaned and left to provider retention.

use std::sync::Arc;

use chrono::Utc;
use deckster_core::models::KnowledgeStore;
use deckster_core::{DecksterError, Result, RetrievalProvider, RetryPolicy, StoreRepository};

pub struct StoreRegistry<R: ?Sized> {
    stores: Arc<R>,
    provider: Arc<dyn RetrievalProvider>,
    retry: RetryPolicy,
}

impl<R: StoreRepository + ?Sized> StoreRegistry<R> {
    pub fn new(stores: Arc<R>, provider: Arc<dyn RetrievalProvider>, retry: RetryPolicy) -> Self {
        Self { stores, provider, retry }
    }

    pub async fn find(&self, session_id: &str) -> Result<Option<KnowledgeStore>> {
        self.stores.find_store(session_id).await
    }

    pub async fn get_or_create(&self, session_id: &str, user_id: Option<&str>) -> Result<KnowledgeStore> {
        if let Some(existing) = self.stores.find_store(session_id).await? {
            return Ok(existing);
        }

        let display_name = KnowledgeStore::display_name_for(session_id);
        let handle = self.create_with_retry(session_id, &display_name).await?;

        let candidate = KnowledgeStore {
            session_id: session_id.to_string(),
            user_id: user_id.map(str::to_string),
            store_handle: handle.clone(),
            display_name,
            file_count: 0,
            created_at: Utc::now(),
        };

        let persisted = self.stores.insert_store_if_absent(candidate).await?;
        if persisted.store_handle != handle {
            tracing::warn!(
                session_id = %session_id,
                kept = %persisted.store_handle,
                orphaned = %handle,
                "Lost store creation race, adopting existing store"
            );
        } else {
            tracing::info!(session_id = %session_id, store = %handle, "Registered knowledge store");
        }
        Ok(persisted)
    }

    async fn create_with_retry(&self, session_id: &str, display_name: &str) -> Result<String> {
        let delays = self.retry.delays();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.provider.create_store(display_name).await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_transient() && attempt <= delays.len() => {
                    let delay = delays[attempt - 1];
                    tracing::warn!(
                        session_id = %session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store creation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, attempt, error = %e, "Store creation failed");
                    return Err(DecksterError::StoreCreationFailed(e.to_string()));
                }
            }
        }
    }
}
