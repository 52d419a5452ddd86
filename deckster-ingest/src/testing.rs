//! Scripted provider for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use deckster_core::{
    DocumentMetadata, GenerateCall, IndexedDocument, ProviderError, ProviderResponse,
    RetrievalProvider, StagedFile,
};

#[derive(Default)]
pub struct ScriptedProvider {
    create_calls: AtomicUsize,
    index_calls: AtomicUsize,
    create_failures: Mutex<VecDeque<ProviderError>>,
    index_failures: Mutex<VecDeque<ProviderError>>,
    last_metadata: Mutex<Option<DocumentMetadata>>,
    create_delay: Duration,
    index_delay: Duration,
}

impl ScriptedProvider {
    pub fn with_create_failures(self, failures: Vec<ProviderError>) -> Self {
        *self.create_failures.lock().unwrap() = failures.into();
        self
    }

    pub fn with_index_failures(self, failures: Vec<ProviderError>) -> Self {
        *self.index_failures.lock().unwrap() = failures.into();
        self
    }

    pub fn with_create_delay_ms(mut self, ms: u64) -> Self {
        self.create_delay = Duration::from_millis(ms);
        self
    }

    pub fn with_index_delay(mut self, delay: Duration) -> Self {
        self.index_delay = delay;
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn last_metadata(&self) -> Option<DocumentMetadata> {
        self.last_metadata.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalProvider for ScriptedProvider {
    async fn create_store(&self, _display_name: &str) -> Result<String, ProviderError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if let Some(err) = self.create_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(format!("fileSearchStores/store-{n}"))
    }

    async fn index_file(
        &self,
        store_handle: &str,
        file: &StagedFile,
        metadata: &DocumentMetadata,
    ) -> Result<IndexedDocument, ProviderError> {
        let n = self.index_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_metadata.lock().unwrap() = Some(metadata.clone());
        if !self.index_delay.is_zero() {
            tokio::time::sleep(self.index_delay).await;
        }
        if let Some(err) = self.index_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        assert!(file.path().exists(), "staged file must exist while indexing");
        Ok(IndexedDocument {
            external_uri: format!("{store_handle}/documents/{}-{n}", file.name),
        })
    }

    async fn generate(&self, _call: &GenerateCall) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Malformed("generation is not scripted here".to_string()))
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
