//! Mock provider shared by the server's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use deckster_core::{
    DocumentMetadata, GenerateCall, IndexedDocument, ProviderError, ProviderResponse,
    RetrievalProvider, StagedFile,
};

/// Generation replies are scripted in order; an empty script answers with
/// plain text. Store creation and indexing always succeed.
#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    calls: Mutex<Vec<GenerateCall>>,
    index_calls: AtomicUsize,
    delay: Duration,
}

impl MockProvider {
    pub fn then_ok(self, text: &str, grounding: Option<serde_json::Value>) -> Self {
        self.push_ok(text, grounding);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_ok(&self, text: &str, grounding: Option<serde_json::Value>) {
        self.script.lock().unwrap().push_back(Ok(ProviderResponse {
            text: text.to_string(),
            grounding,
        }));
    }

    pub fn push_err(&self, err: ProviderError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<GenerateCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalProvider for MockProvider {
    async fn create_store(&self, display_name: &str) -> Result<String, ProviderError> {
        Ok(format!("fileSearchStores/{}", display_name.to_lowercase()))
    }

    async fn index_file(
        &self,
        store_handle: &str,
        file: &StagedFile,
        _metadata: &DocumentMetadata,
    ) -> Result<IndexedDocument, ProviderError> {
        let n = self.index_calls.fetch_add(1, Ordering::SeqCst);
        assert!(file.path().exists());
        Ok(IndexedDocument {
            external_uri: format!("{store_handle}/documents/{n}"),
        })
    }

    async fn generate(&self, call: &GenerateCall) -> Result<ProviderResponse, ProviderError> {
        self.calls.lock().unwrap().push(call.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(ProviderResponse {
                text: "generated".to_string(),
                grounding: None,
            })
        })
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn name(&self) -> &str {
        "mock"
    }
}
