//! Content generation orchestrator.
//!
//! DecidePath -> Grounded -> Normalize, degrading to Fallback when the
//! session has no indexed files or the grounded call fails. Only a failure
//! of the fallback call fails the request.
//!
//! File-RAG overview/detailed calls share this orchestrator; see
//! [`super::file_rag`].

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use deckster_core::citations::normalize;
use deckster_core::content::{build_prompt, parse_slide_content};
use deckster_core::grounding::parse_grounding_metadata;
use deckster_core::models::{
    Citation, FallbackReason, GenerationMethod, GenerationRequest, GenerationResult,
    GroundingSummary, IngestedFile, KnowledgeStore, LedgerEntry, CITATION_SCHEMA_VERSION,
};
use deckster_core::{
    DecksterError, FileRepository, GenerateCall, ProviderError, ProviderResponse, Result,
    RetrievalProvider, RetryPolicy, Storage, StoreRepository,
};
use uuid::Uuid;

use super::ledger::GenerationLedger;

enum Path {
    Grounded {
        store: KnowledgeStore,
        files: Vec<IngestedFile>,
    },
    Fallback(FallbackReason),
}

pub struct Orchestrator {
    pub(super) storage: Arc<dyn Storage>,
    pub(super) provider: Arc<dyn RetrievalProvider>,
    ledger: GenerationLedger,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn RetrievalProvider>,
        ledger: GenerationLedger,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            provider,
            ledger,
            retry,
        }
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        if request.session_id.trim().is_empty() {
            return Err(DecksterError::InvalidRequest("session_id is required".to_string()));
        }
        if request.prompt.trim().is_empty() {
            return Err(DecksterError::InvalidRequest("prompt is required".to_string()));
        }

        // A reused id would produce a result the ledger silently drops.
        if let Some(id) = request.request_id {
            let seen = self.ledger.contains(id).await.map_err(|e| {
                tracing::error!(request_id = %id, error = %e, "Ledger lookup failed");
                DecksterError::GenerationFailed(format!("ledger unavailable: {e}"))
            })?;
            if seen {
                return Err(DecksterError::InvalidRequest(format!(
                    "request_id {id} has already been used"
                )));
            }
        }

        let started = Instant::now();
        let request_id = request.request_id.unwrap_or_else(Uuid::new_v4);
        let prompt = build_prompt(&request.prompt, &request.slide_type, &request.context);
        let mut attempts = 0u32;

        let path = self.decide_path(&request.session_id).await.map_err(|e| {
            tracing::error!(request_id = %request_id, session_id = %request.session_id, error = %e, "Could not resolve session files");
            DecksterError::GenerationFailed(format!("could not resolve session files: {e}"))
        })?;

        let reason = match path {
            Path::Grounded { store, files } => {
                let call = GenerateCall::grounded(prompt.clone(), store.store_handle.clone());
                match self.call_with_retry(&call, &mut attempts, "grounded").await {
                    Ok(response) => {
                        let citations = self.citations(&response, &files, &request.session_id);
                        let result = self.assemble(
                            request_id,
                            &request,
                            GenerationMethod::Grounded,
                            None,
                            &response.text,
                            citations,
                            GroundingSummary { used_files: true, file_count: files.len() },
                            attempts,
                            started,
                        );
                        self.record(LedgerEntry::succeeded(&request, &result)).await;
                        return Ok(result);
                    }
                    Err(e) => {
                        let reason = if e.is_transient() {
                            FallbackReason::GroundedExhausted
                        } else {
                            FallbackReason::GroundedRejected
                        };
                        tracing::warn!(
                            request_id = %request_id,
                            session_id = %request.session_id,
                            attempts,
                            reason = reason.as_str(),
                            error = %e,
                            "Grounded generation failed, degrading to fallback"
                        );
                        reason
                    }
                }
            }
            Path::Fallback(reason) => reason,
        };

        let call = GenerateCall::plain(prompt);
        match self.call_with_retry(&call, &mut attempts, "fallback").await {
            Ok(response) => {
                let result = self.assemble(
                    request_id,
                    &request,
                    GenerationMethod::Fallback,
                    Some(reason),
                    &response.text,
                    Vec::new(),
                    GroundingSummary { used_files: false, file_count: 0 },
                    attempts,
                    started,
                );
                self.record(LedgerEntry::succeeded(&request, &result)).await;
                Ok(result)
            }
            Err(e) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                tracing::error!(
                    request_id = %request_id,
                    session_id = %request.session_id,
                    attempts,
                    error = %e,
                    "Fallback generation failed"
                );
                self.record(LedgerEntry::failed(
                    request_id,
                    &request,
                    Some(reason),
                    attempts,
                    latency_ms,
                    e.to_string(),
                ))
                .await;
                Err(DecksterError::GenerationFailed(e.to_string()))
            }
        }
    }

    /// Indexed files are read fresh on every call; there is no cache.
    async fn decide_path(&self, session_id: &str) -> Result<Path> {
        let files = self.storage.indexed_files(session_id).await?;
        if files.is_empty() {
            return Ok(Path::Fallback(FallbackReason::NoIndexedFiles));
        }
        match self.storage.find_store(session_id).await? {
            Some(store) => Ok(Path::Grounded { store, files }),
            None => {
                tracing::warn!(session_id = %session_id, files = files.len(), "Indexed files without a knowledge store");
                Ok(Path::Fallback(FallbackReason::NoIndexedFiles))
            }
        }
    }

    /// Bounded retry over transient errors. Terminal errors return at once.
    pub(super) async fn call_with_retry(
        &self,
        call: &GenerateCall,
        attempts: &mut u32,
        path: &'static str,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let delays = self.retry.delays();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            *attempts += 1;
            match self.provider.generate(call).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt <= delays.len() => {
                    let delay = delays[attempt - 1];
                    tracing::warn!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Generation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) fn citations(
        &self,
        response: &ProviderResponse,
        files: &[IngestedFile],
        session_id: &str,
    ) -> Vec<Citation> {
        let chunks = response
            .grounding
            .as_ref()
            .map(parse_grounding_metadata)
            .unwrap_or_default();
        normalize(&chunks, files, session_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        request_id: Uuid,
        request: &GenerationRequest,
        method: GenerationMethod,
        fallback_reason: Option<FallbackReason>,
        text: &str,
        citations: Vec<Citation>,
        grounding: GroundingSummary,
        attempts: u32,
        started: Instant,
    ) -> GenerationResult {
        let result = GenerationResult {
            request_id,
            session_id: request.session_id.clone(),
            method,
            fallback_reason,
            content: parse_slide_content(text),
            citations,
            citation_schema: CITATION_SCHEMA_VERSION,
            grounding,
            model_used: self.provider.model().to_string(),
            attempts,
            latency_ms: started.elapsed().as_millis() as u64,
            generated_at: Utc::now(),
        };
        tracing::info!(
            request_id = %request_id,
            session_id = %request.session_id,
            method = %method,
            citations = result.citations.len(),
            attempts,
            latency_ms = result.latency_ms,
            "Generated slide content"
        );
        result
    }

    async fn record(&self, entry: LedgerEntry) {
        if let Err(e) = self.ledger.record(&entry).await {
            tracing::error!(request_id = %entry.request_id, error = %e, "Failed to write ledger entry");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use deckster_core::models::{LedgerOutcome, LedgerStats, NewFile};
    use deckster_core::{LedgerRepository, MemoryRepository};
    use serde_json::json;
    use std::time::Duration;

    pub(crate) struct Fixture {
        pub(crate) repo: Arc<MemoryRepository>,
        pub(crate) provider: Arc<MockProvider>,
        pub(crate) orchestrator: Orchestrator,
    }

    pub(crate) fn fixture(provider: MockProvider) -> Fixture {
        let repo = Arc::new(MemoryRepository::new());
        let provider = Arc::new(provider);
        let storage: Arc<dyn Storage> = repo.clone();
        let orchestrator = Orchestrator::new(
            storage.clone(),
            provider.clone(),
            GenerationLedger::new(storage),
            RetryPolicy::new(3, 1).without_jitter(),
        );
        Fixture { repo, provider, orchestrator }
    }

    pub(crate) async fn index_file(repo: &MemoryRepository, session: &str, name: &str, uri: &str) -> IngestedFile {
        repo.insert_store_if_absent(KnowledgeStore {
            session_id: session.to_string(),
            user_id: None,
            store_handle: format!("fileSearchStores/{session}"),
            display_name: KnowledgeStore::display_name_for(session),
            file_count: 0,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        let file = repo
            .reserve_slot(
                NewFile {
                    session_id: session.to_string(),
                    user_id: None,
                    name: name.to_string(),
                    size_bytes: 100,
                    media_type: "application/pdf".to_string(),
                },
                5,
                chrono::Duration::seconds(120),
            )
            .await
            .unwrap();
        assert!(repo.mark_indexed(file.file_id, uri).await.unwrap());
        file
    }

    /// Memory storage whose file table is unreachable.
    struct BrokenFiles(MemoryRepository);

    fn unreachable() -> DecksterError {
        DecksterError::Other("connection reset".to_string())
    }

    #[async_trait::async_trait]
    impl StoreRepository for BrokenFiles {
        async fn find_store(&self, session_id: &str) -> Result<Option<KnowledgeStore>> {
            self.0.find_store(session_id).await
        }

        async fn insert_store_if_absent(&self, store: KnowledgeStore) -> Result<KnowledgeStore> {
            self.0.insert_store_if_absent(store).await
        }

        async fn increment_file_count(&self, session_id: &str) -> Result<()> {
            self.0.increment_file_count(session_id).await
        }
    }

    #[async_trait::async_trait]
    impl FileRepository for BrokenFiles {
        async fn reserve_slot(&self, _: NewFile, _: u32, _: chrono::Duration) -> Result<IngestedFile> {
            Err(unreachable())
        }

        async fn mark_indexed(&self, _: Uuid, _: &str) -> Result<bool> {
            Err(unreachable())
        }

        async fn mark_failed(&self, _: Uuid, _: &str) -> Result<()> {
            Err(unreachable())
        }

        async fn find_file(&self, _: Uuid) -> Result<Option<IngestedFile>> {
            Err(unreachable())
        }

        async fn list_files(&self, _: &str) -> Result<Vec<IngestedFile>> {
            Err(unreachable())
        }

        async fn indexed_files(&self, _: &str) -> Result<Vec<IngestedFile>> {
            Err(unreachable())
        }

        async fn sweep_stale(&self, _: chrono::Duration) -> Result<u64> {
            Err(unreachable())
        }
    }

    #[async_trait::async_trait]
    impl LedgerRepository for BrokenFiles {
        async fn append(&self, entry: &LedgerEntry) -> Result<()> {
            self.0.append(entry).await
        }

        async fn contains(&self, request_id: Uuid) -> Result<bool> {
            self.0.contains(request_id).await
        }

        async fn stats(&self) -> Result<LedgerStats> {
            self.0.stats().await
        }
    }

    fn slide_text() -> String {
        "```json\n{\"title\": \"Q3 results\", \"bullets\": [\"Revenue up 15%\"]}\n```".to_string()
    }

    fn grounding_for(uri: &str, excerpt: &str) -> serde_json::Value {
        json!({
            "groundingChunks": [{"retrievedContext": {"documentName": uri, "text": excerpt, "title": "q3.pdf"}}],
            "groundingSupports": [{"groundingChunkIndices": [0], "confidenceScores": [0.82]}]
        })
    }

    #[tokio::test]
    async fn test_no_files_takes_fallback_without_citations() {
        let f = fixture(MockProvider::default().then_ok("Title slide text", None));

        let result = f
            .orchestrator
            .generate(GenerationRequest::new("s1", "Make a title slide", "title"))
            .await
            .unwrap();

        assert_eq!(result.method, GenerationMethod::Fallback);
        assert_eq!(result.fallback_reason, Some(FallbackReason::NoIndexedFiles));
        assert!(result.citations.is_empty());
        assert!(!result.grounding.used_files);
        assert_eq!(result.content, json!({"raw_text": "Title slide text"}));

        let calls = f.provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].store_handle.is_none());

        let entries = f.repo.ledger_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, LedgerOutcome::Succeeded);
        assert_eq!(entries[0].method, Some(GenerationMethod::Fallback));
    }

    #[tokio::test]
    async fn test_grounded_result_cites_indexed_file() {
        let f = fixture(MockProvider::default());
        let file = index_file(&f.repo, "s1", "q3.pdf", "fileSearchStores/s1/documents/q3").await;
        f.provider.push_ok(&slide_text(), Some(grounding_for("fileSearchStores/s1/documents/q3", "Revenue up 15%")));

        let result = f
            .orchestrator
            .generate(GenerationRequest::new("s1", "Summarise Q3", "bullets"))
            .await
            .unwrap();

        assert_eq!(result.method, GenerationMethod::Grounded);
        assert_eq!(result.fallback_reason, None);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].source_file_id, file.file_id);
        assert_eq!(result.citations[0].excerpt, "Revenue up 15%");
        assert_eq!(result.citations[0].confidence, Some(0.82));
        assert_eq!(result.content["title"], "Q3 results");
        assert_eq!(result.grounding, GroundingSummary { used_files: true, file_count: 1 });
        assert_eq!(result.citation_schema, CITATION_SCHEMA_VERSION);
        assert_eq!(f.provider.calls()[0].store_handle.as_deref(), Some("fileSearchStores/s1"));

        let entries = f.repo.ledger_entries().await;
        assert_eq!(entries[0].citations.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_references_are_dropped() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "mine.pdf", "docs/mine").await;
        index_file(&f.repo, "s2", "theirs.pdf", "docs/theirs").await;
        f.provider.push_ok(&slide_text(), Some(json!({
            "groundingChunks": [
                {"retrievedContext": {"documentName": "docs/theirs", "text": "secret"}},
                {"retrievedContext": {"documentName": "docs/unknown", "text": "?"}},
                {"retrievedContext": {"documentName": "docs/mine", "text": "ok"}}
            ]
        })));

        let result = f
            .orchestrator
            .generate(GenerationRequest::new("s1", "p", "bullets"))
            .await
            .unwrap();

        assert_eq!(result.method, GenerationMethod::Grounded);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].file_name, "mine.pdf");
        assert_eq!(result.citations[0].confidence, None);
    }

    #[tokio::test]
    async fn test_zero_chunks_is_grounded_with_empty_citations() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;
        f.provider.push_ok(&slide_text(), None);

        let result = f
            .orchestrator
            .generate(GenerationRequest::new("s1", "p", "bullets"))
            .await
            .unwrap();

        assert_eq!(result.method, GenerationMethod::Grounded);
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn test_grounded_exhaustion_degrades_to_fallback() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;
        for _ in 0..3 {
            f.provider.push_err(ProviderError::Api { code: 503, message: "overloaded".into() });
        }
        f.provider.push_ok(&slide_text(), Some(grounding_for("docs/q3", "ignored")));

        let result = f
            .orchestrator
            .generate(GenerationRequest::new("s1", "p", "bullets"))
            .await
            .unwrap();

        assert_eq!(result.method, GenerationMethod::Fallback);
        assert_eq!(result.fallback_reason, Some(FallbackReason::GroundedExhausted));
        assert!(result.citations.is_empty());
        assert_eq!(result.attempts, 4);

        let calls = f.provider.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[..3].iter().all(|c| c.store_handle.is_some()));
        assert!(calls[3].store_handle.is_none());
    }

    #[tokio::test]
    async fn test_terminal_grounded_error_skips_retries() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;
        f.provider.push_err(ProviderError::Api { code: 400, message: "bad store".into() });
        f.provider.push_ok("plain", None);

        let result = f
            .orchestrator
            .generate(GenerationRequest::new("s1", "p", "bullets"))
            .await
            .unwrap();

        assert_eq!(result.fallback_reason, Some(FallbackReason::GroundedRejected));
        assert_eq!(f.provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_transient_grounded_error_recovers_on_retry() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;
        f.provider.push_err(ProviderError::Timeout { seconds: 60 });
        f.provider.push_ok(&slide_text(), Some(grounding_for("docs/q3", "Revenue up 15%")));

        let result = f
            .orchestrator
            .generate(GenerationRequest::new("s1", "p", "bullets"))
            .await
            .unwrap();

        assert_eq!(result.method, GenerationMethod::Grounded);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.citations.len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_generation_failed_and_recorded() {
        let f = fixture(MockProvider::default());
        for _ in 0..3 {
            f.provider.push_err(ProviderError::Api { code: 500, message: "down".into() });
        }

        let err = f
            .orchestrator
            .generate(GenerationRequest::new("s1", "Make a title slide", "title"))
            .await
            .unwrap_err();

        assert!(matches!(err, DecksterError::GenerationFailed(_)));
        assert_eq!(err.error_code(), "GENERATION_FAILED");

        let entries = f.repo.ledger_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, LedgerOutcome::Failed);
        assert_eq!(entries[0].attempts, 3);
        assert_eq!(entries[0].fallback_reason, Some(FallbackReason::NoIndexedFiles));
    }

    #[tokio::test]
    async fn test_cancelled_generation_leaves_no_ledger_entry() {
        let f = fixture(MockProvider::default().with_delay(Duration::from_secs(5)));
        f.provider.push_ok("never seen", None);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            f.orchestrator.generate(GenerationRequest::new("s1", "p", "title")),
        )
        .await;

        assert!(outcome.is_err(), "generation should have been cancelled");
        assert!(f.repo.ledger_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected_before_provider() {
        let f = fixture(MockProvider::default());
        let err = f
            .orchestrator
            .generate(GenerationRequest::new("s1", "   ", "title"))
            .await
            .unwrap_err();
        assert!(matches!(err, DecksterError::InvalidRequest(_)));
        assert!(f.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reused_request_id_rejected_before_provider() {
        let f = fixture(MockProvider::default().then_ok("first", None).then_ok("second", None));
        let id = Uuid::new_v4();
        let mut request = GenerationRequest::new("s1", "p", "title");
        request.request_id = Some(id);

        f.orchestrator.generate(request.clone()).await.unwrap();
        let err = f.orchestrator.generate(request).await.unwrap_err();

        assert!(matches!(err, DecksterError::InvalidRequest(_)));
        assert_eq!(err.error_code(), "INVALID_REQUEST");
        assert_eq!(f.provider.calls().len(), 1);
        let entries = f.repo.ledger_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].request_id, id);
    }

    #[tokio::test]
    async fn test_storage_error_is_generation_failed() {
        let provider = Arc::new(MockProvider::default());
        let storage: Arc<dyn Storage> = Arc::new(BrokenFiles(MemoryRepository::new()));
        let orchestrator = Orchestrator::new(
            storage.clone(),
            provider.clone(),
            GenerationLedger::new(storage),
            RetryPolicy::new(3, 1).without_jitter(),
        );

        let err = orchestrator
            .generate(GenerationRequest::new("s1", "p", "title"))
            .await
            .unwrap_err();

        assert!(matches!(err, DecksterError::GenerationFailed(_)));
        assert_eq!(err.error_code(), "GENERATION_FAILED");
        assert!(err.to_string().contains("connection reset"));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_supplied_request_id_is_kept() {
        let f = fixture(MockProvider::default().then_ok("x", None));
        let id = Uuid::new_v4();
        let mut request = GenerationRequest::new("s1", "p", "title");
        request.request_id = Some(id);

        let result = f.orchestrator.generate(request).await.unwrap();
        assert_eq!(result.request_id, id);
        assert_eq!(f.repo.ledger_entries().await[0].request_id, id);
    }
}
