//! File-RAG: theme overview and detailed chunk retrieval over a session's
//! indexed files.
//!
//! Both calls are always grounded on the session's own store; there is no
//! fallback path and nothing is written to the generation ledger.

use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use deckster_core::content::{build_detailed_prompt, build_overview_prompt, parse_slide_content};
use deckster_core::models::file_rag::read_items;
use deckster_core::models::{
    ContentChunk, ContentTheme, DataPointSummary, DetailedRequest, DetailedResult,
    DocumentStructure, IngestedFile, KnowledgeStore, OverviewRequest, OverviewResult,
};
use deckster_core::{DecksterError, FileRepository, GenerateCall, Result, StoreRepository};

use super::generate::Orchestrator;

const OVERVIEW_TEMPERATURE: f32 = 0.5;
const DETAILED_TEMPERATURE: f32 = 0.3;
const FILE_RAG_MAX_OUTPUT_TOKENS: u32 = 4096;

pub const MAX_THEMES_LIMIT: u32 = 20;
pub const MAX_CHUNKS_LIMIT: u32 = 50;

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DecksterError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}

impl Orchestrator {
    pub async fn overview(&self, request: OverviewRequest) -> Result<OverviewResult> {
        require(&request.session_id, "session_id")?;
        require(&request.topic, "topic")?;
        if !(1..=MAX_THEMES_LIMIT).contains(&request.max_themes) {
            return Err(DecksterError::InvalidRequest(format!(
                "max_themes must be between 1 and {MAX_THEMES_LIMIT}"
            )));
        }

        let started = Instant::now();
        let (store, files) = self.scope(&request.session_id, DecksterError::OverviewFailed).await?;

        let call = GenerateCall::grounded(
            build_overview_prompt(&request.topic, &request.context, request.max_themes),
            store.store_handle,
        )
        .with_sampling(OVERVIEW_TEMPERATURE, FILE_RAG_MAX_OUTPUT_TOKENS);

        let mut attempts = 0u32;
        let response = self
            .call_with_retry(&call, &mut attempts, "overview")
            .await
            .map_err(|e| {
                tracing::error!(session_id = %request.session_id, attempts, error = %e, "File overview failed");
                DecksterError::OverviewFailed(e.to_string())
            })?;

        let payload = parse_slide_content(&response.text);
        let citations = self.citations(&response, &files, &request.session_id);

        let mut themes = read_items(&payload, "themes", ContentTheme::read);
        themes.truncate(request.max_themes as usize);
        let data_points = read_items(&payload, "data_points", DataPointSummary::read);
        let document_structures = read_items(&payload, "document_structures", DocumentStructure::read);

        let cited: HashSet<_> = citations.iter().map(|c| c.source_file_id).collect();
        let total_files_analyzed = if cited.is_empty() {
            document_structures.len()
        } else {
            cited.len()
        };

        let result = OverviewResult {
            session_id: request.session_id,
            topic: request.topic,
            themes,
            data_points,
            document_structures,
            relevance_summary: payload
                .get("relevance_summary")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            citations,
            total_files_analyzed,
            model_used: self.provider.model().to_string(),
            attempts,
            latency_ms: started.elapsed().as_millis() as u64,
            generated_at: Utc::now(),
        };

        tracing::info!(
            session_id = %result.session_id,
            themes = result.themes.len(),
            citations = result.citations.len(),
            attempts,
            latency_ms = result.latency_ms,
            "Generated file overview"
        );
        Ok(result)
    }

    pub async fn detailed(&self, request: DetailedRequest) -> Result<DetailedResult> {
        require(&request.session_id, "session_id")?;
        require(&request.query, "query")?;
        if !(1..=MAX_CHUNKS_LIMIT).contains(&request.max_chunks) {
            return Err(DecksterError::InvalidRequest(format!(
                "max_chunks must be between 1 and {MAX_CHUNKS_LIMIT}"
            )));
        }
        if !(0.0..=1.0).contains(&request.min_confidence) {
            return Err(DecksterError::InvalidRequest(
                "min_confidence must be between 0.0 and 1.0".to_string(),
            ));
        }

        let started = Instant::now();
        let (store, files) = self.scope(&request.session_id, DecksterError::DetailedFailed).await?;

        let call = GenerateCall::grounded(
            build_detailed_prompt(
                &request.query,
                &request.context,
                request.max_chunks,
                request.min_confidence,
            ),
            store.store_handle,
        )
        .with_sampling(DETAILED_TEMPERATURE, FILE_RAG_MAX_OUTPUT_TOKENS);

        let mut attempts = 0u32;
        let response = self
            .call_with_retry(&call, &mut attempts, "detailed")
            .await
            .map_err(|e| {
                tracing::error!(session_id = %request.session_id, attempts, error = %e, "Detailed file retrieval failed");
                DecksterError::DetailedFailed(e.to_string())
            })?;

        let payload = parse_slide_content(&response.text);
        let citations = self.citations(&response, &files, &request.session_id);

        let found = read_items(&payload, "content_chunks", ContentChunk::read);
        let total_chunks_found = found.len();
        let content_chunks: Vec<ContentChunk> = found
            .into_iter()
            .filter(|c| c.confidence_score >= request.min_confidence)
            .take(request.max_chunks as usize)
            .collect();

        let text_field = |key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let result = DetailedResult {
            session_id: request.session_id,
            query: request.query,
            chunks_returned: content_chunks.len(),
            content_chunks,
            synthesized_content: text_field("synthesized_content"),
            query_interpretation: text_field("query_interpretation"),
            total_chunks_found,
            citations,
            model_used: self.provider.model().to_string(),
            attempts,
            latency_ms: started.elapsed().as_millis() as u64,
            generated_at: Utc::now(),
        };

        tracing::info!(
            session_id = %result.session_id,
            found = total_chunks_found,
            returned = result.chunks_returned,
            citations = result.citations.len(),
            attempts,
            latency_ms = result.latency_ms,
            "Retrieved detailed file content"
        );
        Ok(result)
    }

    /// The session's store and indexed files. A session without indexed
    /// files is a caller error; storage failures go through `fail`.
    async fn scope(
        &self,
        session_id: &str,
        fail: fn(String) -> DecksterError,
    ) -> Result<(KnowledgeStore, Vec<IngestedFile>)> {
        let files = self
            .storage
            .indexed_files(session_id)
            .await
            .map_err(|e| fail(e.to_string()))?;
        if files.is_empty() {
            return Err(DecksterError::InvalidRequest(format!(
                "session {session_id} has no indexed files"
            )));
        }
        match self.storage.find_store(session_id).await.map_err(|e| fail(e.to_string()))? {
            Some(store) => Ok((store, files)),
            None => {
                tracing::warn!(session_id = %session_id, files = files.len(), "Indexed files without a knowledge store");
                Err(DecksterError::InvalidRequest(format!(
                    "session {session_id} has no knowledge store"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::generate::tests::{fixture, index_file};
    use crate::testing::MockProvider;
    use deckster_core::ProviderError;
    use serde_json::json;

    fn fenced(v: serde_json::Value) -> String {
        format!("```json\n{v}\n```")
    }

    fn grounding(uri: &str, excerpt: &str) -> serde_json::Value {
        json!({
            "groundingChunks": [
                {"retrievedContext": {"documentName": uri, "text": excerpt}},
                {"retrievedContext": {"documentName": "docs/elsewhere", "text": "foreign"}}
            ]
        })
    }

    #[tokio::test]
    async fn test_overview_parses_themes_and_cites_session_files() {
        let f = fixture(MockProvider::default());
        let file = index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;
        f.provider.push_ok(
            &fenced(json!({
                "themes": [
                    {"theme_name": "Growth", "description": "Revenue", "relevance_score": 0.9,
                     "source_files": ["q3.pdf"], "key_points": ["Revenue up 15%"]},
                    {"theme_name": "Costs"},
                    {"theme_name": "Hiring"}
                ],
                "data_points": [{"category": "Financial", "available_metrics": ["revenue"], "source_file": "q3.pdf"}],
                "document_structures": [{"file_name": "q3.pdf", "document_type": "report", "has_charts": true}],
                "relevance_summary": "Highly relevant."
            })),
            Some(grounding("docs/q3", "Revenue up 15%")),
        );

        let mut request = OverviewRequest::new("s1", "Q3 review");
        request.max_themes = 2;
        let result = f.orchestrator.overview(request).await.unwrap();

        assert_eq!(result.themes.len(), 2);
        assert_eq!(result.themes[0].theme_name, "Growth");
        assert_eq!(result.themes[1].relevance_score, 0.8);
        assert_eq!(result.data_points[0].category, "Financial");
        assert!(result.document_structures[0].has_charts);
        assert_eq!(result.relevance_summary, "Highly relevant.");
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].source_file_id, file.file_id);
        assert_eq!(result.total_files_analyzed, 1);
        assert_eq!(result.model_used, "mock-model");

        let calls = f.provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].store_handle.as_deref(), Some("fileSearchStores/s1"));
        assert_eq!(calls[0].temperature, Some(OVERVIEW_TEMPERATURE));
        assert_eq!(calls[0].max_output_tokens, Some(FILE_RAG_MAX_OUTPUT_TOKENS));
        assert!(calls[0].prompt.contains("Q3 review"));

        assert!(f.repo.ledger_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_overview_without_citations_counts_structures() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;
        f.provider.push_ok(
            &fenced(json!({"document_structures": [{"file_name": "a"}, {"file_name": "b"}]})),
            None,
        );

        let result = f.orchestrator.overview(OverviewRequest::new("s1", "t")).await.unwrap();
        assert!(result.citations.is_empty());
        assert_eq!(result.total_files_analyzed, 2);
        assert!(result.themes.is_empty());
    }

    #[tokio::test]
    async fn test_overview_requires_indexed_files() {
        let f = fixture(MockProvider::default());
        let err = f.orchestrator.overview(OverviewRequest::new("s1", "t")).await.unwrap_err();
        assert!(matches!(err, DecksterError::InvalidRequest(_)));
        assert!(f.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_overview_provider_failure_has_own_code() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;
        f.provider.push_err(ProviderError::Api { code: 400, message: "bad store".into() });

        let err = f.orchestrator.overview(OverviewRequest::new("s1", "t")).await.unwrap_err();
        assert_eq!(err.error_code(), "FILE_RAG_OVERVIEW_FAILED");
        assert_eq!(f.provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_detailed_filters_by_confidence_and_caps_chunks() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;
        f.provider.push_ok(
            &fenced(json!({
                "content_chunks": [
                    {"content": "Revenue up 15%", "source_file": "q3.pdf", "page_reference": 3, "confidence_score": 0.95},
                    {"content": "Maybe churn", "confidence_score": 0.4},
                    {"content": "Margin 22%", "confidence_score": 0.9},
                    {"content": "Headcount 120"}
                ],
                "synthesized_content": "Q3 revenue grew 15%.",
                "query_interpretation": "Q3 financial results"
            })),
            Some(grounding("docs/q3", "Revenue up 15%")),
        );

        let mut request = DetailedRequest::new("s1", "Q3 revenue");
        request.max_chunks = 2;
        request.min_confidence = 0.7;
        let result = f.orchestrator.detailed(request).await.unwrap();

        assert_eq!(result.total_chunks_found, 4);
        assert_eq!(result.chunks_returned, 2);
        assert_eq!(result.content_chunks[0].page_reference.as_deref(), Some("3"));
        assert_eq!(result.content_chunks[1].content, "Margin 22%");
        assert_eq!(result.synthesized_content, "Q3 revenue grew 15%.");
        assert_eq!(result.query_interpretation, "Q3 financial results");
        assert_eq!(result.citations.len(), 1);
        assert_eq!(f.provider.calls()[0].temperature, Some(DETAILED_TEMPERATURE));
    }

    #[tokio::test]
    async fn test_detailed_retries_transient_errors() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;
        f.provider.push_err(ProviderError::Api { code: 503, message: "overloaded".into() });
        f.provider.push_ok("no json here", None);

        let result = f.orchestrator.detailed(DetailedRequest::new("s1", "q")).await.unwrap();
        assert_eq!(result.attempts, 2);
        assert!(result.content_chunks.is_empty());
        assert_eq!(result.synthesized_content, "");
    }

    #[tokio::test]
    async fn test_detailed_rejects_bad_limits() {
        let f = fixture(MockProvider::default());
        index_file(&f.repo, "s1", "q3.pdf", "docs/q3").await;

        let mut request = DetailedRequest::new("s1", "q");
        request.max_chunks = 0;
        let err = f.orchestrator.detailed(request).await.unwrap_err();
        assert!(matches!(err, DecksterError::InvalidRequest(_)));

        let mut request = DetailedRequest::new("s1", "q");
        request.min_confidence = 1.5;
        let err = f.orchestrator.detailed(request).await.unwrap_err();
        assert!(matches!(err, DecksterError::InvalidRequest(_)));

        let err = f.orchestrator.detailed(DetailedRequest::new("s1", " ")).await.unwrap_err();
        assert!(matches!(err, DecksterError::InvalidRequest(_)));
        assert!(f.provider.calls().is_empty());
    }
}
