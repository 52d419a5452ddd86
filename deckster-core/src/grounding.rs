//! Gemini grounding-metadata adapter.
//!
//! Turns `candidates[0].groundingMetadata` from a `generateContent` response
//! into provider-agnostic [`RawGroundingChunk`]s. Matching against session
//! files happens in [`crate::citations`], not here.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::RawGroundingChunk;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
    #[serde(default)]
    grounding_supports: Vec<GroundingSupport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingChunk {
    retrieved_context: Option<RetrievedContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrievedContext {
    uri: Option<String>,
    document_name: Option<String>,
    title: Option<String>,
    text: Option<String>,
    page_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingSupport {
    #[serde(default)]
    grounding_chunk_indices: Vec<usize>,
    #[serde(default)]
    confidence_scores: Vec<f64>,
}

/// Parse raw grounding metadata. Malformed metadata yields no chunks; web
/// chunks (no `retrievedContext`) are skipped.
pub fn parse_grounding_metadata(raw: &Value) -> Vec<RawGroundingChunk> {
    let metadata: GroundingMetadata = match serde_json::from_value(raw.clone()) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable grounding metadata, treating as no chunks");
            return Vec::new();
        }
    };

    let confidences = chunk_confidences(&metadata);

    metadata
        .grounding_chunks
        .into_iter()
        .enumerate()
        .filter_map(|(idx, chunk)| {
            let ctx = chunk.retrieved_context?;
            let mut locator = Map::new();
            if let Some(title) = &ctx.title {
                locator.insert("title".to_string(), Value::String(title.clone()));
            }
            if let Some(page) = ctx.page_number {
                locator.insert("page".to_string(), Value::from(page));
            }
            Some(RawGroundingChunk {
                source_ref: ctx.document_name.or(ctx.uri).unwrap_or_default(),
                excerpt: ctx.text.unwrap_or_default(),
                confidence: confidences.get(idx).copied().flatten(),
                locator,
            })
        })
        .collect()
}

/// Highest support score per chunk index; `None` where no support cites it.
fn chunk_confidences(metadata: &GroundingMetadata) -> Vec<Option<f64>> {
    let mut scores: Vec<Option<f64>> = vec![None; metadata.grounding_chunks.len()];
    for support in &metadata.grounding_supports {
        for (idx, score) in support
            .grounding_chunk_indices
            .iter()
            .zip(support.confidence_scores.iter())
        {
            if let Some(slot) = scores.get_mut(*idx) {
                *slot = Some(slot.map_or(*score, |s| s.max(*score)));
            }
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_retrieved_context_chunks() {
        let raw = json!({
            "groundingChunks": [
                {"retrievedContext": {
                    "documentName": "fileSearchStores/s/documents/d1",
                    "title": "q3-report.pdf",
                    "text": "Revenue up 15%"
                }}
            ]
        });
        let chunks = parse_grounding_metadata(&raw);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_ref, "fileSearchStores/s/documents/d1");
        assert_eq!(chunks[0].excerpt, "Revenue up 15%");
        assert_eq!(chunks[0].locator["title"], json!("q3-report.pdf"));
        assert_eq!(chunks[0].confidence, None);
    }

    #[test]
    fn test_uri_used_when_document_name_missing() {
        let raw = json!({"groundingChunks": [{"retrievedContext": {"uri": "files/abc", "text": "t"}}]});
        assert_eq!(parse_grounding_metadata(&raw)[0].source_ref, "files/abc");
    }

    #[test]
    fn test_confidence_is_max_over_supports() {
        let raw = json!({
            "groundingChunks": [
                {"retrievedContext": {"uri": "a", "text": "one"}},
                {"retrievedContext": {"uri": "b", "text": "two"}},
                {"retrievedContext": {"uri": "c", "text": "three"}}
            ],
            "groundingSupports": [
                {"groundingChunkIndices": [0, 1], "confidenceScores": [0.4, 0.9]},
                {"groundingChunkIndices": [0], "confidenceScores": [0.7]},
                {"groundingChunkIndices": [9], "confidenceScores": [0.99]}
            ]
        });
        let chunks = parse_grounding_metadata(&raw);
        assert_eq!(chunks[0].confidence, Some(0.7));
        assert_eq!(chunks[1].confidence, Some(0.9));
        assert_eq!(chunks[2].confidence, None);
    }

    #[test]
    fn test_web_chunks_skipped_order_kept() {
        let raw = json!({
            "groundingChunks": [
                {"web": {"uri": "https://example.com", "title": "Example"}},
                {"retrievedContext": {"uri": "b", "text": "second"}},
                {"retrievedContext": {"uri": "a", "text": "third"}}
            ]
        });
        let refs: Vec<_> = parse_grounding_metadata(&raw)
            .into_iter()
            .map(|c| c.source_ref)
            .collect();
        assert_eq!(refs, vec!["b", "a"]);
    }

    #[test]
    fn test_malformed_metadata_yields_nothing() {
        assert!(parse_grounding_metadata(&json!({"groundingChunks": "nope"})).is_empty());
        assert!(parse_grounding_metadata(&json!({})).is_empty());
        assert!(parse_grounding_metadata(&json!(null)).is_empty());
    }
}
