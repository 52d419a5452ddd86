//! Citation normalizer.
//!
//! Resolves provider-agnostic grounding chunks against the files indexed into
//! the requesting session's store. Chunks that do not resolve are dropped;
//! the provider's ordering is kept; confidence is never invented.

use std::collections::HashMap;

use crate::models::{Citation, IngestedFile, RawGroundingChunk};

/// Longest excerpt kept on a citation, in characters.
pub const MAX_EXCERPT_CHARS: usize = 500;

pub fn normalize(
    chunks: &[RawGroundingChunk],
    known_files: &[IngestedFile],
    session_id: &str,
) -> Vec<Citation> {
    let by_uri: HashMap<&str, &IngestedFile> = known_files
        .iter()
        .filter(|f| f.is_indexed() && f.session_id == session_id)
        .filter_map(|f| f.external_uri.as_deref().map(|uri| (uri, f)))
        .collect();

    let mut citations = Vec::with_capacity(chunks.len());
    let mut dropped = 0usize;

    for chunk in chunks {
        let file = match by_uri.get(chunk.source_ref.as_str()) {
            Some(f) => *f,
            None => {
                dropped += 1;
                tracing::warn!(
                    session_id = %session_id,
                    source_ref = %chunk.source_ref,
                    "Dropping grounding chunk that does not resolve to a file of this session"
                );
                continue;
            }
        };

        citations.push(Citation {
            source_file_id: file.file_id,
            file_name: file.name.clone(),
            excerpt: truncate_excerpt(&chunk.excerpt),
            confidence: sanitize_confidence(chunk.confidence),
            locator: chunk.locator.clone(),
        });
    }

    if dropped > 0 {
        tracing::debug!(
            session_id = %session_id,
            kept = citations.len(),
            dropped,
            "Citation normalization dropped unresolved chunks"
        );
    }

    citations
}

/// Out-of-range or non-finite scores are treated as absent rather than clamped.
fn sanitize_confidence(confidence: Option<f64>) -> Option<f64> {
    match confidence {
        Some(c) if c.is_finite() && (0.0..=1.0).contains(&c) => Some(c),
        Some(c) => {
            tracing::debug!(confidence = c, "Discarding out-of-range confidence");
            None
        }
        None => None,
    }
}

fn truncate_excerpt(excerpt: &str) -> String {
    let trimmed = excerpt.trim();
    match trimmed.char_indices().nth(MAX_EXCERPT_CHARS) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}
