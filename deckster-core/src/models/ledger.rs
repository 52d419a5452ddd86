use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::citation::Citation;
use super::generation::{FallbackReason, GenerationMethod, GenerationRequest, GenerationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    Succeeded,
    Failed,
}

impl LedgerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOutcome::Succeeded => "succeeded",
            LedgerOutcome::Failed => "failed",
        }
    }
}

/// One terminal generation outcome. Entries are appended, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub request_id: Uuid,
    pub session_id: String,
    pub prompt: String,
    pub slide_type: String,
    pub context: Value,
    pub outcome: LedgerOutcome,
    pub method: Option<GenerationMethod>,
    pub fallback_reason: Option<FallbackReason>,
    pub citations: Vec<Citation>,
    pub attempts: u32,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn succeeded(request: &GenerationRequest, result: &GenerationResult) -> Self {
        Self {
            request_id: result.request_id,
            session_id: result.session_id.clone(),
            prompt: request.prompt.clone(),
            slide_type: request.slide_type.clone(),
            context: Value::Object(request.context.clone()),
            outcome: LedgerOutcome::Succeeded,
            method: Some(result.method),
            fallback_reason: result.fallback_reason,
            citations: result.citations.clone(),
            attempts: result.attempts,
            latency_ms: result.latency_ms,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(
        request_id: Uuid,
        request: &GenerationRequest,
        fallback_reason: Option<FallbackReason>,
        attempts: u32,
        latency_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            session_id: request.session_id.clone(),
            prompt: request.prompt.clone(),
            slide_type: request.slide_type.clone(),
            context: Value::Object(request.context.clone()),
            outcome: LedgerOutcome::Failed,
            method: None,
            fallback_reason,
            citations: Vec::new(),
            attempts,
            latency_ms,
            error: Some(error.into()),
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregates over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total: u64,
    pub grounded: u64,
    pub fallback: u64,
    pub failed: u64,
    /// grounded / (grounded + fallback); 0 when nothing succeeded.
    pub grounded_ratio: f64,
    /// Mean citation count over grounded results.
    pub avg_citations: f64,
}

impl LedgerStats {
    /// Build stats from raw counts and the citation sum over grounded results.
    pub fn from_counts(grounded: u64, fallback: u64, failed: u64, grounded_citations: u64) -> Self {
        let succeeded = grounded + fallback;
        Self {
            total: succeeded + failed,
            grounded,
            fallback,
            failed,
            grounded_ratio: if succeeded == 0 {
                0.0
            } else {
                grounded as f64 / succeeded as f64
            },
            avg_citations: if grounded == 0 {
                0.0
            } else {
                grounded_citations as f64 / grounded as f64
            },
        }
    }
}
