use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::citation::Citation;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub request_id: Option<Uuid>,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub prompt: String,
    pub slide_type: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl GenerationRequest {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>, slide_type: impl Into<String>) -> Self {
        Self {
            request_id: None,
            session_id: session_id.into(),
            user_id: None,
            prompt: prompt.into(),
            slide_type: slide_type.into(),
            context: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    Grounded,
    Fallback,
}

impl GenerationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMethod::Grounded => "grounded",
            GenerationMethod::Fallback => "fallback",
        }
    }
}

impl fmt::Display for GenerationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grounded" => Ok(GenerationMethod::Grounded),
            "fallback" => Ok(GenerationMethod::Fallback),
            other => Err(format!("unknown generation method '{}'", other)),
        }
    }
}

/// Why a result was produced without retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The session had no indexed files when the call started.
    NoIndexedFiles,
    /// Grounded attempts hit transient errors until the retry budget ran out.
    GroundedExhausted,
    /// The provider rejected the grounded call outright.
    GroundedRejected,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::NoIndexedFiles => "no_indexed_files",
            FallbackReason::GroundedExhausted => "grounded_exhausted",
            FallbackReason::GroundedRejected => "grounded_rejected",
        }
    }
}

impl FromStr for FallbackReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_indexed_files" => Ok(FallbackReason::NoIndexedFiles),
            "grounded_exhausted" => Ok(FallbackReason::GroundedExhausted),
            "grounded_rejected" => Ok(FallbackReason::GroundedRejected),
            other => Err(format!("unknown fallback reason '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingSummary {
    pub used_files: bool,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub request_id: Uuid,
    pub session_id: String,
    pub method: GenerationMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub content: Value,
    pub citations: Vec<Citation>,
    pub citation_schema: u32,
    pub grounding: GroundingSummary,
    pub model_used: String,
    /// Provider calls made across both paths.
    pub attempts: u32,
    pub latency_ms: u64,
    pub generated_at: DateTime<Utc>,
}
