use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Version of the citation schema carried in every generation result.
pub const CITATION_SCHEMA_VERSION: u32 = 1;

/// A generated statement traced back to an excerpt of an ingested file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source_file_id: Uuid,
    pub file_name: String,
    pub excerpt: String,
    /// Provider-supplied score in 0.0..=1.0; `None` when the provider gave none.
    pub confidence: Option<f64>,
    #[serde(default)]
    pub locator: Map<String, Value>,
}

/// Provider-agnostic grounding chunk, produced by a response adapter and
/// consumed by the citation normalizer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawGroundingChunk {
    pub source_ref: String,
    pub excerpt: String,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub locator: Map<String, Value>,
}
