//! File-RAG overview and detailed retrieval over a session's indexed files.
//!
//! Model output is read leniently: missing fields take defaults, and list
//! items that are not JSON objects are skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::citation::Citation;

pub const DEFAULT_MAX_THEMES: u32 = 5;
pub const DEFAULT_MAX_CHUNKS: u32 = 10;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

/// Score assumed when the model omits or garbles one.
const DEFAULT_SCORE: f64 = 0.8;

fn default_max_themes() -> u32 {
    DEFAULT_MAX_THEMES
}

fn default_max_chunks() -> u32 {
    DEFAULT_MAX_CHUNKS
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverviewRequest {
    pub session_id: String,
    pub topic: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default = "default_max_themes")]
    pub max_themes: u32,
}

impl OverviewRequest {
    pub fn new(session_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            topic: topic.into(),
            context: Map::new(),
            max_themes: DEFAULT_MAX_THEMES,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetailedRequest {
    pub session_id: String,
    pub query: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl DetailedRequest {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            context: Map::new(),
            max_chunks: DEFAULT_MAX_CHUNKS,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTheme {
    pub theme_name: String,
    pub description: String,
    pub relevance_score: f64,
    pub source_files: Vec<String>,
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPointSummary {
    pub category: String,
    pub available_metrics: Vec<String>,
    pub time_periods: Vec<String>,
    pub source_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub file_name: String,
    pub document_type: String,
    pub sections: Vec<String>,
    pub page_count: Option<u32>,
    pub has_tables: bool,
    pub has_charts: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub content: String,
    pub content_type: String,
    pub source_file: String,
    pub source_uri: Option<String>,
    pub page_reference: Option<String>,
    pub section_reference: Option<String>,
    pub confidence_score: f64,
    pub relevance_to_query: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewResult {
    pub session_id: String,
    pub topic: String,
    pub themes: Vec<ContentTheme>,
    pub data_points: Vec<DataPointSummary>,
    pub document_structures: Vec<DocumentStructure>,
    pub relevance_summary: String,
    pub citations: Vec<Citation>,
    pub total_files_analyzed: usize,
    pub model_used: String,
    pub attempts: u32,
    pub latency_ms: u64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedResult {
    pub session_id: String,
    pub query: String,
    pub content_chunks: Vec<ContentChunk>,
    pub synthesized_content: String,
    pub query_interpretation: String,
    /// Chunks the model reported, before the confidence filter and cap.
    pub total_chunks_found: usize,
    pub chunks_returned: usize,
    pub citations: Vec<Citation>,
    pub model_used: String,
    pub attempts: u32,
    pub latency_ms: u64,
    pub generated_at: DateTime<Utc>,
}

// =============================================================================
// Lenient readers
// =============================================================================

fn text(item: &Map<String, Value>, key: &str, default: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Strings and numbers are both accepted, since models mix them freely.
fn optional_text(item: &Map<String, Value>, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn texts(item: &Map<String, Value>, key: &str) -> Vec<String> {
    item.get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn score(item: &Map<String, Value>, key: &str) -> f64 {
    let raw = match item.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    raw.filter(|v: &f64| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_SCORE)
}

fn flag(item: &Map<String, Value>, key: &str) -> bool {
    item.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Apply `read` to every object under `key`; anything else is skipped.
pub fn read_items<T>(payload: &Value, key: &str, read: fn(&Map<String, Value>) -> T) -> Vec<T> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).map(read).collect())
        .unwrap_or_default()
}

impl ContentTheme {
    pub fn read(item: &Map<String, Value>) -> Self {
        Self {
            theme_name: text(item, "theme_name", "Unknown"),
            description: text(item, "description", ""),
            relevance_score: score(item, "relevance_score"),
            source_files: texts(item, "source_files"),
            key_points: texts(item, "key_points"),
        }
    }
}

impl DataPointSummary {
    pub fn read(item: &Map<String, Value>) -> Self {
        Self {
            category: text(item, "category", "General"),
            available_metrics: texts(item, "available_metrics"),
            time_periods: texts(item, "time_periods"),
            source_file: text(item, "source_file", "Unknown"),
        }
    }
}

impl DocumentStructure {
    pub fn read(item: &Map<String, Value>) -> Self {
        Self {
            file_name: text(item, "file_name", "Unknown"),
            document_type: text(item, "document_type", "document"),
            sections: texts(item, "sections"),
            page_count: item
                .get("page_count")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
            has_tables: flag(item, "has_tables"),
            has_charts: flag(item, "has_charts"),
        }
    }
}

impl ContentChunk {
    pub fn read(item: &Map<String, Value>) -> Self {
        Self {
            content: text(item, "content", ""),
            content_type: text(item, "content_type", "text"),
            source_file: text(item, "source_file", "Unknown"),
            source_uri: optional_text(item, "source_uri"),
            page_reference: optional_text(item, "page_reference"),
            section_reference: optional_text(item, "section_reference"),
            confidence_score: score(item, "confidence_score"),
            relevance_to_query: score(item, "relevance_to_query"),
        }
    }
}
