//! Prompt assembly and slide-content extraction.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

fn json_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n\s*```").expect("valid json block regex")
    })
}

/// Build the model prompt for a slide request.
pub fn build_prompt(prompt: &str, slide_type: &str, context: &Map<String, Value>) -> String {
    let context = context_json(context);
    format!(
        "{prompt}\n\n\
         Slide type: {slide_type}\n\
         Context: {context}\n\n\
         Respond with a JSON object in a ```json code block with the fields \
         \"title\" (string), \"bullets\" (array of strings) and \"notes\" (string)."
    )
}

fn context_json(context: &Map<String, Value>) -> String {
    serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string())
}

/// Prompt for a file-RAG overview: themes, data points and document layout.
pub fn build_overview_prompt(topic: &str, context: &Map<String, Value>, max_themes: u32) -> String {
    let context = context_json(context);
    format!(
        "Analyze the uploaded documents and give a high-level overview for the topic: \"{topic}\"\n\n\
         Context: {context}\n\n\
         Respond with a JSON object in a ```json code block with the fields:\n\
         - \"themes\": up to {max_themes} objects with \"theme_name\", \"description\", \
         \"relevance_score\" (0.0-1.0), \"source_files\" and \"key_points\" (arrays of strings)\n\
         - \"data_points\": objects with \"category\", \"available_metrics\", \"time_periods\" \
         (arrays of strings) and \"source_file\"\n\
         - \"document_structures\": objects with \"file_name\", \"document_type\", \"sections\" \
         (array of strings), \"page_count\" (integer or null), \"has_tables\" and \"has_charts\" (booleans)\n\
         - \"relevance_summary\": two or three sentences on how relevant the documents are to the topic\n\n\
         Focus on content useful for building a presentation and name the file each item comes from."
    )
}

/// Prompt for file-RAG detailed retrieval: cited chunks plus a synthesis.
pub fn build_detailed_prompt(
    query: &str,
    context: &Map<String, Value>,
    max_chunks: u32,
    min_confidence: f64,
) -> String {
    let context = context_json(context);
    format!(
        "Find specific content in the uploaded documents for the query: \"{query}\"\n\n\
         Context: {context}\n\n\
         Respond with a JSON object in a ```json code block with the fields:\n\
         - \"content_chunks\": up to {max_chunks} objects with \"content\" (exact text or data), \
         \"content_type\" (text|data|quote|statistic), \"source_file\", \"source_uri\", \
         \"page_reference\", \"section_reference\", \"confidence_score\" and \"relevance_to_query\" (0.0-1.0)\n\
         - \"synthesized_content\": one paragraph answering the query, usable on a slide\n\
         - \"query_interpretation\": how the query was understood\n\n\
         Only include chunks with confidence >= {min_confidence}. Prefer specific facts over general statements."
    )
}

/// Parse model output into structured slide content.
///
/// Uses the first fenced JSON block, else the whole text if it is a JSON
/// object, else `{"raw_text": text}`.
pub fn parse_slide_content(text: &str) -> Value {
    if let Some(caps) = json_block_re().captures(text) {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&caps[1]) {
            return v;
        }
    }
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(v @ Value::Object(_)) => v,
        _ => json!({ "raw_text": text }),
    }
}
