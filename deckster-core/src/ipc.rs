use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::DecksterError;
use crate::models::{DetailedRequest, OverviewRequest};

pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DecksterRequest {
    Ping,
    Health,
    /// Ingest a file from the local filesystem into a session's store.
    IngestPath {
        session_id: String,
        #[serde(default)]
        user_id: Option<String>,
        path: String,
        #[serde(default)]
        media_type: Option<String>,
    },
    ListFiles {
        session_id: String,
    },
    Generate {
        session_id: String,
        prompt: String,
        slide_type: String,
        #[serde(default)]
        context: Map<String, Value>,
        #[serde(default)]
        request_id: Option<Uuid>,
        #[serde(default)]
        user_id: Option<String>,
    },
    /// File-RAG theme overview of a session's indexed files.
    Overview(OverviewRequest),
    /// File-RAG chunk retrieval for a query.
    Detailed(DetailedRequest),
    Stats,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DecksterResponse {
    pub status: String,
    pub data: Option<Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    pub version: String,
}

impl DecksterResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            error_code: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self::err_with_code("INTERNAL", msg)
    }

    pub fn err_with_code(code: &str, msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            error_code: Some(code.to_string()),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

impl From<&DecksterError> for DecksterResponse {
    fn from(e: &DecksterError) -> Self {
        Self::err_with_code(e.error_code(), e.to_string())
    }
}

/// Best-effort media type from a file extension.
pub fn guess_media_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("pptx") => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_msgpack_round_trip() {
        let req = DecksterRequest::Generate {
            session_id: "s1".to_string(),
            prompt: "Make a title slide".to_string(),
            slide_type: "title".to_string(),
            context: Map::new(),
            request_id: None,
            user_id: None,
        };
        let bytes = rmp_serde::to_vec_named(&req).unwrap();
        match rmp_serde::from_slice::<DecksterRequest>(&bytes).unwrap() {
            DecksterRequest::Generate { session_id, slide_type, .. } => {
                assert_eq!(session_id, "s1");
                assert_eq!(slide_type, "title");
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_request_tagged_by_action() {
        let v = serde_json::to_value(DecksterRequest::ListFiles { session_id: "s".into() }).unwrap();
        assert_eq!(v["action"], "list_files");
    }

    #[test]
    fn test_file_rag_request_fills_defaults() {
        let req: DecksterRequest = serde_json::from_value(serde_json::json!({
            "action": "detailed",
            "session_id": "s1",
            "query": "Q3 revenue"
        }))
        .unwrap();
        match req {
            DecksterRequest::Detailed(d) => {
                assert_eq!(d.query, "Q3 revenue");
                assert_eq!(d.max_chunks, 10);
            }
            other => panic!("unexpected request {:?}", other),
        }

        let bytes = rmp_serde::to_vec_named(&DecksterRequest::Overview(OverviewRequest::new("s1", "t"))).unwrap();
        assert!(matches!(
            rmp_serde::from_slice::<DecksterRequest>(&bytes).unwrap(),
            DecksterRequest::Overview(o) if o.max_themes == 5
        ));
    }

    #[test]
    fn test_error_response_carries_code() {
        let err = DecksterError::FileTooLarge { size_bytes: 10, max_bytes: 5 };
        let resp = DecksterResponse::from(&err);
        assert!(!resp.is_ok());
        assert_eq!(resp.error_code.as_deref(), Some("FILE_SIZE_EXCEEDED"));
    }

    #[test]
    fn test_guess_media_type() {
        assert_eq!(guess_media_type("/tmp/Q3.PDF"), "application/pdf");
        assert_eq!(guess_media_type("notes"), "application/octet-stream");
    }
}
