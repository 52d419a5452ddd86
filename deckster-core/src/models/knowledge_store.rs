use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A session's handle into the provider's file-search store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct KnowledgeStore {
    pub session_id: String,
    pub user_id: Option<String>,
    pub store_handle: String,
    pub display_name: String,
    pub file_count: i32,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeStore {
    pub fn display_name_for(session_id: &str) -> String {
        format!("Session_{}", session_id)
    }
}
