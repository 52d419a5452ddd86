//! Retrieval/generation provider abstraction.
//!
//! The provider owns indexing, embedding and retrieval; this crate only
//! orchestrates around it. [`crate::gemini::GeminiProvider`] is the
//! production binding.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::staging::StagedFile;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Stored without its URL; request URLs are not safe to surface.
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Provider call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e.without_url())
    }
}

impl ProviderError {
    /// Timeouts, rate limits, 5xx and transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } => true,
            ProviderError::Api { code, .. } => *code == 429 || *code >= 500,
            ProviderError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status()
                        .map(|s| s.as_u16() == 429 || s.is_server_error())
                        .unwrap_or(false)
            }
            ProviderError::Io(_) => true,
            ProviderError::Malformed(_) | ProviderError::MissingApiKey => false,
        }
    }
}

/// Result of a completed indexing operation.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub external_uri: String,
}

/// Attributes recorded on the provider-side document at upload time.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMetadata {
    pub display_name: String,
    pub session_id: String,
    pub user_id: Option<String>,
}

impl DocumentMetadata {
    /// Key/value pairs attached as custom metadata; `user_id` only when known.
    pub fn custom_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![("session_id", self.session_id.as_str())];
        if let Some(user_id) = &self.user_id {
            pairs.push(("user_id", user_id.as_str()));
        }
        pairs.push(("original_filename", self.display_name.as_str()));
        pairs
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateCall {
    pub prompt: String,
    /// Attach this store as a file-search tool; `None` for plain generation.
    pub store_handle: Option<String>,
    /// Per-call overrides of the configured sampling parameters.
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl GenerateCall {
    pub fn plain(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn grounded(prompt: impl Into<String>, store_handle: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            store_handle: Some(store_handle.into()),
            ..Self::default()
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = Some(temperature);
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub text: String,
    /// Provider-shaped grounding metadata, parsed by [`crate::grounding`].
    pub grounding: Option<Value>,
}

#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    /// Create an empty knowledge store and return its handle.
    async fn create_store(&self, display_name: &str) -> Result<String, ProviderError>;

    /// Upload a staged file into a store and wait for indexing to finish.
    async fn index_file(
        &self,
        store_handle: &str,
        file: &StagedFile,
        metadata: &DocumentMetadata,
    ) -> Result<IndexedDocument, ProviderError>;

    async fn generate(&self, call: &GenerateCall) -> Result<ProviderResponse, ProviderError>;

    /// Model identifier reported on generation results.
    fn model(&self) -> &str;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout { seconds: 60 }.is_transient());
        for code in [429, 500, 503] {
            assert!(ProviderError::Api { code, message: String::new() }.is_transient());
        }
        for code in [400, 403, 404] {
            assert!(!ProviderError::Api { code, message: String::new() }.is_transient());
        }
        assert!(!ProviderError::Malformed("x".into()).is_transient());
        assert!(!ProviderError::MissingApiKey.is_transient());
    }

    #[test]
    fn test_custom_pairs_skip_missing_user() {
        let mut metadata = DocumentMetadata {
            display_name: "q3.pdf".to_string(),
            session_id: "s1".to_string(),
            user_id: None,
        };
        assert_eq!(metadata.custom_pairs(), vec![("session_id", "s1"), ("original_filename", "q3.pdf")]);

        metadata.user_id = Some("u1".to_string());
        assert_eq!(metadata.custom_pairs().len(), 3);
    }
}
