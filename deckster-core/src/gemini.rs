//! Gemini File Search binding for [`RetrievalProvider`].
//!
//! - `create_store`  -> `POST fileSearchStores`
//! - `index_file`    -> resumable upload to `{store}:uploadToFileSearchStore`
//!   (a `start` request carrying display name and custom metadata, then the
//!   bytes), then polls the returned long-running operation until `done`
//! - `generate`      -> `POST models/{model}:generateContent`, with a
//!   `fileSearch` tool when a store handle is attached
//!
//! The API key travels in the `x-goog-api-key` header, never in a URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::io::ReaderStream;

use crate::config::{DecksterConfig, GenerationConfig, ProviderConfig};
use crate::provider::{
    DocumentMetadata, GenerateCall, IndexedDocument, ProviderError, ProviderResponse,
    RetrievalProvider,
};

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
use crate::staging::StagedFile;

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub upload_base_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GeminiConfig {
    /// Build from the provider/generation sections. The key falls back to
    /// `GOOGLE_API_KEY` when `api_key` is `None`.
    pub fn from_sections(
        api_key: Option<String>,
        provider: &ProviderConfig,
        generation: &GenerationConfig,
    ) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: provider.model.clone(),
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            upload_base_url: provider.upload_base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(provider.request_timeout_seconds),
            poll_interval: Duration::from_millis(provider.poll_interval_ms),
            temperature: generation.temperature,
            max_output_tokens: generation.max_output_tokens,
        }
    }

    pub fn from_config(config: &DecksterConfig) -> Self {
        Self::from_sections(None, &config.provider, &config.generation)
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateStoreRequest<'a> {
    display_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartUploadRequest<'a> {
    display_name: &'a str,
    mime_type: &'a str,
    custom_metadata: Vec<CustomMetadata<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CustomMetadata<'a> {
    key: &'a str,
    string_value: &'a str,
}

#[derive(Debug, Deserialize)]
struct NamedResource {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<UploadResponse>,
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    document_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    file_search: FileSearch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileSearch {
    file_search_store_names: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiProvider
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let mut key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| ProviderError::Malformed("API key is not a valid header value".to_string()))?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.config.base_url, resource)
    }

    /// Open a resumable upload session and return its upload URL.
    async fn start_upload(
        &self,
        store_handle: &str,
        file: &StagedFile,
        metadata: &DocumentMetadata,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/{}:uploadToFileSearchStore",
            self.config.upload_base_url, store_handle
        );
        let request = StartUploadRequest {
            display_name: &metadata.display_name,
            mime_type: &file.media_type,
            custom_metadata: metadata
                .custom_pairs()
                .into_iter()
                .map(|(key, string_value)| CustomMetadata { key, string_value })
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", file.size_bytes)
            .header("X-Goog-Upload-Header-Content-Type", &file.media_type)
            .json(&request)
            .send()
            .await?;

        check(response)
            .await?
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("upload start returned no upload URL".to_string()))
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, ProviderError> {
        let response = self.client.get(self.url(name)).send().await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Map a non-2xx response to `ProviderError::Api`.
async fn check(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
        .ok()
        .and_then(|e| e.error);

    let (code, message) = error_detail
        .map(|e| (e.code, e.message))
        .unwrap_or((status.as_u16(), error_body));

    tracing::error!(code = code, message = %message, "Gemini API error");

    Err(ProviderError::Api { code, message })
}

#[async_trait]
impl RetrievalProvider for GeminiProvider {
    async fn create_store(&self, display_name: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.url("fileSearchStores"))
            .json(&CreateStoreRequest { display_name })
            .send()
            .await?;

        let store: NamedResource = check(response).await?.json().await?;
        tracing::info!(store = %store.name, "Created file search store");
        Ok(store.name)
    }

    async fn index_file(
        &self,
        store_handle: &str,
        file: &StagedFile,
        metadata: &DocumentMetadata,
    ) -> Result<IndexedDocument, ProviderError> {
        let upload_url = self.start_upload(store_handle, file, metadata).await?;

        let handle = tokio::fs::File::open(file.path()).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));

        let response = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .header(CONTENT_LENGTH, file.size_bytes)
            .body(body)
            .send()
            .await?;

        let mut operation: Operation = check(response).await?.json().await?;

        while !operation.done {
            if operation.name.is_empty() {
                return Err(ProviderError::Malformed(
                    "pending upload operation has no name".to_string(),
                ));
            }
            tracing::debug!(operation = %operation.name, "Waiting for indexing operation");
            tokio::time::sleep(self.config.poll_interval).await;
            operation = self.get_operation(&operation.name).await?;
        }

        if let Some(err) = operation.error {
            return Err(ProviderError::Api {
                code: err.code,
                message: err.message,
            });
        }

        let external_uri = operation
            .response
            .and_then(|r| r.document_name)
            .ok_or_else(|| {
                ProviderError::Malformed("upload operation finished without a document".to_string())
            })?;

        tracing::info!(store = %store_handle, document = %external_uri, name = %file.name, "Indexed file");
        Ok(IndexedDocument { external_uri })
    }

    async fn generate(&self, call: &GenerateCall) -> Result<ProviderResponse, ProviderError> {
        let tools = call
            .store_handle
            .iter()
            .map(|store| Tool {
                file_search: FileSearch {
                    file_search_store_names: vec![store.clone()],
                },
            })
            .collect();

        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(call.prompt.clone()),
                }],
            }],
            tools,
            generation_config: GenerationParams {
                temperature: call.temperature.unwrap_or(self.config.temperature),
                max_output_tokens: call.max_output_tokens.unwrap_or(self.config.max_output_tokens),
            },
        };

        let response = self
            .client
            .post(self.url(&format!("models/{}:generateContent", self.config.model)))
            .json(&request)
            .send()
            .await?;

        let parsed: GenerateResponse = check(response).await?.json().await?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("response has no candidates".to_string()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        Ok(ProviderResponse {
            text,
            grounding: candidate.grounding_metadata,
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================
