use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use deckster_core::ipc::{guess_media_type, DecksterRequest, DecksterResponse};
use deckster_core::models::GenerationRequest;
use deckster_core::{DecksterConfig, DecksterError, RetrievalProvider, Storage};
use deckster_ingest::{IngestSettings, IngestionPipeline, Upload};
use sqlx::PgPool;

use crate::subsystems::generate::Orchestrator;
use crate::subsystems::ledger::GenerationLedger;

/// Everything a request handler needs, shared by the IPC and HTTP surfaces.
pub struct AppContext {
    pub config: DecksterConfig,
    pub provider: Arc<dyn RetrievalProvider>,
    pub pipeline: IngestionPipeline,
    pub orchestrator: Orchestrator,
    pub ledger: GenerationLedger,
    /// Present when the Postgres backend is in use; reported by health checks.
    pub pool: Option<PgPool>,
}

impl AppContext {
    pub fn new(
        config: DecksterConfig,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn RetrievalProvider>,
        pool: Option<PgPool>,
    ) -> Self {
        let ledger = GenerationLedger::new(storage.clone());
        let pipeline = IngestionPipeline::new(
            storage.clone(),
            provider.clone(),
            IngestSettings::from_config(&config.ingestion),
        );
        let orchestrator = Orchestrator::new(
            storage,
            provider.clone(),
            ledger.clone(),
            config.generation.retry_policy(),
        );
        Self {
            config,
            provider,
            pipeline,
            orchestrator,
            ledger,
            pool,
        }
    }
}

pub async fn handle_request(request: DecksterRequest, ctx: &AppContext) -> DecksterResponse {
    match request {
        DecksterRequest::Ping => DecksterResponse::pong(),
        DecksterRequest::Health => health(ctx).await,
        DecksterRequest::IngestPath {
            session_id,
            user_id,
            path,
            media_type,
        } => match handle_ingest_path(ctx, &session_id, user_id.as_deref(), &path, media_type).await {
            Ok(data) => DecksterResponse::ok(data),
            Err(e) => DecksterResponse::from(&e),
        },
        DecksterRequest::ListFiles { session_id } => match ctx.pipeline.list_files(&session_id).await {
            Ok(files) => DecksterResponse::ok(serde_json::json!({
                "session_id": session_id,
                "count": files.len(),
                "files": files,
            })),
            Err(e) => DecksterResponse::from(&e),
        },
        DecksterRequest::Generate {
            session_id,
            prompt,
            slide_type,
            context,
            request_id,
            user_id,
        } => {
            let request = GenerationRequest {
                request_id,
                session_id,
                user_id,
                prompt,
                slide_type,
                context,
            };
            match ctx.orchestrator.generate(request).await {
                Ok(result) => to_response(&result),
                Err(e) => DecksterResponse::from(&e),
            }
        }
        DecksterRequest::Overview(request) => match ctx.orchestrator.overview(request).await {
            Ok(result) => to_response(&result),
            Err(e) => DecksterResponse::from(&e),
        },
        DecksterRequest::Detailed(request) => match ctx.orchestrator.detailed(request).await {
            Ok(result) => to_response(&result),
            Err(e) => DecksterResponse::from(&e),
        },
        DecksterRequest::Stats => match ctx.ledger.stats().await {
            Ok(stats) => to_response(&stats),
            Err(e) => DecksterResponse::from(&e),
        },
    }
}

async fn health(ctx: &AppContext) -> DecksterResponse {
    let backend = match &ctx.pool {
        Some(pool) => match deckster_core::db::health_check(pool).await {
            Ok(v) => v,
            Err(e) => return DecksterResponse::err(format!("DB Health Check failed: {}", e)),
        },
        None => "memory".to_string(),
    };
    DecksterResponse::ok(serde_json::json!({
        "status": "healthy",
        "storage": backend,
        "provider": ctx.provider.name(),
        "model": ctx.provider.model(),
    }))
}

/// Ingest a file from the local filesystem.
async fn handle_ingest_path(
    ctx: &AppContext,
    session_id: &str,
    user_id: Option<&str>,
    path: &str,
    media_type: Option<String>,
) -> Result<serde_json::Value, DecksterError> {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| DecksterError::InvalidUpload(format!("cannot read {}: {}", path, e)))?;
    // Checked before reading so an oversized file is never loaded.
    if metadata.len() > ctx.pipeline.settings().max_file_bytes {
        return Err(DecksterError::FileTooLarge {
            size_bytes: metadata.len(),
            max_bytes: ctx.pipeline.settings().max_file_bytes,
        });
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| DecksterError::InvalidUpload(format!("cannot read {}: {}", path, e)))?;

    let upload = Upload {
        media_type: media_type.unwrap_or_else(|| guess_media_type(path).to_string()),
        name,
        bytes: Bytes::from(bytes),
    };

    let file = ctx.pipeline.ingest(session_id, user_id, upload).await?;
    serde_json::to_value(&file).map_err(|e| DecksterError::Other(e.to_string()))
}

fn to_response<T: serde::Serialize>(value: &T) -> DecksterResponse {
    match serde_json::to_value(value) {
        Ok(v) => DecksterResponse::ok(v),
        Err(e) => DecksterResponse::err(format!("Serialization error: {}", e)),
    }
}
