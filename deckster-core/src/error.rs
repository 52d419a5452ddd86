use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecksterError {
    #[error("File size {size_bytes} bytes exceeds the {max_bytes} byte limit")]
    FileTooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("Session already holds {current} of {max} files")]
    SessionFileLimitExceeded { current: u32, max: u32 },

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Knowledge store creation failed: {0}")]
    StoreCreationFailed(String),

    #[error("File ingestion failed: {0}")]
    IngestionFailed(String),

    #[error("Content generation failed: {0}")]
    GenerationFailed(String),

    #[error("File overview failed: {0}")]
    OverviewFailed(String),

    #[error("Detailed file retrieval failed: {0}")]
    DetailedFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl DecksterError {
    /// Stable machine-readable code exposed to callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            DecksterError::FileTooLarge { .. } => "FILE_SIZE_EXCEEDED",
            DecksterError::SessionFileLimitExceeded { .. } => "MAX_FILES_EXCEEDED",
            DecksterError::InvalidUpload(_) => "INVALID_UPLOAD",
            DecksterError::InvalidRequest(_) => "INVALID_REQUEST",
            DecksterError::StoreCreationFailed(_) => "STORE_CREATION_FAILED",
            DecksterError::IngestionFailed(_) => "FILE_INGESTION_FAILED",
            DecksterError::GenerationFailed(_) => "GENERATION_FAILED",
            DecksterError::OverviewFailed(_) => "FILE_RAG_OVERVIEW_FAILED",
            DecksterError::DetailedFailed(_) => "FILE_RAG_DETAILED_FAILED",
            _ => "INTERNAL",
        }
    }

    /// Validation errors are rejected before any provider call and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DecksterError::FileTooLarge { .. }
                | DecksterError::SessionFileLimitExceeded { .. }
                | DecksterError::InvalidUpload(_)
                | DecksterError::InvalidRequest(_)
        )
    }
}

pub type Result<T, E = DecksterError> = std::result::Result<T, E>;
