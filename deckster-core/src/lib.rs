pub mod citations;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod gemini;
pub mod grounding;
pub mod ipc;
pub mod memory_repository;
pub mod models;
pub mod pg_repository;
pub mod provider;
pub mod repository;
pub mod retry;
pub mod staging;

pub use config::DecksterConfig;
pub use error::{DecksterError, Result};
pub use gemini::{GeminiConfig, GeminiProvider};
pub use memory_repository::MemoryRepository;
pub use pg_repository::PgRepository;
pub use provider::{
    DocumentMetadata, GenerateCall, IndexedDocument, ProviderError, ProviderResponse, RetrievalProvider,
};
pub use repository::{FileRepository, LedgerRepository, Storage, StoreRepository};
pub use retry::RetryPolicy;
pub use staging::{StagedFile, StagingArea};
