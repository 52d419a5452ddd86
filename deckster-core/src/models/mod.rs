pub mod citation;
pub mod file_rag;
pub mod generation;
pub mod ingested_file;
pub mod knowledge_store;
pub mod ledger;

pub use citation::{Citation, RawGroundingChunk, CITATION_SCHEMA_VERSION};
pub use file_rag::{
    ContentChunk, ContentTheme, DataPointSummary, DetailedRequest, DetailedResult,
    DocumentStructure, OverviewRequest, OverviewResult,
};
pub use generation::{
    FallbackReason, GenerationMethod, GenerationRequest, GenerationResult, GroundingSummary,
};
pub use ingested_file::{FileStatus, IngestedFile, NewFile};
pub use knowledge_store::KnowledgeStore;
pub use ledger::{LedgerEntry, LedgerOutcome, LedgerStats};
