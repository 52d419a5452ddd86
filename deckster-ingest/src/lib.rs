//! Session knowledge-store registry and the file ingestion pipeline.

pub mod pipeline;
pub mod registry;

#[cfg(test)]
mod testing;

pub use pipeline::{IngestSettings, IngestionPipeline, Upload};
pub use registry::StoreRegistry;
