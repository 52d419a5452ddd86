//! Generation ledger: append-only audit of terminal generation outcomes.
//!
//! Written by the orchestrator, read only for aggregate stats. Nothing in
//! the generation path consults it.

use std::sync::Arc;

use deckster_core::models::{LedgerEntry, LedgerStats};
use deckster_core::{LedgerRepository, Result, Storage};
use uuid::Uuid;

#[derive(Clone)]
pub struct GenerationLedger {
    repo: Arc<dyn Storage>,
}

impl GenerationLedger {
    pub fn new(repo: Arc<dyn Storage>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, entry: &LedgerEntry) -> Result<()> {
        self.repo.append(entry).await?;
        tracing::debug!(
            request_id = %entry.request_id,
            session_id = %entry.session_id,
            outcome = entry.outcome.as_str(),
            citations = entry.citations.len(),
            "Recorded generation outcome"
        );
        Ok(())
    }

    pub async fn contains(&self, request_id: Uuid) -> Result<bool> {
        self.repo.contains(request_id).await
    }

    pub async fn stats(&self) -> Result<LedgerStats> {
        self.repo.stats().await
    }
}
