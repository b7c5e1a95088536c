//! Manifest ingestion.
//!
//! A manifest is a lazy, finite stream of raw candidates. Sources are not
//! restartable: ingesting again means opening a new source.

mod m3u;

pub use m3u::M3uManifest;

use tracing::{info, warn};

use crate::classifier::RawCandidate;
use crate::engine::{Engine, EngineError};
use crate::item::ItemError;

/// A stream of raw candidates from one manifest.
pub trait ManifestSource: Iterator<Item = RawCandidate> {
    /// Label used in logs.
    fn name(&self) -> &str;
}

/// A candidate that did not become an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCandidate {
    pub title: String,
    pub url: String,
    pub reason: String,
}

/// Result of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Ids of the items created.
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedCandidate>,
    /// Ids of the live items that already covered a candidate.
    pub duplicates: Vec<String>,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len() + self.duplicates.len()
    }
}

/// Submit every candidate to the engine, in order.
pub fn ingest<I>(engine: &Engine, candidates: I) -> IngestReport
where
    I: IntoIterator<Item = RawCandidate>,
{
    let mut report = IngestReport::default();

    for candidate in candidates {
        let title = candidate.title.clone();
        let url = candidate.url.clone();
        match engine.enqueue(candidate) {
            Ok(item) => report.accepted.push(item.id),
            Err(EngineError::Item(ItemError::DuplicateItem { existing_id, .. })) => {
                report.duplicates.push(existing_id)
            }
            Err(EngineError::Rejected(rejection)) => report.rejected.push(RejectedCandidate {
                title,
                url,
                reason: rejection.reason().to_string(),
            }),
            Err(e) => {
                warn!("Failed to enqueue '{}': {}", title, e);
                report.rejected.push(RejectedCandidate {
                    title,
                    url,
                    reason: "store_error".to_string(),
                });
            }
        }
    }

    report
}

/// [`ingest`] a named source and log the summary.
pub fn ingest_source<S: ManifestSource>(engine: &Engine, source: S) -> IngestReport {
    let name = source.name().to_string();
    let report = ingest(engine, source);
    info!(
        "Ingested {}: {} accepted, {} rejected, {} duplicate(s)",
        name,
        report.accepted.len(),
        report.rejected.len(),
        report.duplicates.len()
    );
    report
}
