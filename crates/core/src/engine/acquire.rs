//! Acquisition executor: fetches an item's source into the staging area.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::phase::{drive, Driven, PhaseContext};
use crate::acquisition::{file_name_from_url, FetchError, FetchRequest, Fetcher};
use crate::enrichment::{EnrichedMetadata, MetadataEnricher, MetadataQuery};
use crate::item::{Item, ItemState, Phase};
use crate::metrics;
use crate::progress::{Interrupt, ProgressSink};

/// Upper bound on one metadata lookup.
const ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct AcquisitionExecutor {
    ctx: Arc<PhaseContext>,
    fetcher: Arc<dyn Fetcher>,
    enricher: Option<Arc<dyn MetadataEnricher>>,
}

impl AcquisitionExecutor {
    pub fn new(ctx: Arc<PhaseContext>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            ctx,
            fetcher,
            enricher: None,
        }
    }

    pub fn set_enricher(&mut self, enricher: Arc<dyn MetadataEnricher>) {
        self.enricher = Some(enricher);
    }

    /// Run one acquisition attempt of an item in `Acquiring`.
    pub async fn run(&self, item: Item, sink: ProgressSink) {
        let phase = Phase::Acquisition;
        let request = FetchRequest {
            item_id: item.id.clone(),
            url: item.source_url.clone(),
            destination: self
                .ctx
                .staging_dir_for(&item.id)
                .join(file_name_from_url(&item.source_url)),
        };

        debug!(
            "Acquiring '{}' from {} via {} (attempt {})",
            item.title,
            item.source_url,
            self.fetcher.name(),
            item.acquisition_attempts + 1
        );

        let ctx = &self.ctx;
        let (driven, metadata) = tokio::join!(
            drive(
                self.fetcher.fetch(&request, &sink),
                &sink,
                ctx.stall_timeout,
                |snapshot| ctx.persist_progress(&item.id, phase, snapshot),
            ),
            self.enrich(&item),
        );

        let snapshot = sink.snapshot();
        let mut with_metadata = |record: &mut Item| {
            if record.metadata.is_none() {
                record.metadata = metadata.clone();
            }
        };

        match driven {
            Driven::Finished(Ok(artifact)) => {
                info!(
                    item_id = %item.id,
                    "Acquired '{}': {} bytes at {}",
                    item.title,
                    artifact.size_bytes,
                    artifact.path.display()
                );
                let mut record_artifact = |record: &mut Item| {
                    record.local_path = Some(artifact.path.clone());
                    record.progress.acquired_bytes = artifact.size_bytes;
                    record.progress.expected_bytes = Some(artifact.size_bytes);
                    record.retry_after = None;
                    with_metadata(record);
                };

                // A pause that arrived with the last chunk parks the item
                // ahead of its transfer instead of being lost.
                match sink.interrupt() {
                    Some(Interrupt::Pause) => {
                        ctx.interrupt(
                            &item,
                            phase,
                            Interrupt::Pause,
                            Phase::Transfer,
                            None,
                            &mut record_artifact,
                        );
                    }
                    Some(Interrupt::Cancel) => {
                        ctx.interrupt(&item, phase, Interrupt::Cancel, phase, None, &mut record_artifact);
                        ctx.discard_staging(&item.id).await;
                    }
                    None => {
                        ctx.settle(&item, phase, ItemState::Acquired, None, "success", &mut record_artifact);
                    }
                }
            }
            Driven::Finished(Err(FetchError::Interrupted(interrupt))) => {
                ctx.interrupt(&item, phase, interrupt, phase, Some(snapshot), &mut with_metadata);
                if interrupt == Interrupt::Cancel {
                    ctx.discard_staging(&item.id).await;
                }
            }
            Driven::Finished(Err(FetchError::Failed(failure))) => {
                ctx.fail(&item, phase, failure, Some(snapshot), true, &mut with_metadata);
            }
            Driven::Stalled => {
                ctx.stalled(&item, phase, snapshot, &mut with_metadata);
            }
        }
    }

    /// Optional metadata lookup. Never fails the phase.
    async fn enrich(&self, item: &Item) -> Option<EnrichedMetadata> {
        let enricher = self.enricher.as_ref()?;
        if item.metadata.is_some() {
            return None;
        }

        let query = MetadataQuery {
            title: item.title.clone(),
            category: item.category,
            year: item.year,
        };

        let result = match tokio::time::timeout(ENRICHMENT_TIMEOUT, enricher.enrich(&query)).await {
            Ok(result) => result,
            Err(_) => {
                metrics::ENRICHMENT_LOOKUPS
                    .with_label_values(&["timeout"])
                    .inc();
                warn!("{} lookup for '{}' timed out", enricher.name(), item.title);
                return None;
            }
        };

        match result {
            Ok(Some(metadata)) => {
                metrics::ENRICHMENT_LOOKUPS
                    .with_label_values(&["found"])
                    .inc();
                debug!(
                    "{} matched '{}' as {} ({})",
                    enricher.name(),
                    item.title,
                    metadata.title,
                    metadata.external_id
                );
                Some(metadata)
            }
            Ok(None) => {
                metrics::ENRICHMENT_LOOKUPS
                    .with_label_values(&["not_found"])
                    .inc();
                debug!("{} has no match for '{}'", enricher.name(), item.title);
                None
            }
            Err(e) => {
                metrics::ENRICHMENT_LOOKUPS
                    .with_label_values(&["error"])
                    .inc();
                warn!("{} lookup for '{}' failed: {}", enricher.name(), item.title, e);
                None
            }
        }
    }
}
