//! Transfer executor: relays a staged artifact to the item's target.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::phase::{drive, Driven, PhaseContext};
use crate::config::TargetConfig;
use crate::item::{Item, ItemState, Phase};
use crate::progress::{Interrupt, ProgressSink};
use crate::retry::Failure;
use crate::transfer::{naming, StrategySet, TransferOutcome};

pub(crate) struct TransferExecutor {
    ctx: Arc<PhaseContext>,
    strategies: StrategySet,
    targets: HashMap<String, TargetConfig>,
}

impl TransferExecutor {
    pub fn new(ctx: Arc<PhaseContext>, strategies: StrategySet, targets: &[TargetConfig]) -> Self {
        Self {
            ctx,
            strategies,
            targets: targets
                .iter()
                .map(|t| (t.name.clone(), t.clone()))
                .collect(),
        }
    }

    /// Connect to a configured target. `None` when no such target exists.
    pub async fn check_target(&self, name: &str) -> Option<Result<(), Failure>> {
        let target = self.targets.get(name)?;
        let result = match self.strategies.lookup(&target.protocol) {
            Ok(strategy) => strategy.check(target).await,
            Err(failure) => Err(failure),
        };
        Some(result)
    }

    /// Run one transfer attempt of an item in `Transferring`.
    pub async fn run(&self, item: Item, sink: ProgressSink) {
        let phase = Phase::Transfer;
        let ctx = &self.ctx;

        // Configuration problems are found before any attempt is made.
        let Some(target) = self.targets.get(&item.target) else {
            let failure = Failure::config(format!("unknown target: {}", item.target));
            ctx.fail(&item, phase, failure, None, false, &mut |_| {});
            return;
        };
        let strategy = match self.strategies.lookup(&target.protocol) {
            Ok(strategy) => strategy,
            Err(failure) => {
                ctx.fail(&item, phase, failure, None, false, &mut |_| {});
                return;
            }
        };

        let Some(source) = item.local_path.clone() else {
            let failure = Failure::source("item has no staged artifact");
            ctx.fail(&item, phase, failure, None, true, &mut |_| {});
            return;
        };
        if let Err(e) = tokio::fs::metadata(&source).await {
            let failure = Failure::source(format!(
                "staged artifact {} is unavailable: {}",
                source.display(),
                e
            ));
            ctx.fail(&item, phase, failure, None, true, &mut |_| {});
            return;
        }

        let destination = item
            .destination_path
            .clone()
            .unwrap_or_else(|| naming::destination_path(target, &item, &source));
        let item = if item.destination_path.as_deref() == Some(destination.as_str()) {
            item
        } else {
            match ctx.update(&item, phase, &mut |record| {
                record.destination_path = Some(destination.clone())
            }) {
                Ok(updated) => updated,
                Err(e) => {
                    warn!("Failed to record destination of {}: {}", item.id, e);
                    return;
                }
            }
        };

        debug!(
            "Transferring '{}' to {}:{} via {} (attempt {})",
            item.title,
            target.name,
            destination,
            strategy.kind(),
            item.transfer_attempts + 1
        );

        let driven = drive(
            strategy.transfer(&source, target, &destination, &sink),
            &sink,
            ctx.stall_timeout,
            |snapshot| ctx.persist_progress(&item.id, phase, snapshot),
        )
        .await;
        let snapshot = sink.snapshot();

        match driven {
            Driven::Finished(TransferOutcome::Success {
                bytes,
                resumed_from,
            }) => {
                if resumed_from > 0 {
                    info!(
                        item_id = %item.id,
                        "Resumed '{}' on {} from byte {}",
                        item.title,
                        target.name,
                        resumed_from
                    );
                }
                let completed = ctx.settle(&item, phase, ItemState::Completed, None, "success", &mut |record| {
                    record.progress.transferred_bytes = bytes;
                    record.retry_after = None;
                });
                if completed.is_some() && target.cleanup_after_success {
                    self.cleanup(&item).await;
                }
            }
            Driven::Finished(TransferOutcome::RetryableFailure(failure))
            | Driven::Finished(TransferOutcome::FatalFailure(failure)) => {
                ctx.fail(&item, phase, failure, Some(snapshot), true, &mut |_| {});
            }
            Driven::Finished(TransferOutcome::Interrupted(interrupt)) => {
                ctx.interrupt(&item, phase, interrupt, phase, Some(snapshot), &mut |_| {});
                if interrupt == Interrupt::Cancel {
                    ctx.discard_staging(&item.id).await;
                }
            }
            Driven::Stalled => {
                ctx.stalled(&item, phase, snapshot, &mut |_| {});
            }
        }
    }

    /// Delete the staged artifact of a completed item. Failures are logged only.
    async fn cleanup(&self, item: &Item) {
        if let Some(path) = &item.local_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("Removed staged artifact {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        item_id = %item.id,
                        "Failed to remove staged artifact {}: {}",
                        path.display(),
                        e
                    );
                    return;
                }
            }
        }
        self.ctx.discard_staging(&item.id).await;
    }
}
