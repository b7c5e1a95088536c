//! Machinery shared by the acquisition and transfer executors.
//!
//! A phase call runs under [`drive`], which samples its progress sink on a
//! fixed cadence and gives up on it after the stall timeout. Every outcome
//! is written back through [`PhaseContext`] as a compare-and-transition out
//! of the phase's active state.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::item::{Item, ItemError, ItemState, ItemStore, LastError, Phase};
use crate::metrics;
use crate::progress::{Interrupt, ProgressSink, ProgressSnapshot};
use crate::retry::{Decision, ErrorKind, Failure, RetryPolicy};

/// How a driven phase call ended.
#[derive(Debug)]
pub(crate) enum Driven<T> {
    Finished(T),
    /// No byte progress within the stall timeout; the call was dropped.
    Stalled,
}

/// Run `call` to completion while sampling `sink` every progress interval.
///
/// `on_sample` sees each changed snapshot. A zero `stall_timeout` disables
/// stall detection.
pub(crate) async fn drive<F, T>(
    call: F,
    sink: &ProgressSink,
    stall_timeout: Duration,
    mut on_sample: impl FnMut(ProgressSnapshot),
) -> Driven<T>
where
    F: Future<Output = T>,
{
    tokio::pin!(call);

    let stall = async {
        if stall_timeout.is_zero() {
            std::future::pending::<()>().await;
        } else {
            sink.stalled(stall_timeout).await;
        }
    };
    tokio::pin!(stall);

    let mut ticker = tokio::time::interval(sink.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut last = sink.snapshot();

    loop {
        tokio::select! {
            biased;
            out = &mut call => return Driven::Finished(out),
            _ = &mut stall => return Driven::Stalled,
            _ = ticker.tick() => {
                let snapshot = sink.snapshot();
                if snapshot != last {
                    last = snapshot;
                    on_sample(snapshot);
                }
            }
        }
    }
}

/// Write `snapshot` into the progress fields owned by `phase`.
///
/// An empty snapshot (nothing reported yet) leaves resumed progress alone.
fn apply_progress(item: &mut Item, phase: Phase, snapshot: &ProgressSnapshot) {
    if *snapshot == ProgressSnapshot::default() {
        return;
    }
    match phase {
        Phase::Acquisition => {
            item.progress.acquired_bytes = snapshot.bytes;
            if snapshot.total.is_some() {
                item.progress.expected_bytes = snapshot.total;
            }
        }
        Phase::Transfer => item.progress.transferred_bytes = snapshot.bytes,
    }
    item.progress.rate_bps = snapshot.rate_bps;
}

fn elapsed_secs(started: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    started
        .map(|at| (now - at).num_milliseconds().max(0) as f64 / 1000.0)
        .unwrap_or(0.0)
}

/// Store access and policy for running phases.
pub(crate) struct PhaseContext {
    pub store: Arc<dyn ItemStore>,
    pub policy: RetryPolicy,
    pub stall_timeout: Duration,
    pub staging_dir: PathBuf,
}

impl PhaseContext {
    /// Staging directory of one item.
    pub fn staging_dir_for(&self, item_id: &str) -> PathBuf {
        self.staging_dir.join(item_id)
    }

    /// Remove everything staged for an item.
    pub async fn discard_staging(&self, item_id: &str) {
        let dir = self.staging_dir_for(item_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("Removed staging directory {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staging directory {}: {}", dir.display(), e),
        }
    }

    /// Persist a progress sample of a running phase.
    pub fn persist_progress(&self, item_id: &str, phase: Phase, snapshot: ProgressSnapshot) {
        let state = phase.active_state();
        let result = self
            .store
            .compare_and_transition(item_id, state, state, &mut |item| {
                apply_progress(item, phase, &snapshot)
            });
        match result {
            Ok(_) => debug!(
                item_id = %item_id,
                "{} progress: {} bytes at {} B/s",
                phase,
                snapshot.bytes,
                snapshot.rate_bps
            ),
            Err(e) => warn!("Failed to persist {} progress for {}: {}", phase, item_id, e),
        }
    }

    /// Update a running item without leaving its active state.
    pub fn update(
        &self,
        item: &Item,
        phase: Phase,
        mutator: &mut dyn FnMut(&mut Item),
    ) -> Result<Item, ItemError> {
        let state = phase.active_state();
        self.store.compare_and_transition(&item.id, state, state, mutator)
    }

    /// Move a running item out of its active state.
    ///
    /// Records the end of the phase and the final progress sample. Returns
    /// `None` when the write was refused, which is logged.
    pub fn settle(
        &self,
        item: &Item,
        phase: Phase,
        to: ItemState,
        snapshot: Option<ProgressSnapshot>,
        result: &str,
        mutator: &mut dyn FnMut(&mut Item),
    ) -> Option<Item> {
        let from = phase.active_state();
        let now = Utc::now();
        let outcome = self.store.compare_and_transition(&item.id, from, to, &mut |record| {
            if let Some(snapshot) = &snapshot {
                apply_progress(record, phase, snapshot);
            }
            record.progress.rate_bps = 0;
            record.phase_ended_at = Some(now);
            mutator(record);
        });

        metrics::PHASE_OUTCOMES
            .with_label_values(&[phase.as_str(), result])
            .inc();
        metrics::PHASE_DURATION
            .with_label_values(&[phase.as_str(), result])
            .observe(elapsed_secs(item.phase_started_at, now));

        match outcome {
            Ok(updated) => {
                info!(
                    item_id = %updated.id,
                    from = %from,
                    to = %to,
                    "Item '{}' {} phase ended: {}",
                    updated.title,
                    phase,
                    result
                );
                Some(updated)
            }
            Err(e) => {
                warn!("Failed to record {} of {}: {}", result, item.id, e);
                None
            }
        }
    }

    /// Apply the retry policy to a failed attempt.
    ///
    /// `consume_attempt` is false for failures found before any attempt was
    /// made (unknown target or protocol).
    pub fn fail(
        &self,
        item: &Item,
        phase: Phase,
        failure: Failure,
        snapshot: Option<ProgressSnapshot>,
        consume_attempt: bool,
        mutator: &mut dyn FnMut(&mut Item),
    ) -> Option<Item> {
        let attempts = item.attempts(phase) + u32::from(consume_attempt);
        let decision = self
            .policy
            .evaluate(attempts, &failure, item.mismatches(phase));
        let last_error = LastError::new(phase, &failure);
        let mismatch = failure.kind == ErrorKind::ChecksumMismatch;

        match decision {
            Decision::Retry { delay } => {
                metrics::RETRY_ATTEMPTS
                    .with_label_values(&[phase.as_str()])
                    .inc();
                warn!(
                    item_id = %item.id,
                    "{} attempt {}/{} of '{}' failed ({}); retrying in {:?}",
                    phase,
                    attempts,
                    self.policy.max_attempts(),
                    item.title,
                    failure,
                    delay
                );
                let retry_after = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                self.settle(item, phase, phase.queue_state(), snapshot, "retry", &mut |record| {
                    record.set_attempts(phase, attempts);
                    if mismatch {
                        record.record_mismatch(phase);
                    }
                    record.last_error = Some(last_error.clone());
                    record.retry_after = Some(retry_after);
                    mutator(record);
                })
            }
            Decision::Exhausted => {
                warn!(
                    item_id = %item.id,
                    "{} of '{}' failed after {} attempt(s): {}",
                    phase,
                    item.title,
                    attempts,
                    failure
                );
                self.settle(item, phase, ItemState::Failed, snapshot, "failed", &mut |record| {
                    record.set_attempts(phase, attempts);
                    if mismatch {
                        record.record_mismatch(phase);
                    }
                    record.last_error = Some(last_error.clone());
                    record.retry_after = None;
                    mutator(record);
                })
            }
        }
    }

    /// Record a cooperative stop. `resume_phase` is where a resume re-queues.
    pub fn interrupt(
        &self,
        item: &Item,
        phase: Phase,
        interrupt: Interrupt,
        resume_phase: Phase,
        snapshot: Option<ProgressSnapshot>,
        mutator: &mut dyn FnMut(&mut Item),
    ) -> Option<Item> {
        match interrupt {
            Interrupt::Pause => {
                self.settle(item, phase, ItemState::Paused, snapshot, "paused", &mut |record| {
                    record.paused_phase = Some(resume_phase);
                    mutator(record);
                })
            }
            Interrupt::Cancel => {
                self.settle(item, phase, ItemState::Cancelled, snapshot, "cancelled", mutator)
            }
        }
    }

    /// Record a stall and apply the retry policy to it.
    pub fn stalled(
        &self,
        item: &Item,
        phase: Phase,
        snapshot: ProgressSnapshot,
        mutator: &mut dyn FnMut(&mut Item),
    ) -> Option<Item> {
        metrics::STALL_DETECTIONS
            .with_label_values(&[phase.as_str()])
            .inc();
        let failure = Failure::stalled(self.stall_timeout);
        self.fail(item, phase, failure, Some(snapshot), true, mutator)
    }
}
