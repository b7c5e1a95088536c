//! The orchestration engine.
//!
//! Classified items enter the store as `Pending`. An admission loop moves
//! them into bounded acquisition and per-target transfer slots; each
//! admitted phase runs as its own task and reports back only through state
//! transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, Notify};
use tracing::{error, info, warn};

use super::acquire::AcquisitionExecutor;
use super::config::EngineConfig;
use super::phase::PhaseContext;
use super::relay::TransferExecutor;
use super::scheduler::{Admission, AdmissionScheduler};
use super::signal::SignalRegistry;
use super::types::{ConnectionCheck, EngineError, EngineStatus, TargetStatus, TickReport};
use crate::acquisition::Fetcher;
use crate::classifier::{Classifier, RawCandidate};
use crate::config::{Config, TargetConfig};
use crate::enrichment::MetadataEnricher;
use crate::item::{Item, ItemError, ItemFilter, ItemState, ItemStore, Phase};
use crate::metrics;
use crate::progress::{ProgressSink, Signal};
use crate::retry::RetryPolicy;
use crate::transfer::StrategySet;

/// Bound on re-reads when an item changes state under a control operation.
const CONTROL_RETRIES: usize = 50;

/// Everything shared between the public handle, the admission loop and
/// the phase tasks.
struct EngineCore {
    config: EngineConfig,
    store: Arc<dyn ItemStore>,
    classifier: Classifier,
    scheduler: AdmissionScheduler,
    signals: SignalRegistry,
    acquisition: AcquisitionExecutor,
    transfer: TransferExecutor,
    phases: Arc<PhaseContext>,
    targets: Vec<TargetConfig>,
    wake: Notify,
}

/// The acquisition and transfer orchestration engine.
pub struct Engine {
    core: Arc<EngineCore>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Engine {
    /// Create an engine over `store`, fetching with `fetcher` and relaying
    /// with `strategies`.
    pub fn new(
        config: &Config,
        store: Arc<dyn ItemStore>,
        fetcher: Arc<dyn Fetcher>,
        strategies: StrategySet,
    ) -> Self {
        let phases = Arc::new(PhaseContext {
            store: Arc::clone(&store),
            policy: RetryPolicy::new(config.retry.clone()),
            stall_timeout: config.engine.stall_timeout(),
            staging_dir: config.engine.staging_dir.clone(),
        });

        let core = EngineCore {
            config: config.engine.clone(),
            store,
            classifier: Classifier::new(config.classifier.clone(), config.targets.clone()),
            scheduler: AdmissionScheduler::new(config.engine.acquisition_ceiling, &config.targets),
            signals: SignalRegistry::new(),
            acquisition: AcquisitionExecutor::new(Arc::clone(&phases), fetcher),
            transfer: TransferExecutor::new(Arc::clone(&phases), strategies, &config.targets),
            phases,
            targets: config.targets.clone(),
            wake: Notify::new(),
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            core: Arc::new(core),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Consult `enricher` for metadata during acquisition.
    ///
    /// Must be called before [`Engine::start`].
    pub fn with_enricher(mut self, enricher: Arc<dyn MetadataEnricher>) -> Self {
        match Arc::get_mut(&mut self.core) {
            Some(core) => core.acquisition.set_enricher(enricher),
            None => warn!("Engine already started; ignoring enricher {}", enricher.name()),
        }
        self
    }

    /// Start the admission loop (spawns a background task).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Engine already running");
            return;
        }

        info!(
            "Starting engine: {} acquisition slot(s), {} target(s)",
            self.core.config.acquisition_ceiling,
            self.core.targets.len()
        );

        Self::recover_interrupted(&self.core);
        self.spawn_admission_loop();
    }

    /// Stop admitting work. Phases already running continue to completion.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Engine not running");
            return;
        }

        info!("Stopping engine");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Current engine status.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.is_running(),
            acquisition_ceiling: self.core.scheduler.acquisition().ceiling(),
            acquiring: self.core.scheduler.acquisition().in_flight(),
            targets: self.targets(),
        }
    }

    /// Classify a raw candidate and store it as `Pending`.
    pub fn enqueue(&self, raw: RawCandidate) -> Result<Item, EngineError> {
        let title = raw.title.clone();
        let item = match self.core.classifier.classify(raw) {
            Ok(item) => item,
            Err(rejection) => {
                metrics::ITEMS_REJECTED
                    .with_label_values(&[rejection.reason()])
                    .inc();
                info!("Rejected candidate '{}': {}", title, rejection);
                return Err(rejection.into());
            }
        };

        let item = match self.core.store.insert(item) {
            Ok(item) => item,
            Err(e) => {
                if matches!(e, ItemError::DuplicateItem { .. }) {
                    metrics::ITEMS_REJECTED
                        .with_label_values(&["duplicate"])
                        .inc();
                    info!("Rejected candidate '{}': {}", title, e);
                }
                return Err(e.into());
            }
        };

        metrics::ITEMS_ENQUEUED.inc();
        info!(
            item_id = %item.id,
            to = %item.state,
            "Enqueued '{}' ({}, {:?} priority, {}) for target {}",
            item.title,
            item.category,
            item.priority,
            item.quality,
            item.target
        );
        self.core.wake.notify_one();
        Ok(item)
    }

    /// Current record of an item.
    pub fn item(&self, id: &str) -> Result<Item, EngineError> {
        self.core
            .store
            .get(id)?
            .ok_or_else(|| ItemError::NotFound(id.to_string()).into())
    }

    /// Items matching `filter`, in admission order.
    pub fn items(&self, filter: &ItemFilter) -> Result<Vec<Item>, EngineError> {
        Ok(self.core.store.list(filter)?)
    }

    pub fn count(&self, filter: &ItemFilter) -> Result<i64, EngineError> {
        Ok(self.core.store.count(filter)?)
    }

    /// Remove a finished item and anything still staged for it.
    ///
    /// Only completed, failed or cancelled items can be deleted.
    pub async fn delete(&self, id: &str) -> Result<Item, EngineError> {
        let item = self.item(id)?;
        if !item.state.is_terminal() {
            return Err(EngineError::InvalidOperation(format!(
                "item {} is {}; only finished items can be deleted",
                id, item.state
            )));
        }
        let deleted = self.core.store.delete(id)?;
        self.core.phases.discard_staging(id).await;
        info!(item_id = %id, state = %deleted.state, "Deleted '{}'", deleted.title);
        Ok(deleted)
    }

    /// Pause an item.
    ///
    /// A queued item is paused directly. A running phase is signalled and
    /// the call returns once the phase has stopped cooperatively, or with
    /// the still-running item if it has not stopped within the control
    /// timeout.
    pub async fn pause(&self, id: &str) -> Result<Item, EngineError> {
        for _ in 0..CONTROL_RETRIES {
            let item = self.item(id)?;
            match item.state {
                ItemState::Paused => return Ok(item),
                ItemState::Pending => {
                    match self.core.store.compare_and_transition(
                        id,
                        ItemState::Pending,
                        ItemState::Paused,
                        &mut |record| record.paused_phase = Some(Phase::Acquisition),
                    ) {
                        Ok(paused) => {
                            info!(item_id = %id, from = "pending", to = "paused", "Paused '{}'", paused.title);
                            return Ok(paused);
                        }
                        Err(ItemError::StaleState { .. }) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                state if state.holds_slot() => {
                    if !self.signal_running(id, Signal::Pause).await {
                        return self.item(id);
                    }
                }
                state => {
                    return Err(EngineError::InvalidOperation(format!(
                        "cannot pause item {} in state {}",
                        id, state
                    )))
                }
            }
        }
        Err(self.unsettled(id))
    }

    /// Resume a paused item into the queue of the phase it left.
    pub fn resume(&self, id: &str) -> Result<Item, EngineError> {
        let item = self.item(id)?;
        if item.state != ItemState::Paused {
            return Err(EngineError::InvalidOperation(format!(
                "cannot resume item {} in state {}",
                id, item.state
            )));
        }

        let phase = item.paused_phase.unwrap_or(Phase::Acquisition);
        let to = phase.queue_state();
        let resumed = self.core.store.compare_and_transition(
            id,
            ItemState::Paused,
            to,
            &mut |record| {
                record.paused_phase = None;
                record.retry_after = None;
            },
        )?;

        info!(item_id = %id, from = "paused", to = %to, "Resumed '{}'", resumed.title);
        self.core.wake.notify_one();
        Ok(resumed)
    }

    /// Cancel an item. Staged artifacts are discarded.
    pub async fn cancel(&self, id: &str) -> Result<Item, EngineError> {
        for _ in 0..CONTROL_RETRIES {
            let item = self.item(id)?;
            match item.state {
                state if state.is_terminal() => {
                    return Err(EngineError::InvalidOperation(format!(
                        "cannot cancel item {} in state {}",
                        id, state
                    )))
                }
                state if state.holds_slot() => {
                    if !self.signal_running(id, Signal::Cancel).await {
                        return self.item(id);
                    }
                }
                state => {
                    let now = Utc::now();
                    match self.core.store.compare_and_transition(
                        id,
                        state,
                        ItemState::Cancelled,
                        &mut |record| {
                            record.paused_phase = None;
                            record.retry_after = None;
                            record.phase_ended_at = Some(now);
                        },
                    ) {
                        Ok(cancelled) => {
                            info!(item_id = %id, from = %state, to = "cancelled", "Cancelled '{}'", cancelled.title);
                            self.core.phases.discard_staging(id).await;
                            return Ok(cancelled);
                        }
                        Err(ItemError::StaleState { .. }) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Err(self.unsettled(id))
    }

    /// Configured targets with their current transfer load.
    pub fn targets(&self) -> Vec<TargetStatus> {
        self.core
            .targets
            .iter()
            .map(|target| TargetStatus {
                name: target.name.clone(),
                protocol: target.protocol.clone(),
                base_path: target.base_path.clone(),
                ceiling: target.max_concurrent,
                in_flight: self
                    .core
                    .scheduler
                    .target(&target.name)
                    .map(|pool| pool.in_flight())
                    .unwrap_or(0),
                min_quality: target.min_quality,
                max_quality: target.max_quality,
            })
            .collect()
    }

    /// Connect to a configured target using its protocol strategy.
    ///
    /// A failed connection is reported in the result, not as an error.
    pub async fn test_target(&self, name: &str) -> Result<ConnectionCheck, EngineError> {
        let protocol = self
            .core
            .targets
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.protocol.clone())
            .ok_or_else(|| EngineError::UnknownTarget(name.to_string()))?;

        let started = Instant::now();
        let result = self
            .core
            .transfer
            .check_target(name)
            .await
            .ok_or_else(|| EngineError::UnknownTarget(name.to_string()))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let failure = match result {
            Ok(()) => {
                info!(target = %name, "Target {} reachable via {} in {}ms", name, protocol, elapsed_ms);
                None
            }
            Err(failure) => {
                warn!(target = %name, "Target {} unreachable via {}: {}", name, protocol, failure);
                Some(failure)
            }
        };
        Ok(ConnectionCheck {
            target: name.to_string(),
            protocol,
            reachable: failure.is_none(),
            failure,
            elapsed_ms,
        })
    }

    /// Run one admission pass now.
    ///
    /// The admission loop calls this continuously while the engine runs;
    /// it is public for callers driving the engine by hand.
    pub fn tick(&self) -> Result<TickReport, EngineError> {
        Ok(Self::tick_core(&self.core)?)
    }

    fn tick_core(core: &Arc<EngineCore>) -> Result<TickReport, ItemError> {
        let now = Utc::now();
        let store = core.store.as_ref();

        let acquisitions = core.scheduler.admit_acquisitions(store, &core.signals, now)?;
        let transfers = core.scheduler.admit_transfers(store, &core.signals, now)?;

        let report = TickReport {
            acquisitions: acquisitions.len(),
            transfers: transfers.len(),
        };
        for admission in acquisitions.into_iter().chain(transfers) {
            Self::spawn_phase(Arc::clone(core), admission);
        }
        Ok(report)
    }

    fn spawn_phase(core: Arc<EngineCore>, admission: Admission) {
        tokio::spawn(async move {
            let Admission {
                item,
                phase,
                slot,
                signal,
                registered,
            } = admission;
            let id = item.id.clone();
            let sink = ProgressSink::new(signal, core.config.progress_interval());

            match phase {
                Phase::Acquisition => core.acquisition.run(item, sink).await,
                Phase::Transfer => core.transfer.run(item, sink).await,
            }

            core.signals.finish(&id, &registered);
            drop(slot);
            core.wake.notify_one();
        });
    }

    /// Spawn the admission loop task.
    fn spawn_admission_loop(&self) {
        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let poll_interval = self.core.config.poll_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Admission loop started");
            loop {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = Self::tick_core(&core) {
                    warn!("Admission error: {}", e);
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Admission loop received shutdown signal");
                        break;
                    }
                    _ = core.wake.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            info!("Admission loop stopped");
        });
    }

    /// Return slot holders left behind by a previous process to their queue.
    ///
    /// No attempt is consumed: the interrupted attempt never reported an
    /// outcome.
    fn recover_interrupted(core: &EngineCore) {
        let mut recovered = 0;
        for phase in [Phase::Acquisition, Phase::Transfer] {
            let filter = ItemFilter::new()
                .with_state(phase.active_state())
                .with_limit(10_000);
            let items = match core.store.list(&filter) {
                Ok(items) => items,
                Err(e) => {
                    error!("Failed to list {} items for recovery: {}", phase, e);
                    continue;
                }
            };

            for item in items {
                if core.signals.is_running(&item.id) {
                    continue;
                }
                match core.store.compare_and_transition(
                    &item.id,
                    phase.active_state(),
                    phase.queue_state(),
                    &mut |record| {
                        record.progress.rate_bps = 0;
                        record.phase_ended_at = None;
                    },
                ) {
                    Ok(_) => {
                        recovered += 1;
                        info!(
                            item_id = %item.id,
                            from = %phase.active_state(),
                            to = %phase.queue_state(),
                            "Recovered interrupted {} of '{}'",
                            phase,
                            item.title
                        );
                    }
                    Err(e) => warn!("Failed to recover {}: {}", item.id, e),
                }
            }
        }
        if recovered > 0 {
            info!("Recovered {} interrupted item(s)", recovered);
        }
    }

    /// Signal a running phase and wait for it to stop.
    ///
    /// Returns `false` when the phase did not stop within the control
    /// timeout.
    async fn signal_running(&self, id: &str, signal: Signal) -> bool {
        match self.core.signals.send(id, signal) {
            Some(delivered) => delivered.settled(self.control_timeout()).await,
            None => {
                // Between its final write and releasing the slot.
                tokio::time::sleep(Duration::from_millis(10)).await;
                true
            }
        }
    }

    fn control_timeout(&self) -> Duration {
        (self.core.config.progress_interval() * 10).max(Duration::from_secs(5))
    }

    fn unsettled(&self, id: &str) -> EngineError {
        EngineError::InvalidOperation(format!(
            "item {} is not running in this engine and kept changing state",
            id
        ))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}
