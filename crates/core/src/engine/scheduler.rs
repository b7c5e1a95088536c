//! Admission scheduler: priority-ordered admission under two independent
//! sets of concurrency ceilings.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use prometheus::IntGauge;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::signal::{Registered, SignalRegistry};
use crate::config::TargetConfig;
use crate::item::{Item, ItemError, ItemFilter, ItemState, ItemStore, Phase};
use crate::metrics;
use crate::progress::Signal;

/// A bounded pool of concurrency slots.
#[derive(Debug)]
pub(crate) struct SlotPool {
    ceiling: usize,
    permits: Arc<Semaphore>,
    gauge: IntGauge,
}

/// One occupied slot. Released on drop.
#[derive(Debug)]
pub(crate) struct Slot {
    _permit: OwnedSemaphorePermit,
    gauge: IntGauge,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

impl SlotPool {
    pub fn new(ceiling: usize, gauge: IntGauge) -> Self {
        gauge.set(0);
        Self {
            ceiling,
            permits: Arc::new(Semaphore::new(ceiling)),
            gauge,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.ceiling.saturating_sub(self.available())
    }

    /// Take a slot if one is free. Never waits.
    pub fn try_acquire(&self) -> Option<Slot> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        self.gauge.inc();
        Some(Slot {
            _permit: permit,
            gauge: self.gauge.clone(),
        })
    }
}

/// An item moved into its active state, with everything its phase needs.
#[derive(Debug)]
pub(crate) struct Admission {
    pub item: Item,
    pub phase: Phase,
    pub slot: Slot,
    pub signal: watch::Receiver<Signal>,
    pub registered: Registered,
}

/// Owns the acquisition pool and one transfer pool per target.
///
/// Items in `Acquired` whose target is no longer configured go through a
/// single-slot orphan pool so their transfer can fail with a configuration
/// error instead of waiting forever.
#[derive(Debug)]
pub(crate) struct AdmissionScheduler {
    acquisition: SlotPool,
    targets: HashMap<String, SlotPool>,
    order: Vec<String>,
    orphans: SlotPool,
}

impl AdmissionScheduler {
    pub fn new(acquisition_ceiling: usize, targets: &[TargetConfig]) -> Self {
        let mut pools = HashMap::new();
        let mut order = Vec::new();
        for target in targets {
            let gauge = metrics::TARGET_IN_FLIGHT.with_label_values(&[&target.name]);
            pools.insert(target.name.clone(), SlotPool::new(target.max_concurrent, gauge));
            order.push(target.name.clone());
        }

        Self {
            acquisition: SlotPool::new(acquisition_ceiling, metrics::ACQUISITION_IN_FLIGHT.clone()),
            targets: pools,
            order,
            orphans: SlotPool::new(1, metrics::TARGET_IN_FLIGHT.with_label_values(&["<unknown>"])),
        }
    }

    pub fn acquisition(&self) -> &SlotPool {
        &self.acquisition
    }

    pub fn target(&self, name: &str) -> Option<&SlotPool> {
        self.targets.get(name)
    }

    /// Target pools in configuration order.
    pub fn targets(&self) -> impl Iterator<Item = (&str, &SlotPool)> {
        self.order
            .iter()
            .filter_map(|name| self.targets.get(name).map(|pool| (name.as_str(), pool)))
    }

    /// Admit as many `Pending` items as free acquisition slots allow.
    pub fn admit_acquisitions(
        &self,
        store: &dyn ItemStore,
        signals: &SignalRegistry,
        now: DateTime<Utc>,
    ) -> Result<Vec<Admission>, ItemError> {
        let free = self.acquisition.available();
        if free == 0 {
            return Ok(Vec::new());
        }

        let filter = ItemFilter::new()
            .with_state(ItemState::Pending)
            .ready_at(now)
            .with_limit(free as i64);
        let candidates = store.list(&filter)?;
        Self::admit(store, signals, &self.acquisition, candidates, Phase::Acquisition, now)
    }

    /// Admit `Acquired` items into the transfer pool of their target.
    pub fn admit_transfers(
        &self,
        store: &dyn ItemStore,
        signals: &SignalRegistry,
        now: DateTime<Utc>,
    ) -> Result<Vec<Admission>, ItemError> {
        let mut admitted = Vec::new();

        for (name, pool) in self.targets() {
            let free = pool.available();
            if free == 0 {
                continue;
            }
            let filter = ItemFilter::new()
                .with_state(ItemState::Acquired)
                .with_target(name)
                .ready_at(now)
                .with_limit(free as i64);
            let candidates = store.list(&filter)?;
            admitted.extend(Self::admit(store, signals, pool, candidates, Phase::Transfer, now)?);
        }

        if self.orphans.available() > 0 {
            let filter = ItemFilter::new()
                .with_state(ItemState::Acquired)
                .ready_at(now);
            let orphans: Vec<Item> = store
                .list(&filter)?
                .into_iter()
                .filter(|item| !self.targets.contains_key(&item.target))
                .take(self.orphans.available())
                .collect();
            admitted.extend(Self::admit(store, signals, &self.orphans, orphans, Phase::Transfer, now)?);
        }

        Ok(admitted)
    }

    fn admit(
        store: &dyn ItemStore,
        signals: &SignalRegistry,
        pool: &SlotPool,
        candidates: Vec<Item>,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> Result<Vec<Admission>, ItemError> {
        let mut admitted = Vec::new();

        for candidate in candidates {
            let Some(slot) = pool.try_acquire() else {
                break;
            };
            let (signal, registered) = signals.register(&candidate.id);

            let result = store.compare_and_transition(
                &candidate.id,
                phase.queue_state(),
                phase.active_state(),
                &mut |item| {
                    item.phase_started_at = Some(now);
                    item.phase_ended_at = None;
                    item.retry_after = None;
                    item.progress.rate_bps = 0;
                },
            );

            match result {
                Ok(item) => {
                    info!(
                        item_id = %item.id,
                        from = %phase.queue_state(),
                        to = %phase.active_state(),
                        target = %item.target,
                        "Admitted '{}' for {} ({} of {} slots)",
                        item.title,
                        phase,
                        pool.in_flight(),
                        pool.ceiling()
                    );
                    admitted.push(Admission {
                        item,
                        phase,
                        slot,
                        signal,
                        registered,
                    });
                }
                Err(ItemError::StaleState { actual, .. }) => {
                    // Paused or cancelled since it was listed.
                    debug!(
                        "Skipping admission of {}: now {}",
                        candidate.id, actual
                    );
                    signals.finish(&candidate.id, &registered);
                }
                Err(e) => {
                    signals.finish(&candidate.id, &registered);
                    warn!("Failed to admit {} for {}: {}", candidate.id, phase, e);
                    return Err(e);
                }
            }
        }

        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Priority, SqliteItemStore};
    use crate::testing::fixtures;
    use chrono::Duration;

    fn gauge() -> IntGauge {
        IntGauge::new("test_slots", "test").unwrap()
    }

    #[test]
    fn test_slot_pool_ceiling() {
        let pool = SlotPool::new(2, gauge());
        let a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_flight(), 2);

        drop(a);
        assert_eq!(pool.in_flight(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_slot_updates_gauge() {
        let gauge = gauge();
        let pool = SlotPool::new(3, gauge.clone());
        let slot = pool.try_acquire().unwrap();
        assert_eq!(gauge.get(), 1);
        drop(slot);
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_acquisition_admission_order_and_ceiling() {
        let store = SqliteItemStore::in_memory().unwrap();
        let signals = SignalRegistry::new();
        let base = Utc::now() - Duration::seconds(60);

        for (title, priority, offset) in [
            ("B", Priority::Medium, 0),
            ("C", Priority::High, 2),
            ("A", Priority::High, 1),
        ] {
            let mut item = fixtures::item(title, &format!("http://cdn/{}", title), priority);
            item.created_at = base + Duration::seconds(offset);
            store.insert(item).unwrap();
        }

        let scheduler = AdmissionScheduler::new(2, &[fixtures::local_target("primary", "/tmp")]);
        let admitted = scheduler
            .admit_acquisitions(&store, &signals, Utc::now())
            .unwrap();
        let titles: Vec<&str> = admitted.iter().map(|a| a.item.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "C"]);
        assert!(admitted.iter().all(|a| a.item.state == ItemState::Acquiring));
        assert!(signals.is_running(&admitted[0].item.id));

        // Pool is full until a slot is released.
        assert!(scheduler
            .admit_acquisitions(&store, &signals, Utc::now())
            .unwrap()
            .is_empty());

        drop(admitted);
        let next = scheduler
            .admit_acquisitions(&store, &signals, Utc::now())
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].item.title, "B");
    }

    #[test]
    fn test_retry_after_defers_admission() {
        let store = SqliteItemStore::in_memory().unwrap();
        let signals = SignalRegistry::new();
        let now = Utc::now();

        let mut item = fixtures::item("later", "http://cdn/later", Priority::High);
        item.retry_after = Some(now + Duration::seconds(30));
        store.insert(item).unwrap();

        let scheduler = AdmissionScheduler::new(1, &[]);
        assert!(scheduler.admit_acquisitions(&store, &signals, now).unwrap().is_empty());
        let admitted = scheduler
            .admit_acquisitions(&store, &signals, now + Duration::seconds(31))
            .unwrap();
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].item.retry_after, None);
    }

    #[test]
    fn test_transfer_admission_per_target() {
        let store = SqliteItemStore::in_memory().unwrap();
        let signals = SignalRegistry::new();

        for (title, target) in [("a1", "alpha"), ("a2", "alpha"), ("b1", "beta"), ("x1", "gone")] {
            let mut item = fixtures::item(title, &format!("http://cdn/{}", title), Priority::Medium);
            item.target = target.to_string();
            item.state = ItemState::Acquired;
            store.insert(item).unwrap();
        }

        let scheduler = AdmissionScheduler::new(
            1,
            &[
                fixtures::local_target("alpha", "/tmp/a").with_ceiling(1),
                fixtures::local_target("beta", "/tmp/b").with_ceiling(2),
            ],
        );
        let admitted = scheduler
            .admit_transfers(&store, &signals, Utc::now())
            .unwrap();
        let mut titles: Vec<&str> = admitted.iter().map(|a| a.item.title.as_str()).collect();
        titles.sort();
        assert_eq!(titles, vec!["a1", "b1", "x1"]);
        assert_eq!(scheduler.target("alpha").unwrap().in_flight(), 1);
        assert_eq!(scheduler.target("beta").unwrap().in_flight(), 1);
        assert!(admitted.iter().all(|a| a.phase == Phase::Transfer));
    }
}
