//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Intake (enqueued and rejected candidates)
//! - Phase execution (outcomes, durations, retries, stalls)
//! - Slot occupancy (acquisition pool, per-target transfer pools)
//! - Metadata enrichment lookups

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts};

// =============================================================================
// Intake Metrics
// =============================================================================

/// Items accepted into the store.
pub static ITEMS_ENQUEUED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("mediarelay_items_enqueued_total", "Total items enqueued").unwrap()
});

/// Candidates refused at submission, by reason.
pub static ITEMS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_items_rejected_total", "Total candidates rejected"),
        &["reason"], // rejection reason or "duplicate"
    )
    .unwrap()
});

// =============================================================================
// Phase Metrics
// =============================================================================

/// Phase attempts by outcome.
pub static PHASE_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_phase_outcomes_total", "Phase attempts by outcome"),
        &["phase", "result"], // "success", "retry", "failed", "paused", "cancelled"
    )
    .unwrap()
});

/// Phase attempt duration in seconds.
pub static PHASE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediarelay_phase_duration_seconds",
            "Duration of phase attempts",
        )
        .buckets(vec![
            1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
        ]),
        &["phase", "result"],
    )
    .unwrap()
});

/// Retries scheduled, by phase.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_retry_attempts_total", "Total retry attempts"),
        &["phase"],
    )
    .unwrap()
});

/// Stall timeouts, by phase.
pub static STALL_DETECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_stall_detections_total", "Total phase stall detections"),
        &["phase"],
    )
    .unwrap()
});

// =============================================================================
// Slot Metrics
// =============================================================================

/// Occupied acquisition slots.
pub static ACQUISITION_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediarelay_acquisition_in_flight",
        "Items currently holding an acquisition slot",
    )
    .unwrap()
});

/// Occupied transfer slots per target.
pub static TARGET_IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "mediarelay_target_in_flight",
            "Items currently holding a transfer slot on a target",
        ),
        &["target"],
    )
    .unwrap()
});

// =============================================================================
// Enrichment Metrics
// =============================================================================

/// Metadata lookups by result.
pub static ENRICHMENT_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediarelay_enrichment_lookups_total", "Metadata enrichment lookups"),
        &["result"], // "found", "not_found", "error", "timeout"
    )
    .unwrap()
});

/// All core metrics, for registration with a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Intake
        Box::new(ITEMS_ENQUEUED.clone()),
        Box::new(ITEMS_REJECTED.clone()),
        // Phases
        Box::new(PHASE_OUTCOMES.clone()),
        Box::new(PHASE_DURATION.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(STALL_DETECTIONS.clone()),
        // Slots
        Box::new(ACQUISITION_IN_FLIGHT.clone()),
        Box::new(TARGET_IN_FLIGHT.clone()),
        // Enrichment
        Box::new(ENRICHMENT_LOOKUPS.clone()),
    ]
}
