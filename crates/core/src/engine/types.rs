//! Types for the orchestration engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::{QualityTier, Rejection};
use crate::item::ItemError;
use crate::retry::Failure;

/// Errors reported synchronously by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The candidate was refused at classification.
    #[error("candidate rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Item store error (not found, duplicate, stale state).
    #[error(transparent)]
    Item(#[from] ItemError),

    /// The operation does not apply to the item's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

/// Result of connecting to a target without transferring anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub target: String,
    pub protocol: String,
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub elapsed_ms: u64,
}

/// A configured target and its live transfer load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub name: String,
    pub protocol: String,
    pub base_path: String,
    /// Transfer slots on this target.
    pub ceiling: usize,
    /// Items currently holding one of those slots.
    pub in_flight: usize,
    pub min_quality: QualityTier,
    pub max_quality: QualityTier,
}

/// Current status of the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Whether the admission loop is running.
    pub running: bool,
    pub acquisition_ceiling: usize,
    /// Items currently holding an acquisition slot.
    pub acquiring: usize,
    pub targets: Vec<TargetStatus>,
}

/// Counts of one admission pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub acquisitions: usize,
    pub transfers: usize,
}

impl TickReport {
    pub fn admitted(&self) -> usize {
        self.acquisitions + self.transfers
    }
}
