//! Item types and the per-item state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::classifier::QualityTier;
use crate::enrichment::EnrichedMetadata;
use crate::retry::{ErrorKind, Failure};

/// Content category of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    #[default]
    Movie,
    SeriesEpisode,
    SerialEpisode,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::SeriesEpisode => "series_episode",
            Self::SerialEpisode => "serial_episode",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling class, ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Numeric rank used for store ordering (higher is admitted first).
    pub fn rank(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

/// One of the two bounded-concurrency stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Acquisition,
    Transfer,
}

impl Phase {
    /// The state that holds a slot while this phase runs.
    pub fn active_state(&self) -> ItemState {
        match self {
            Self::Acquisition => ItemState::Acquiring,
            Self::Transfer => ItemState::Transferring,
        }
    }

    /// The queueing state awaiting admission into this phase.
    pub fn queue_state(&self) -> ItemState {
        match self {
            Self::Acquisition => ItemState::Pending,
            Self::Transfer => ItemState::Acquired,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquisition => "acquisition",
            Self::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Acquiring,
    Acquired,
    Transferring,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl ItemState {
    pub const ALL: [ItemState; 8] = [
        ItemState::Pending,
        ItemState::Acquiring,
        ItemState::Acquired,
        ItemState::Transferring,
        ItemState::Paused,
        ItemState::Completed,
        ItemState::Cancelled,
        ItemState::Failed,
    ];

    /// Returns the state type as a string (for filtering/display).
    pub fn state_type(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acquiring => "acquiring",
            Self::Acquired => "acquired",
            Self::Transferring => "transferring",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.state_type() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Only `Acquiring` and `Transferring` occupy a concurrency slot.
    pub fn holds_slot(&self) -> bool {
        matches!(self, Self::Acquiring | Self::Transferring)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, Self::Pending | Self::Acquiring | Self::Transferring)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Self-loops on the active states carry progress updates. The active
    /// states may fall back to their queue state (retry or crash recovery).
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        match (self, next) {
            (Pending, Acquiring | Paused | Cancelled) => true,
            (Acquiring, Acquiring | Acquired | Pending | Paused | Cancelled | Failed) => true,
            (Acquired, Transferring | Cancelled) => true,
            (Transferring, Transferring | Completed | Acquired | Paused | Cancelled | Failed) => {
                true
            }
            (Paused, Pending | Acquired | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_type())
    }
}

/// Byte-level progress of the current and past phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProgress {
    /// Expected size of the artifact, when known.
    pub expected_bytes: Option<u64>,
    /// Bytes fetched during acquisition.
    pub acquired_bytes: u64,
    /// Bytes placed on the target during transfer.
    pub transferred_bytes: u64,
    /// Instantaneous rate of the running phase, bytes per second.
    pub rate_bps: u64,
}

/// The most recent failure recorded on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub phase: Phase,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl LastError {
    pub fn new(phase: Phase, failure: &Failure) -> Self {
        Self {
            phase,
            kind: failure.kind,
            message: failure.message.clone(),
            at: Utc::now(),
        }
    }
}

/// The unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub category: ContentCategory,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<i32>,

    pub quality: QualityTier,
    pub priority: Priority,
    /// Name of the assigned target. Never reassigned.
    pub target: String,

    pub state: ItemState,
    /// Phase that was running or queued when the item was paused.
    #[serde(default)]
    pub paused_phase: Option<Phase>,
    #[serde(default)]
    pub progress: ItemProgress,
    #[serde(default)]
    pub acquisition_attempts: u32,
    #[serde(default)]
    pub transfer_attempts: u32,
    /// Checksum mismatches seen per phase, whatever failed in between.
    #[serde(default)]
    pub acquisition_mismatches: u32,
    #[serde(default)]
    pub transfer_mismatches: u32,

    /// Staged local artifact, set once acquisition succeeds.
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    /// Path on the target, set when transfer starts.
    #[serde(default)]
    pub destination_path: Option<String>,
    #[serde(default)]
    pub metadata: Option<EnrichedMetadata>,
    #[serde(default)]
    pub last_error: Option<LastError>,
    /// Not eligible for admission before this instant.
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub phase_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phase_ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Attempts consumed in the given phase.
    pub fn attempts(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Acquisition => self.acquisition_attempts,
            Phase::Transfer => self.transfer_attempts,
        }
    }

    pub fn set_attempts(&mut self, phase: Phase, attempts: u32) {
        match phase {
            Phase::Acquisition => self.acquisition_attempts = attempts,
            Phase::Transfer => self.transfer_attempts = attempts,
        }
    }

    /// Checksum mismatches already recorded in the given phase.
    pub fn mismatches(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Acquisition => self.acquisition_mismatches,
            Phase::Transfer => self.transfer_mismatches,
        }
    }

    pub fn record_mismatch(&mut self, phase: Phase) {
        match phase {
            Phase::Acquisition => self.acquisition_mismatches += 1,
            Phase::Transfer => self.transfer_mismatches += 1,
        }
    }

    /// Whether the item may be admitted at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.retry_after.is_none_or(|at| at <= now)
    }
}
