//! Types for the classifier module.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::quality::{QualityBand, QualityTier};
use crate::item::ContentCategory;

/// A candidate as produced by manifest ingestion, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub title: String,
    pub url: String,
    /// Inferred quality token, e.g. "720p".
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub category: ContentCategory,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub episode: Option<u32>,
    /// Release year, if known.
    #[serde(default)]
    pub year: Option<i32>,
    /// Explicit target name; the first eligible target is used otherwise.
    #[serde(default)]
    pub target: Option<String>,
}

impl RawCandidate {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            quality: None,
            category: ContentCategory::Movie,
            season: None,
            episode: None,
            year: None,
            target: None,
        }
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn with_category(mut self, category: ContentCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_episode(mut self, season: u32, episode: u32) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Why a candidate never became an item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unacceptable quality {token:?} (accepted {}..={})", .band.min, .band.max)]
    UnacceptableQuality { token: String, band: QualityBand },

    #[error("no target accepts {category} at {quality}")]
    NoEligibleTarget {
        category: ContentCategory,
        quality: QualityTier,
    },

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),
}

impl Rejection {
    /// Short label for metrics and API payloads.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnacceptableQuality { .. } => "unacceptable_quality",
            Self::NoEligibleTarget { .. } => "no_eligible_target",
            Self::UnknownTarget(_) => "unknown_target",
            Self::InvalidCandidate(_) => "invalid_candidate",
        }
    }
}

/// Classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Lowest accepted tier.
    #[serde(default = "default_min_quality")]
    pub min_quality: QualityTier,

    /// Highest accepted tier.
    #[serde(default = "default_max_quality")]
    pub max_quality: QualityTier,

    /// Movies released within this many years are high priority.
    #[serde(default = "default_recent_window")]
    pub recent_window_years: u32,

    /// Movies older than this many years are low priority.
    #[serde(default = "default_old_threshold")]
    pub old_threshold_years: u32,
}

fn default_min_quality() -> QualityTier {
    QualityTier::P480
}

fn default_max_quality() -> QualityTier {
    QualityTier::P1080
}

fn default_recent_window() -> u32 {
    2
}

fn default_old_threshold() -> u32 {
    5
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_quality: default_min_quality(),
            max_quality: default_max_quality(),
            recent_window_years: default_recent_window(),
            old_threshold_years: default_old_threshold(),
        }
    }
}

impl ClassifierConfig {
    pub fn band(&self) -> Option<QualityBand> {
        QualityBand::new(self.min_quality, self.max_quality)
    }

    pub fn with_band(mut self, min: QualityTier, max: QualityTier) -> Self {
        self.min_quality = min;
        self.max_quality = max;
        self
    }
}
