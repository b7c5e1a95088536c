//! Candidate classification: quality acceptance, target and priority.

use chrono::{DateTime, Datelike, Utc};

use super::quality::{QualityBand, QualityTier};
use super::types::{ClassifierConfig, RawCandidate, Rejection};
use crate::config::TargetConfig;
use crate::item::{ContentCategory, Item, ItemProgress, ItemState, Priority};

/// Turns raw candidates into pending items.
///
/// Classification has no side effects; the resulting item still has to be
/// inserted into the store.
#[derive(Debug, Clone)]
pub struct Classifier {
    config: ClassifierConfig,
    band: QualityBand,
    targets: Vec<TargetConfig>,
}

impl Classifier {
    /// An inverted configured band falls back to the full ladder;
    /// `validate_config` rejects such configurations before this point.
    pub fn new(config: ClassifierConfig, targets: Vec<TargetConfig>) -> Self {
        let band = config.band().unwrap_or_else(QualityBand::full);
        Self {
            config,
            band,
            targets,
        }
    }

    pub fn band(&self) -> QualityBand {
        self.band
    }

    pub fn classify(&self, raw: RawCandidate) -> Result<Item, Rejection> {
        self.classify_at(raw, Utc::now())
    }

    /// Classify relative to `now` (release-year recency is measured against it).
    pub fn classify_at(&self, raw: RawCandidate, now: DateTime<Utc>) -> Result<Item, Rejection> {
        if raw.url.trim().is_empty() {
            return Err(Rejection::InvalidCandidate("missing source url".to_string()));
        }
        if raw.title.trim().is_empty() {
            return Err(Rejection::InvalidCandidate("missing title".to_string()));
        }

        let token = raw.quality.clone().unwrap_or_default();
        let quality = QualityTier::resolve(&token)
            .filter(|tier| self.band.contains(*tier))
            .ok_or_else(|| Rejection::UnacceptableQuality {
                token: token.clone(),
                band: self.band,
            })?;

        let target = self.assign_target(&raw, quality)?;
        let priority = self.priority_for(raw.category, raw.year, now.year());

        Ok(Item {
            id: uuid::Uuid::new_v4().to_string(),
            source_url: raw.url.trim().to_string(),
            title: raw.title.trim().to_string(),
            category: raw.category,
            season: raw.season,
            episode: raw.episode,
            year: raw.year,
            quality,
            priority,
            target,
            state: ItemState::Pending,
            paused_phase: None,
            progress: ItemProgress::default(),
            acquisition_attempts: 0,
            transfer_attempts: 0,
            acquisition_mismatches: 0,
            transfer_mismatches: 0,
            local_path: None,
            destination_path: None,
            metadata: None,
            last_error: None,
            retry_after: None,
            created_at: now,
            phase_started_at: None,
            phase_ended_at: None,
            updated_at: now,
        })
    }

    fn assign_target(&self, raw: &RawCandidate, quality: QualityTier) -> Result<String, Rejection> {
        if let Some(name) = &raw.target {
            let target = self
                .targets
                .iter()
                .find(|t| &t.name == name)
                .ok_or_else(|| Rejection::UnknownTarget(name.clone()))?;
            return if target.accepts(raw.category, quality) {
                Ok(target.name.clone())
            } else {
                Err(Rejection::NoEligibleTarget {
                    category: raw.category,
                    quality,
                })
            };
        }

        self.targets
            .iter()
            .find(|t| t.accepts(raw.category, quality))
            .map(|t| t.name.clone())
            .ok_or(Rejection::NoEligibleTarget {
                category: raw.category,
                quality,
            })
    }

    /// Recent movies are high priority, episodes medium, old movies low.
    /// An unknown release year is medium.
    pub fn priority_for(
        &self,
        category: ContentCategory,
        year: Option<i32>,
        current_year: i32,
    ) -> Priority {
        let Some(year) = year else {
            return Priority::Medium;
        };
        if category != ContentCategory::Movie {
            return Priority::Medium;
        }

        let age = current_year - year;
        if age <= self.config.recent_window_years as i32 {
            Priority::High
        } else if age > self.config.old_threshold_years as i32 {
            Priority::Low
        } else {
            Priority::Medium
        }
    }
}
