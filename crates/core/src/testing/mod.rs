//! Testing utilities and mock implementations.
//!
//! Mocks stand in for the network-facing collaborators so the engine can be
//! exercised end to end against a temporary directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediarelay_core::testing::{fixtures, MockFetcher};
//!
//! let fetcher = Arc::new(MockFetcher::new());
//! let config = fixtures::config(staging.path(), target.path());
//! let engine = Engine::new(&config, store, fetcher.clone(), StrategySet::standard(&config.transfer));
//! ```

mod mock_enricher;
mod mock_fetcher;

pub use mock_enricher::MockEnricher;
pub use mock_fetcher::MockFetcher;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use chrono::Utc;

    use crate::classifier::{QualityTier, RawCandidate};
    use crate::config::{Config, TargetConfig};
    use crate::enrichment::EnrichedMetadata;
    use crate::item::{ContentCategory, Item, ItemProgress, ItemState, Priority};
    use crate::retry::RetryConfig;

    /// A pending 720p movie bound for the "primary" target.
    pub fn item(title: &str, url: &str, priority: Priority) -> Item {
        let now = Utc::now();
        Item {
            id: uuid::Uuid::new_v4().to_string(),
            source_url: url.to_string(),
            title: title.to_string(),
            category: ContentCategory::Movie,
            season: None,
            episode: None,
            year: None,
            quality: QualityTier::P720,
            priority,
            target: "primary".to_string(),
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
        }
    }

    /// A local-mount target rooted at `base`.
    pub fn local_target(name: &str, base: impl AsRef<Path>) -> TargetConfig {
        TargetConfig::local(name, base.as_ref().to_string_lossy().into_owned())
    }

    /// A 720p movie candidate.
    pub fn movie(title: &str, url: &str) -> RawCandidate {
        let mut raw = RawCandidate::new(title, url);
        raw.quality = Some("720p".to_string());
        raw
    }

    /// A movie candidate with a release year.
    pub fn movie_from(title: &str, year: i32, url: &str) -> RawCandidate {
        let mut raw = movie(title, url);
        raw.year = Some(year);
        raw
    }

    /// A series episode candidate.
    pub fn episode(title: &str, season: u32, episode: u32, url: &str) -> RawCandidate {
        let mut raw = movie(title, url);
        raw.category = ContentCategory::SeriesEpisode;
        raw.season = Some(season);
        raw.episode = Some(episode);
        raw
    }

    /// Engine configuration with fast timings, no retry delay and one
    /// local target named "primary".
    pub fn config(staging: impl AsRef<Path>, target_base: impl AsRef<Path>) -> Config {
        let mut config = Config::default().with_target(local_target("primary", target_base));
        config.engine = config
            .engine
            .with_staging_dir(staging.as_ref().to_path_buf())
            .with_acquisition_ceiling(2);
        config.engine.poll_interval_ms = 20;
        config.engine.progress_interval_ms = 10;
        config.engine.stall_timeout_secs = 5;
        config.retry = RetryConfig::default().without_delay();
        config
    }

    /// TMDB-style metadata.
    pub fn metadata(title: &str, year: i32) -> EnrichedMetadata {
        EnrichedMetadata {
            provider: "tmdb".to_string(),
            external_id: format!("{}{}", year, title.len()),
            title: title.to_string(),
            overview: Some(format!("A movie about {}.", title.to_lowercase())),
            release_year: Some(year),
            poster_path: Some("/poster.jpg".to_string()),
        }
    }
}
