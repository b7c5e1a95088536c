//! Shared harness for engine integration tests.
//!
//! Builds an engine over a SQLite store, a [`MockFetcher`] and local-mount
//! targets rooted in a temporary directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use tempfile::TempDir;

use mediarelay_core::{
    testing::{fixtures, MockFetcher},
    Config, Engine, Fetcher, Item, ItemState, ItemStore, MetadataEnricher, SqliteItemStore,
    StrategySet,
};

pub use mediarelay_core::testing::fixtures::{episode, movie, movie_from};

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<SqliteItemStore>,
    pub fetcher: Arc<MockFetcher>,
    pub config: Config,
    pub temp_dir: TempDir,
}

impl Harness {
    /// Two acquisition slots, one "primary" target.
    pub async fn new() -> Self {
        Self::with_config(|_, _| {}).await
    }

    /// Adjust the default test configuration before the engine is built.
    /// The closure also receives the temp dir root for extra target paths.
    pub async fn with_config(adjust: impl FnOnce(&mut Config, &Path)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let mut config = fixtures::config(root.join("staging"), root.join("primary"));
        config.database.path = root.join("test.db");
        adjust(&mut config, &root);

        let store = Arc::new(
            SqliteItemStore::new(&config.database.path).expect("Failed to create item store"),
        );
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.set_chunk_delay(Duration::from_millis(2)).await;

        let engine = Engine::new(
            &config,
            Arc::clone(&store) as Arc<dyn ItemStore>,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            StrategySet::standard(&config.transfer),
        );

        Self {
            engine,
            store,
            fetcher,
            config,
            temp_dir,
        }
    }

    /// Attach a metadata enricher before the engine is started.
    pub fn with_enricher(mut self, enricher: Arc<dyn MetadataEnricher>) -> Self {
        self.engine = self.engine.with_enricher(enricher);
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.config.engine.staging_dir
    }

    pub fn target_dir(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn item(&self, id: &str) -> Item {
        self.engine.item(id).expect("item exists")
    }

    /// Poll until the item reaches `expected`; returns the last record seen.
    ///
    /// Gives up early when the item lands in a different terminal state.
    pub async fn wait_for_state(&self, id: &str, expected: ItemState, timeout: Duration) -> Item {
        let start = std::time::Instant::now();
        loop {
            let item = self.item(id);
            if item.state == expected || item.state.is_terminal() || start.elapsed() >= timeout {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until `predicate` holds for the item.
    pub async fn wait_until(
        &self,
        id: &str,
        timeout: Duration,
        predicate: impl Fn(&Item) -> bool,
    ) -> Item {
        let start = std::time::Instant::now();
        loop {
            let item = self.item(id);
            if predicate(&item) || start.elapsed() >= timeout {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn this_year() -> i32 {
    chrono::Utc::now().year()
}
