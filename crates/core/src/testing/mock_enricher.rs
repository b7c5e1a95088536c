//! Mock metadata enricher for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::enrichment::{EnrichedMetadata, EnrichmentError, MetadataEnricher, MetadataQuery};

/// Mock implementation of the MetadataEnricher trait.
///
/// Answers from a title-keyed table (case-insensitive). Unknown titles
/// produce no match.
#[derive(Debug)]
pub struct MockEnricher {
    entries: Arc<RwLock<HashMap<String, EnrichedMetadata>>>,
    /// Queries received, in call order.
    queries: Arc<RwLock<Vec<MetadataQuery>>>,
    /// If set, the next lookup fails with this error.
    next_error: Arc<RwLock<Option<EnrichmentError>>>,
    /// Simulated lookup latency.
    latency: Arc<RwLock<Duration>>,
}

impl Default for MockEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEnricher {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            queries: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            latency: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Answer lookups for `title` with `metadata`.
    pub async fn add_entry(&self, title: &str, metadata: EnrichedMetadata) {
        self.entries
            .write()
            .await
            .insert(title.to_lowercase(), metadata);
    }

    pub async fn set_next_error(&self, error: EnrichmentError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    pub async fn recorded_queries(&self) -> Vec<MetadataQuery> {
        self.queries.read().await.clone()
    }
}

#[async_trait]
impl MetadataEnricher for MockEnricher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn enrich(&self, query: &MetadataQuery) -> Result<Option<EnrichedMetadata>, EnrichmentError> {
        self.queries.write().await.push(query.clone());

        let latency = *self.latency.read().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }

        Ok(self
            .entries
            .read()
            .await
            .get(&query.title.to_lowercase())
            .cloned())
    }
}
