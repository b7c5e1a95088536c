//! Optional metadata enrichment.
//!
//! Enrichment never gates admission: lookups run after an item is stored
//! and any error leaves the metadata empty.

mod tmdb;

pub use tmdb::{TmdbConfig, TmdbEnricher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::ContentCategory;

/// Errors that can occur during a metadata lookup.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// API returned an error.
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Client not configured (missing API key, etc.).
    #[error("Client not configured: {0}")]
    NotConfigured(String),
}

/// What the enricher is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataQuery {
    pub title: String,
    pub category: ContentCategory,
    pub year: Option<i32>,
}

/// Metadata returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedMetadata {
    pub provider: String,
    pub external_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
}

/// Enrichment configuration (`[enrichment]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub tmdb: Option<TmdbConfig>,
}

/// Metadata lookup collaborator.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    /// Returns the name of this provider.
    fn name(&self) -> &str;

    /// `Ok(None)` when the provider has no match.
    async fn enrich(&self, query: &MetadataQuery) -> Result<Option<EnrichedMetadata>, EnrichmentError>;
}
