//! The acquisition collaborator contract.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::progress::{Interrupt, ProgressSink};
use crate::retry::Failure;

/// One fetch of a source URL into the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub item_id: String,
    pub url: String,
    /// Local file to write. May already hold a partial download.
    pub destination: PathBuf,
}

/// The staged artifact produced by a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Stopped by a pause or cancel signal.
    #[error("fetch {0}")]
    Interrupted(Interrupt),

    #[error(transparent)]
    Failed(#[from] Failure),
}

impl From<Interrupt> for FetchError {
    fn from(interrupt: Interrupt) -> Self {
        Self::Interrupted(interrupt)
    }
}

/// External fetch engine driven by the acquisition executor.
///
/// Implementations report absolute byte counts to the sink and must check
/// it for a pending interrupt between reads.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the name of this fetcher implementation.
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        request: &FetchRequest,
        sink: &ProgressSink,
    ) -> Result<FetchedArtifact, FetchError>;
}

/// File name for a source URL: the decoded last path segment.
pub fn file_name_from_url(url: &str) -> String {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);

    let segment = match path.rsplit_once('/') {
        Some((_, last)) => last,
        None => "",
    };
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let cleaned = crate::transfer::naming::sanitize(&decoded);

    if segment.is_empty() || cleaned == "untitled" {
        "download".to_string()
    } else {
        cleaned
    }
}
