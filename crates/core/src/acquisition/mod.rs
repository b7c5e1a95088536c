//! Acquisition collaborator.
//!
//! The [`Fetcher`] trait is the boundary with the external fetch engine;
//! [`HttpFetcher`] is the default implementation.

mod http;
mod traits;

pub use http::{HttpFetcher, HttpFetcherConfig};
pub use traits::{file_name_from_url, FetchError, FetchRequest, FetchedArtifact, Fetcher};
