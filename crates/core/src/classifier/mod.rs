//! Classification of raw manifest candidates.

#[allow(clippy::module_inception)]
mod classifier;
mod quality;
mod types;

pub use classifier::Classifier;
pub use quality::{QualityBand, QualityTier};
pub use types::{ClassifierConfig, RawCandidate, Rejection};
