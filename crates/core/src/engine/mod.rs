//! Acquisition and transfer orchestration.
//!
//! - **Admission**: strict priority, FIFO within a tier, under a global
//!   acquisition ceiling and an independent ceiling per target
//! - **Acquisition**: one task per admitted item, fetching into staging
//! - **Transfer**: one task per admitted item, relaying via the target's
//!   protocol strategy
//!
//! Phase failures never escape the executors; they become state
//! transitions decided by the retry policy.

mod acquire;
mod config;
mod phase;
mod relay;
mod runner;
mod scheduler;
mod signal;
mod types;

pub use config::EngineConfig;
pub use runner::Engine;
pub use types::{ConnectionCheck, EngineError, EngineStatus, TargetStatus, TickReport};
