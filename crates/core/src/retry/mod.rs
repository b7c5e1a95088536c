//! Retry/failure policy.
//!
//! Executors classify every phase failure into an [`ErrorKind`] and consult
//! the [`RetryPolicy`]; the decision is applied as a state transition, never
//! propagated to the scheduler.

mod kind;
mod policy;

pub use kind::{ErrorKind, Failure};
pub use policy::{decide, Decision, RetryConfig, RetryPolicy, Verdict};
