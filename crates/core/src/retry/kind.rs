//! Failure taxonomy shared by both execution phases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classification of a phase failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, timeout or connection-reset class of errors.
    RetryableTransportError,
    /// No progress was observed within the stall timeout.
    Stalled,
    /// Placed bytes did not hash to the staged artifact's checksum.
    ChecksumMismatch,
    /// Credentials were rejected.
    FatalAuthError,
    /// Bad destination path, permissions, or quota exceeded.
    FatalDestinationError,
    /// Unknown protocol kind or unusable target configuration.
    FatalConfigError,
    /// The source is gone, unsupported, or the staged artifact vanished.
    FatalSourceError,
}

impl ErrorKind {
    /// Whether a failure of this kind may be attempted again.
    ///
    /// `ChecksumMismatch` is retryable on its first occurrence only; the
    /// escalation on repeat is applied by [`super::RetryPolicy`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetryableTransportError | Self::Stalled | Self::ChecksumMismatch
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryableTransportError => "retryable_transport_error",
            Self::Stalled => "stalled",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::FatalAuthError => "fatal_auth_error",
            Self::FatalDestinationError => "fatal_destination_error",
            Self::FatalConfigError => "fatal_config_error",
            Self::FatalSourceError => "fatal_source_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified phase failure: kind plus human-readable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RetryableTransportError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FatalAuthError, message)
    }

    pub fn destination(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FatalDestinationError, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FatalConfigError, message)
    }

    pub fn source(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FatalSourceError, message)
    }

    pub fn checksum(expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorKind::ChecksumMismatch,
            format!("expected sha256 {}, got {}", expected, actual),
        )
    }

    pub fn stalled(timeout: Duration) -> Self {
        Self::new(
            ErrorKind::Stalled,
            format!("no progress for {}s", timeout.as_secs()),
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
