//! Types shared by the transfer strategies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::progress::Interrupt;
use crate::retry::Failure;

/// Protocol kinds with a registered strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    LocalMount,
    Sftp,
    Smb,
    Rsync,
}

impl ProtocolKind {
    /// Resolve a configured protocol name. `local` and `nfs` are accepted
    /// as aliases of `local_mount`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "local_mount" | "local" | "nfs" => Some(Self::LocalMount),
            "sftp" => Some(Self::Sftp),
            "smb" | "cifs" => Some(Self::Smb),
            "rsync" => Some(Self::Rsync),
            _ => None,
        }
    }

    /// Whether transfers perform a connect/authenticate handshake.
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::LocalMount)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalMount => "local_mount",
            Self::Sftp => "sftp",
            Self::Smb => "smb",
            Self::Rsync => "rsync",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success {
        /// Size of the placed file.
        bytes: u64,
        /// Bytes already on the target when the attempt started.
        resumed_from: u64,
    },
    RetryableFailure(Failure),
    FatalFailure(Failure),
    /// Stopped by a pause or cancel signal; partial data is kept on pause.
    Interrupted(Interrupt),
}

impl TransferOutcome {
    /// Wrap a failure according to its kind.
    pub fn from_failure(failure: Failure) -> Self {
        if failure.is_retryable() {
            Self::RetryableFailure(failure)
        } else {
            Self::FatalFailure(failure)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<Failure> for TransferOutcome {
    fn from(failure: Failure) -> Self {
        Self::from_failure(failure)
    }
}

impl From<Interrupt> for TransferOutcome {
    fn from(interrupt: Interrupt) -> Self {
        Self::Interrupted(interrupt)
    }
}

/// External client settings for the protocol strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
    #[serde(default = "default_sftp_binary")]
    pub sftp_binary: String,
    #[serde(default = "default_rsync_binary")]
    pub rsync_binary: String,
    #[serde(default = "default_smbclient_binary")]
    pub smbclient_binary: String,

    /// Handshake timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Directory for ssh control sockets.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Copy buffer for local mounts, in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_sftp_binary() -> String {
    "sftp".to_string()
}

fn default_rsync_binary() -> String {
    "rsync".to_string()
}

fn default_smbclient_binary() -> String {
    "smbclient".to_string()
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_runtime_dir() -> PathBuf {
    std::env::temp_dir().join("mediarelay-ssh")
}

fn default_buffer_size() -> usize {
    256 * 1024
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ssh_binary: default_ssh_binary(),
            sftp_binary: default_sftp_binary(),
            rsync_binary: default_rsync_binary(),
            smbclient_binary: default_smbclient_binary(),
            connect_timeout_secs: default_connect_timeout(),
            runtime_dir: default_runtime_dir(),
            buffer_size: default_buffer_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names() {
        assert_eq!(ProtocolKind::from_name("local_mount"), Some(ProtocolKind::LocalMount));
        assert_eq!(ProtocolKind::from_name("NFS"), Some(ProtocolKind::LocalMount));
        assert_eq!(ProtocolKind::from_name("sftp"), Some(ProtocolKind::Sftp));
        assert_eq!(ProtocolKind::from_name(" rsync "), Some(ProtocolKind::Rsync));
        assert_eq!(ProtocolKind::from_name("smb"), Some(ProtocolKind::Smb));
        assert_eq!(ProtocolKind::from_name("ftp"), None);
    }

    #[test]
    fn test_outcome_from_failure() {
        assert!(matches!(
            TransferOutcome::from(Failure::transport("reset")),
            TransferOutcome::RetryableFailure(_)
        ));
        assert!(matches!(
            TransferOutcome::from(Failure::auth("denied")),
            TransferOutcome::FatalFailure(_)
        ));
    }
}
