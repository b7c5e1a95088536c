//! The closed set of transfer strategies and their lookup by protocol kind.

use std::path::Path;

use super::local::LocalMountStrategy;
use super::rsync::RsyncStrategy;
use super::sftp::SftpStrategy;
use super::smb::SmbStrategy;
use super::types::{ClientConfig, ProtocolKind, TransferOutcome};
use crate::config::TargetConfig;
use crate::progress::ProgressSink;
use crate::retry::Failure;

/// One "move bytes to a target" implementation per protocol.
#[derive(Debug, Clone)]
pub enum TransferStrategy {
    LocalMount(LocalMountStrategy),
    Sftp(SftpStrategy),
    Smb(SmbStrategy),
    Rsync(RsyncStrategy),
}

impl TransferStrategy {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Self::LocalMount(_) => ProtocolKind::LocalMount,
            Self::Sftp(_) => ProtocolKind::Sftp,
            Self::Smb(_) => ProtocolKind::Smb,
            Self::Rsync(_) => ProtocolKind::Rsync,
        }
    }

    /// Connect to `target` without moving any bytes.
    pub async fn check(&self, target: &TargetConfig) -> Result<(), Failure> {
        match self {
            Self::LocalMount(s) => s.check(target).await,
            Self::Sftp(s) => s.check(target).await,
            Self::Smb(s) => s.check(target).await,
            Self::Rsync(s) => s.check(target).await,
        }
    }

    /// Place `source` at `destination` on `target`.
    ///
    /// Destination directories are created as needed and a partial file
    /// from an earlier attempt is resumed where the protocol allows it.
    pub async fn transfer(
        &self,
        source: &Path,
        target: &TargetConfig,
        destination: &str,
        sink: &ProgressSink,
    ) -> TransferOutcome {
        match self {
            Self::LocalMount(s) => s.transfer(source, target, destination, sink).await,
            Self::Sftp(s) => s.transfer(source, target, destination, sink).await,
            Self::Smb(s) => s.transfer(source, target, destination, sink).await,
            Self::Rsync(s) => s.transfer(source, target, destination, sink).await,
        }
    }
}

/// Registered strategies, keyed by protocol kind.
#[derive(Debug, Clone, Default)]
pub struct StrategySet {
    strategies: Vec<TransferStrategy>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All four protocols with the given client settings.
    pub fn standard(client: &ClientConfig) -> Self {
        Self::new()
            .with(TransferStrategy::LocalMount(LocalMountStrategy::new(
                client.buffer_size,
            )))
            .with(TransferStrategy::Sftp(SftpStrategy::new(client.clone())))
            .with(TransferStrategy::Smb(SmbStrategy::new(client.clone())))
            .with(TransferStrategy::Rsync(RsyncStrategy::new(client.clone())))
    }

    /// Register a strategy, replacing any other of the same kind.
    pub fn with(mut self, strategy: TransferStrategy) -> Self {
        self.strategies.retain(|s| s.kind() != strategy.kind());
        self.strategies.push(strategy);
        self
    }

    pub fn kinds(&self) -> Vec<ProtocolKind> {
        self.strategies.iter().map(TransferStrategy::kind).collect()
    }

    /// Strategy for a configured protocol name.
    ///
    /// Unknown or unregistered kinds are a configuration error.
    pub fn lookup(&self, protocol: &str) -> Result<&TransferStrategy, Failure> {
        let kind = ProtocolKind::from_name(protocol)
            .ok_or_else(|| Failure::config(format!("unknown protocol kind: {}", protocol)))?;
        self.strategies
            .iter()
            .find(|s| s.kind() == kind)
            .ok_or_else(|| Failure::config(format!("no strategy registered for {}", kind)))
    }
}
