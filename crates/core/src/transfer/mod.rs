//! Transfer strategy set.
//!
//! Four protocol strategies behind one contract. The local mount strategy
//! copies natively; the remote ones drive the standard OpenSSH and Samba
//! clients, with one connection per running transfer.

mod local;
pub mod naming;
mod process;
mod rsync;
mod sftp;
mod smb;
mod ssh;
mod strategy;
mod types;

pub(crate) use local::classify_io;
pub use local::LocalMountStrategy;
pub use rsync::RsyncStrategy;
pub use sftp::SftpStrategy;
pub use smb::SmbStrategy;
pub use strategy::{StrategySet, TransferStrategy};
pub use types::{ClientConfig, ProtocolKind, TransferOutcome};
