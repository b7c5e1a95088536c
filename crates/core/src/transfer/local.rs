//! Transfer onto a pre-mounted local filesystem path.
//!
//! Bytes are appended to `<destination>.part` and renamed into place once
//! complete, so an interrupted copy resumes from the partial file.

use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::types::TransferOutcome;
use crate::config::TargetConfig;
use crate::progress::{Interrupt, ProgressSink};
use crate::retry::Failure;

/// Copies into a locally mounted target.
#[derive(Debug, Clone)]
pub struct LocalMountStrategy {
    buffer_size: usize,
}

impl LocalMountStrategy {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(4096),
        }
    }

    pub async fn transfer(
        &self,
        source: &Path,
        target: &TargetConfig,
        destination: &str,
        sink: &ProgressSink,
    ) -> TransferOutcome {
        let destination = PathBuf::from(destination);
        let part = part_path(&destination);

        match self.copy(source, target, &destination, &part, sink).await {
            Ok(outcome) => outcome,
            Err(CopyError::Interrupted(Interrupt::Cancel)) => {
                if let Err(e) = fs::remove_file(&part).await {
                    debug!("No partial file to discard at {}: {}", part.display(), e);
                }
                TransferOutcome::Interrupted(Interrupt::Cancel)
            }
            Err(CopyError::Interrupted(interrupt)) => TransferOutcome::Interrupted(interrupt),
            Err(CopyError::Failed(failure)) => TransferOutcome::from_failure(failure),
        }
    }

    /// The base path exists (or can be created) and accepts writes.
    pub async fn check(&self, target: &TargetConfig) -> Result<(), Failure> {
        let base = Path::new(&target.base_path);
        fs::create_dir_all(base)
            .await
            .map_err(|e| classify_io(&e, &format!("cannot create {}", base.display())))?;

        let marker = base.join(format!(".mediarelay-check-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&marker, b"")
            .await
            .map_err(|e| classify_io(&e, &format!("{} is not writable", base.display())))?;
        if let Err(e) = fs::remove_file(&marker).await {
            warn!("Failed to remove {}: {}", marker.display(), e);
        }
        Ok(())
    }

    async fn copy(
        &self,
        source: &Path,
        target: &TargetConfig,
        destination: &Path,
        part: &Path,
        sink: &ProgressSink,
    ) -> Result<TransferOutcome, CopyError> {
        let total = fs::metadata(source)
            .await
            .map_err(|e| source_error(source, e))?
            .len();

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| classify_io(&e, &format!("create {}", parent.display())))?;
        }

        let mut offset = match fs::metadata(part).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if offset > total {
            warn!(
                "Partial file {} is larger than its source; restarting",
                part.display()
            );
            offset = 0;
        }
        let resumed_from = offset;
        sink.report(offset, Some(total));

        let mut reader = File::open(source)
            .await
            .map_err(|e| source_error(source, e))?;
        reader
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| source_error(source, e))?;
        let mut reader = BufReader::with_capacity(self.buffer_size, reader);

        let mut writer = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(offset == 0)
            .append(offset > 0)
            .open(part)
            .await
            .map_err(|e| classify_io(&e, &format!("open {}", part.display())))?;

        let mut buffer = vec![0u8; self.buffer_size];
        let started = Instant::now();
        let mut sent = 0u64;

        loop {
            if let Some(interrupt) = sink.interrupt() {
                writer.flush().await.ok();
                return Err(CopyError::Interrupted(interrupt));
            }

            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| classify_io(&e, &format!("read {}", source.display())))?;
            if read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| classify_io(&e, &format!("write {}", part.display())))?;

            sent += read as u64;
            offset += read as u64;
            sink.report(offset, Some(total));

            if let Some(limit) = target.bandwidth_limit_bps.filter(|l| *l > 0) {
                throttle(started, sent, limit).await;
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| classify_io(&e, &format!("flush {}", part.display())))?;
        writer
            .sync_all()
            .await
            .map_err(|e| classify_io(&e, &format!("sync {}", part.display())))?;
        drop(writer);

        fs::rename(part, destination)
            .await
            .map_err(|e| classify_io(&e, &format!("rename into {}", destination.display())))?;

        if target.verify_checksum {
            let expected = sha256_file(source, self.buffer_size)
                .await
                .map_err(|e| source_error(source, e))?;
            let actual = sha256_file(destination, self.buffer_size)
                .await
                .map_err(|e| classify_io(&e, &format!("hash {}", destination.display())))?;
            if expected != actual {
                if let Err(e) = fs::remove_file(destination).await {
                    warn!("Failed to remove corrupt copy {}: {}", destination.display(), e);
                }
                return Err(CopyError::Failed(Failure::checksum(&expected, &actual)));
            }
        }

        Ok(TransferOutcome::Success {
            bytes: offset,
            resumed_from,
        })
    }
}

enum CopyError {
    Interrupted(Interrupt),
    Failed(Failure),
}

impl From<Failure> for CopyError {
    fn from(failure: Failure) -> Self {
        Self::Failed(failure)
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Sleep until `sent` bytes fit within `limit` bytes per second.
async fn throttle(started: Instant, sent: u64, limit: u64) {
    let expected = Duration::from_secs_f64(sent as f64 / limit as f64);
    let elapsed = started.elapsed();
    if expected > elapsed {
        tokio::time::sleep(expected - elapsed).await;
    }
}

pub(crate) async fn sha256_file(path: &Path, buffer_size: usize) -> std::io::Result<String> {
    let file = File::open(path).await?;
    let mut reader = BufReader::with_capacity(buffer_size, file);
    let mut buffer = vec![0u8; buffer_size];
    let mut hasher = Sha256::new();
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn source_error(source: &Path, e: std::io::Error) -> Failure {
    if e.kind() == std::io::ErrorKind::NotFound {
        Failure::source(format!("staged artifact missing: {}", source.display()))
    } else {
        classify_io(&e, &format!("read {}", source.display()))
    }
}

const EIO: i32 = 5;
const EAGAIN: i32 = 11;
const ENOSPC: i32 = 28;
const ETIMEDOUT: i32 = 110;
const ESTALE: i32 = 116;
const EDQUOT: i32 = 122;

/// Transient I/O is retryable; every other filesystem error is fatal.
pub(crate) fn classify_io(e: &std::io::Error, context: &str) -> Failure {
    use std::io::ErrorKind as Io;

    let message = format!("{}: {}", context, e);
    match e.raw_os_error() {
        Some(EIO | EAGAIN | ETIMEDOUT | ESTALE) => return Failure::transport(message),
        Some(ENOSPC | EDQUOT) => {
            return Failure::destination(format!("insufficient space, {}", message))
        }
        _ => {}
    }
    match e.kind() {
        Io::Interrupted | Io::TimedOut | Io::WouldBlock => Failure::transport(message),
        _ => Failure::destination(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Signal;
    use crate::retry::ErrorKind;
    use tempfile::TempDir;
    use tokio::sync::watch;

    async fn staged(dir: &TempDir, size: usize) -> PathBuf {
        let path = dir.path().join("staged.mp4");
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        fs::write(&path, data).await.unwrap();
        path
    }

    fn sink() -> ProgressSink {
        ProgressSink::detached(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_copy_creates_directories() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let source = staged(&src_dir, 100_000).await;
        let target = TargetConfig::local("nas", dst_dir.path().to_string_lossy());
        let destination = dst_dir.path().join("Movies/Dune (2021).mp4");

        let outcome = LocalMountStrategy::new(8192)
            .transfer(&source, &target, &destination.to_string_lossy(), &sink())
            .await;

        assert_eq!(
            outcome,
            TransferOutcome::Success {
                bytes: 100_000,
                resumed_from: 0
            }
        );
        assert_eq!(fs::read(&destination).await.unwrap(), fs::read(&source).await.unwrap());
        assert!(!part_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_resume_from_partial_file() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let source = staged(&src_dir, 50_000).await;
        let destination = dst_dir.path().join("out.mp4");

        let data = fs::read(&source).await.unwrap();
        fs::write(part_path(&destination), &data[..20_000]).await.unwrap();

        let target = TargetConfig::local("nas", dst_dir.path().to_string_lossy()).with_checksum(true);
        let outcome = LocalMountStrategy::new(4096)
            .transfer(&source, &target, &destination.to_string_lossy(), &sink())
            .await;

        assert_eq!(
            outcome,
            TransferOutcome::Success {
                bytes: 50_000,
                resumed_from: 20_000
            }
        );
        assert_eq!(fs::read(&destination).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_corrupt_partial_fails_checksum() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let source = staged(&src_dir, 10_000).await;
        let destination = dst_dir.path().join("out.mp4");
        fs::write(part_path(&destination), vec![0xffu8; 1000]).await.unwrap();

        let target = TargetConfig::local("nas", dst_dir.path().to_string_lossy()).with_checksum(true);
        let outcome = LocalMountStrategy::new(4096)
            .transfer(&source, &target, &destination.to_string_lossy(), &sink())
            .await;

        match outcome {
            TransferOutcome::RetryableFailure(failure) => {
                assert_eq!(failure.kind, ErrorKind::ChecksumMismatch)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let dst_dir = TempDir::new().unwrap();
        let target = TargetConfig::local("nas", dst_dir.path().to_string_lossy());
        let outcome = LocalMountStrategy::new(4096)
            .transfer(
                Path::new("/nonexistent/staged.mp4"),
                &target,
                &dst_dir.path().join("out.mp4").to_string_lossy(),
                &sink(),
            )
            .await;

        match outcome {
            TransferOutcome::FatalFailure(failure) => {
                assert_eq!(failure.kind, ErrorKind::FatalSourceError)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pause_keeps_partial_file() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let source = staged(&src_dir, 64 * 1024).await;
        let destination = dst_dir.path().join("out.mp4");
        let target = TargetConfig::local("nas", dst_dir.path().to_string_lossy())
            .with_bandwidth_limit(64 * 1024);

        let (tx, rx) = watch::channel(Signal::Run);
        let sink = ProgressSink::new(rx, Duration::from_millis(10));
        let task = tokio::spawn({
            let source = source.clone();
            let destination = destination.clone();
            async move {
                LocalMountStrategy::new(4096)
                    .transfer(&source, &target, &destination.to_string_lossy(), &sink)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send_replace(Signal::Pause);

        assert_eq!(task.await.unwrap(), TransferOutcome::Interrupted(Interrupt::Pause));
        let partial = fs::metadata(part_path(&destination)).await.unwrap().len();
        assert!(partial > 0 && partial < 64 * 1024);
    }

    #[tokio::test]
    async fn test_check_creates_base_path() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("nas").join("media");
        let target = TargetConfig::local("nas", base.to_string_lossy().into_owned());

        LocalMountStrategy::new(4096).check(&target).await.unwrap();
        assert!(base.is_dir());
        assert_eq!(std::fs::read_dir(&base).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_check_rejects_file_as_base_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let target = TargetConfig::local("nas", file.to_string_lossy().into_owned());

        let err = LocalMountStrategy::new(4096).check(&target).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FatalDestinationError);
    }

    #[test]
    fn test_classify_io() {
        let no_space = std::io::Error::from_raw_os_error(ENOSPC);
        assert_eq!(classify_io(&no_space, "write").kind, ErrorKind::FatalDestinationError);

        let eio = std::io::Error::from_raw_os_error(EIO);
        assert_eq!(classify_io(&eio, "write").kind, ErrorKind::RetryableTransportError);

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(classify_io(&denied, "open").kind, ErrorKind::FatalDestinationError);

        let timeout = std::io::Error::from(std::io::ErrorKind::TimedOut);
        assert_eq!(classify_io(&timeout, "read").kind, ErrorKind::RetryableTransportError);
    }
}
