//! rsync over an ssh control-master session.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::path::Path;
use tracing::debug;

use super::naming::remote_parent;
use super::process::{self, last_line, shell_quote, OutputWatcher, ProcessEnd};
use super::ssh::{classify_ssh_failure, SshSession};
use super::types::{ClientConfig, TransferOutcome};
use crate::config::TargetConfig;
use crate::progress::ProgressSink;
use crate::retry::Failure;

/// `--info=progress2` line: `  1,234,567  45%   10.00MB/s    0:00:12`
static PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([\d,]+)\s+(\d+)%").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct RsyncStrategy {
    client: ClientConfig,
}

impl RsyncStrategy {
    pub fn new(client: ClientConfig) -> Self {
        Self { client }
    }

    /// Authenticate against the target over ssh.
    pub async fn check(&self, target: &TargetConfig) -> Result<(), Failure> {
        SshSession::check(&self.client, target).await
    }

    pub async fn transfer(
        &self,
        source: &Path,
        target: &TargetConfig,
        destination: &str,
        sink: &ProgressSink,
    ) -> TransferOutcome {
        let total = match tokio::fs::metadata(source).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Failure::source(format!("staged artifact missing: {}", source.display()))
                    .into()
            }
        };

        let session = match SshSession::open(&self.client, target).await {
            Ok(session) => session,
            Err(failure) => return failure.into(),
        };
        let outcome = self.sync(&session, source, target, destination, total, sink).await;
        session.close().await;
        outcome
    }

    async fn sync(
        &self,
        session: &SshSession,
        source: &Path,
        target: &TargetConfig,
        destination: &str,
        total: u64,
        sink: &ProgressSink,
    ) -> TransferOutcome {
        let resumed_from = remote_size(session, destination)
            .await
            .filter(|size| *size <= total)
            .unwrap_or(0);
        sink.report(resumed_from, Some(total));

        let mut cmd = process::command(&self.client.rsync_binary);
        cmd.args(build_args(session, source, target, destination));
        let child = match process::spawn(&mut cmd, &self.client.rsync_binary) {
            Ok(child) => child,
            Err(failure) => return failure.into(),
        };

        let mut watcher = ProgressWatcher { sink, total };
        let end = match process::supervise(child, sink, &mut watcher).await {
            Ok(end) => end,
            Err(failure) => return failure.into(),
        };

        match end {
            ProcessEnd::Interrupted(interrupt) => TransferOutcome::Interrupted(interrupt),
            ProcessEnd::Exited { status, .. } if status.success() => {
                sink.report(total, Some(total));
                TransferOutcome::Success {
                    bytes: total,
                    resumed_from,
                }
            }
            ProcessEnd::Exited { status, stderr } => {
                classify_rsync_exit(status.code(), &stderr).into()
            }
        }
    }
}

fn build_args(
    session: &SshSession,
    source: &Path,
    target: &TargetConfig,
    destination: &str,
) -> Vec<String> {
    let mut args = vec![
        "--partial".to_string(),
        "--append-verify".to_string(),
        "--info=progress2".to_string(),
        "--protect-args".to_string(),
        "-e".to_string(),
        session.remote_shell(),
        "--rsync-path".to_string(),
        format!(
            "mkdir -p {} && rsync",
            shell_quote(remote_parent(destination))
        ),
    ];
    if let Some(limit) = target.bandwidth_limit_bps.filter(|l| *l > 0) {
        // rsync takes KiB per second.
        args.push(format!("--bwlimit={}", (limit / 1024).max(1)));
    }
    args.push(source.to_string_lossy().into_owned());
    args.push(format!("{}:{}", session.login(), destination));
    args
}

/// Size of a partial file left on the target by `--partial`.
async fn remote_size(session: &SshSession, path: &str) -> Option<u64> {
    let script = format!("stat -c %s {} 2>/dev/null", shell_quote(path));
    match session.exec(&script).await {
        Ok((true, stdout)) => stdout.trim().parse().ok(),
        Ok((false, _)) => None,
        Err(failure) => {
            debug!("rsync size probe failed: {}", failure);
            None
        }
    }
}

struct ProgressWatcher<'a> {
    sink: &'a ProgressSink,
    total: u64,
}

#[async_trait]
impl OutputWatcher for ProgressWatcher<'_> {
    fn on_line(&mut self, line: &str) {
        if let Some(bytes) = parse_progress(line) {
            self.sink.report(bytes.min(self.total), Some(self.total));
        }
    }
}

pub(crate) fn parse_progress(line: &str) -> Option<u64> {
    let caps = PROGRESS.captures(line)?;
    caps.get(1)?.as_str().replace(',', "").parse().ok()
}

/// Map an rsync exit status to a failure.
pub(crate) fn classify_rsync_exit(code: Option<i32>, stderr: &str) -> Failure {
    let text = stderr.to_ascii_lowercase();
    let detail = last_line(stderr);

    if text.contains("no space left") || text.contains("disk quota exceeded") {
        return Failure::destination(format!("insufficient remote space: {}", detail));
    }

    match code {
        Some(255) => classify_ssh_failure(code, stderr),
        Some(1 | 2 | 4) => Failure::config(format!("rsync rejected its arguments: {}", detail)),
        Some(3 | 11) => Failure::destination(format!("rsync destination error: {}", detail)),
        Some(5) if text.contains("permission denied") => {
            Failure::auth(format!("rsync authentication rejected: {}", detail))
        }
        Some(23) if text.contains("permission denied") => {
            Failure::destination(format!("rsync destination error: {}", detail))
        }
        Some(24) => Failure::source(format!("staged artifact vanished: {}", detail)),
        Some(127) => Failure::config(format!("rsync not available on the target: {}", detail)),
        Some(c) => Failure::transport(format!("rsync exited with {}: {}", c, detail)),
        None => Failure::transport(format!("rsync terminated by signal: {}", detail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ErrorKind;

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("      1,234,567  45%   10.00MB/s    0:00:12"), Some(1_234_567));
        assert_eq!(parse_progress("          32,768   0%    0.00kB/s    0:00:00"), Some(32_768));
        assert_eq!(parse_progress("sending incremental file list"), None);
    }

    #[test]
    fn test_classify_rsync_exit() {
        assert_eq!(classify_rsync_exit(Some(12), "").kind, ErrorKind::RetryableTransportError);
        assert_eq!(classify_rsync_exit(Some(30), "timeout").kind, ErrorKind::RetryableTransportError);
        assert_eq!(classify_rsync_exit(Some(3), "").kind, ErrorKind::FatalDestinationError);
        assert_eq!(classify_rsync_exit(Some(24), "").kind, ErrorKind::FatalSourceError);
        assert_eq!(
            classify_rsync_exit(Some(11), "write failed: No space left on device (28)").kind,
            ErrorKind::FatalDestinationError
        );
        assert_eq!(
            classify_rsync_exit(Some(255), "Permission denied (publickey).").kind,
            ErrorKind::FatalAuthError
        );
        assert_eq!(
            classify_rsync_exit(Some(255), "Connection reset by peer").kind,
            ErrorKind::RetryableTransportError
        );
    }

    #[test]
    fn test_progress_lines_reach_sink() {
        let sink = ProgressSink::detached(std::time::Duration::from_millis(10));
        let mut watcher = ProgressWatcher {
            sink: &sink,
            total: 1000,
        };
        watcher.on_line("            400  40%    0.00kB/s    0:00:00");
        assert_eq!(sink.snapshot().bytes, 400);
        watcher.on_line("          1,000 100%    1.00MB/s    0:00:01");
        watcher.on_line("sent 1,100 bytes  received 35 bytes");
        assert_eq!(sink.snapshot().bytes, 1000);
    }
}
