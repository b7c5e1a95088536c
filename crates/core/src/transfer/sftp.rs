//! SFTP transfer via the OpenSSH `sftp` client in batch mode.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::naming::remote_parent;
use super::process::{self, client_quote, last_line, OutputWatcher, ProcessEnd};
use super::ssh::{classify_ssh_failure, SshSession};
use super::types::{ClientConfig, TransferOutcome};
use crate::config::TargetConfig;
use crate::progress::ProgressSink;
use crate::retry::Failure;

/// `-rw-r--r--    1 relay    relay     1048576 Jan  1 00:00 /srv/a.mp4`
static LS_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[-dlrwxsStT]{10}\S*\s+\d+\s+\S+\s+\S+\s+(\d+)\s").expect("valid regex")
});

#[derive(Debug, Clone)]
pub struct SftpStrategy {
    client: ClientConfig,
}

impl SftpStrategy {
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
        let outcome = self.put(&session, source, destination, total, sink).await;
        session.close().await;
        outcome
    }

    async fn put(
        &self,
        session: &SshSession,
        source: &Path,
        destination: &str,
        total: u64,
        sink: &ProgressSink,
    ) -> TransferOutcome {
        let resumed_from = self
            .remote_size(session, destination)
            .await
            .filter(|size| *size <= total)
            .unwrap_or(0);
        sink.report(resumed_from, Some(total));

        let mut script = mkdir_commands(remote_parent(destination));
        let put = if resumed_from > 0 { "put -a" } else { "put" };
        script.push_str(&format!(
            "{} {} {}\n",
            put,
            client_quote(&source.to_string_lossy()),
            client_quote(destination)
        ));

        let mut cmd = self.batch_command(session);
        cmd.stdin(Stdio::piped()).kill_on_drop(true);
        let mut child = match process::spawn(&mut cmd, &self.client.sftp_binary) {
            Ok(child) => child,
            Err(failure) => return failure.into(),
        };
        if let Err(failure) = process::feed_stdin(&mut child, &script).await {
            return failure.into();
        }

        let mut watcher = RemoteSizeWatcher {
            strategy: self,
            session,
            destination,
            total,
            sink,
        };
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
                classify_sftp_failure(status.code(), &stderr).into()
            }
        }
    }

    fn batch_command(&self, session: &SshSession) -> Command {
        let mut cmd = process::command(&self.client.sftp_binary);
        cmd.args(["-b", "-"]).args(session.control_args()).arg(session.login());
        cmd
    }

    /// Size of `path` on the remote side, if it exists.
    async fn remote_size(&self, session: &SshSession, path: &str) -> Option<u64> {
        let cmd = self.batch_command(session);
        let script = format!("ls -l {}\n", client_quote(path));
        let timeout = Duration::from_secs(self.client.connect_timeout_secs.max(1));
        match process::run_captured(cmd, &self.client.sftp_binary, Some(&script), timeout).await {
            Ok((status, stdout, _)) if status.success() => parse_ls_size(&stdout),
            Ok(_) => None,
            Err(failure) => {
                debug!("sftp size probe failed: {}", failure);
                None
            }
        }
    }
}

struct RemoteSizeWatcher<'a> {
    strategy: &'a SftpStrategy,
    session: &'a SshSession,
    destination: &'a str,
    total: u64,
    sink: &'a ProgressSink,
}

#[async_trait]
impl OutputWatcher for RemoteSizeWatcher<'_> {
    async fn on_tick(&mut self) {
        if let Some(size) = self.strategy.remote_size(self.session, self.destination).await {
            self.sink.report(size.min(self.total), Some(self.total));
        }
    }
}

/// Batch lines creating every ancestor of `dir`; `-` ignores "already exists".
fn mkdir_commands(dir: &str) -> String {
    let mut script = String::new();
    let mut current = String::new();
    if dir.starts_with('/') {
        current.push('/');
    }
    for part in dir.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(part);
        script.push_str(&format!("-mkdir {}\n", client_quote(&current)));
    }
    script
}

pub(crate) fn parse_ls_size(output: &str) -> Option<u64> {
    output
        .lines()
        .filter_map(|line| LS_SIZE.captures(line.trim_start()))
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .next()
}

/// Classify a failed sftp batch run.
pub(crate) fn classify_sftp_failure(code: Option<i32>, stderr: &str) -> Failure {
    let text = stderr.to_ascii_lowercase();
    let detail = last_line(stderr);

    if code == Some(255) {
        return classify_ssh_failure(code, stderr);
    }
    if text.contains("no space left") || text.contains("quota exceeded") || text.contains("disk full") {
        return Failure::destination(format!("insufficient remote space: {}", detail));
    }
    if text.contains("permission denied") || text.contains("no such file") || text.contains("not a directory") {
        return Failure::destination(format!("sftp destination error: {}", detail));
    }
    if text.contains("connection closed") || text.contains("broken pipe") || text.contains("connection reset") {
        return Failure::transport(format!("sftp connection lost: {}", detail));
    }
    Failure::transport(format!("sftp failed: {}", detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ErrorKind;

    #[test]
    fn test_parse_ls_size() {
        let out = "sftp> ls -l \"/srv/a.mp4\"\n-rw-r--r--    1 relay    relay     1048576 Jan  1 00:00 /srv/a.mp4\n";
        assert_eq!(parse_ls_size(out), Some(1_048_576));
        assert_eq!(parse_ls_size("Can't ls: \"/srv/a.mp4\" not found"), None);
    }

    #[test]
    fn test_mkdir_commands() {
        assert_eq!(
            mkdir_commands("/srv/Movies"),
            "-mkdir \"/srv\"\n-mkdir \"/srv/Movies\"\n"
        );
        assert_eq!(mkdir_commands("media/tv"), "-mkdir \"media\"\n-mkdir \"media/tv\"\n");
        assert_eq!(mkdir_commands("/"), "");
    }

    #[test]
    fn test_classify_sftp_failure() {
        assert_eq!(
            classify_sftp_failure(Some(1), "remote open(\"/srv/a.mp4\"): Permission denied").kind,
            ErrorKind::FatalDestinationError
        );
        assert_eq!(
            classify_sftp_failure(Some(1), "dest open: Failure\nNo space left on device").kind,
            ErrorKind::FatalDestinationError
        );
        assert_eq!(
            classify_sftp_failure(Some(1), "Connection closed").kind,
            ErrorKind::RetryableTransportError
        );
        assert_eq!(
            classify_sftp_failure(Some(255), "Permission denied (publickey).").kind,
            ErrorKind::FatalAuthError
        );
    }
}
