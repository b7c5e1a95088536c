//! SMB transfer via Samba's `smbclient`.
//!
//! A connect-and-authenticate probe runs first so handshake failures are
//! classified before any bytes move. Each client run is its own connection
//! and is killed on drop.

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
use super::types::{ClientConfig, TransferOutcome};
use crate::config::TargetConfig;
use crate::progress::ProgressSink;
use crate::retry::Failure;

static NT_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"NT_STATUS_([A-Z_]+)").expect("valid regex"));

/// `  Dune (2021).mp4     A 1048576  Mon Jan  1 00:00:00 2024`
static LS_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s[A-Z]*\s+(\d+)\s+\w{3} \w{3}\s+\d+ \d{2}:\d{2}:\d{2} \d{4}\s*$")
        .expect("valid regex")
});

#[derive(Debug, Clone)]
pub struct SmbStrategy {
    client: ClientConfig,
}

impl SmbStrategy {
    pub fn new(client: ClientConfig) -> Self {
        Self { client }
    }

    /// Connect to the share with the target's credentials.
    pub async fn check(&self, target: &TargetConfig) -> Result<(), Failure> {
        SmbSession::connect(&self.client, target).await.map(|_| ())
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

        let session = match SmbSession::connect(&self.client, target).await {
            Ok(session) => session,
            Err(failure) => return failure.into(),
        };

        let resumed_from = session
            .remote_size(destination)
            .await
            .filter(|size| *size <= total)
            .unwrap_or(0);
        sink.report(resumed_from, Some(total));

        let mut script = String::new();
        let parent = remote_parent(destination);
        let mut current = String::new();
        for part in parent.split('/').filter(|p| !p.is_empty() && *p != ".") {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            script.push_str(&format!("mkdir {}\n", client_quote(&current)));
        }
        let put = if resumed_from > 0 { "reput" } else { "put" };
        script.push_str(&format!(
            "{} {} {}\n",
            put,
            client_quote(&source.to_string_lossy()),
            client_quote(destination.trim_start_matches('/'))
        ));

        let mut cmd = session.command();
        cmd.stdin(Stdio::piped());
        let mut child = match process::spawn(&mut cmd, &self.client.smbclient_binary) {
            Ok(child) => child,
            Err(failure) => return failure.into(),
        };
        if let Err(failure) = process::feed_stdin(&mut child, &script).await {
            return failure.into();
        }

        let mut watcher = SmbWatcher {
            session: &session,
            destination,
            total,
            sink,
            output: String::new(),
        };
        let end = match process::supervise(child, sink, &mut watcher).await {
            Ok(end) => end,
            Err(failure) => return failure.into(),
        };

        match end {
            ProcessEnd::Interrupted(interrupt) => TransferOutcome::Interrupted(interrupt),
            ProcessEnd::Exited { status, stderr } => {
                let output = format!("{}\n{}", watcher.output, stderr);
                if let Some(failure) = classify_smb_output(&output, false) {
                    return failure.into();
                }
                if !status.success() {
                    return Failure::transport(format!(
                        "smbclient exited with {:?}: {}",
                        status.code(),
                        last_line(&output)
                    ))
                    .into();
                }
                sink.report(total, Some(total));
                TransferOutcome::Success {
                    bytes: total,
                    resumed_from,
                }
            }
        }
    }
}

struct SmbSession<'a> {
    client: &'a ClientConfig,
    service: String,
    target: &'a TargetConfig,
}

impl<'a> SmbSession<'a> {
    /// Probe the share with the target's credentials.
    async fn connect(client: &'a ClientConfig, target: &'a TargetConfig) -> Result<Self, Failure> {
        let host = target
            .host
            .as_deref()
            .ok_or_else(|| Failure::config(format!("target {} has no host", target.name)))?;
        let share = target
            .share
            .as_deref()
            .ok_or_else(|| Failure::config(format!("target {} has no share", target.name)))?;

        let session = Self {
            client,
            service: format!("//{}/{}", host, share.trim_matches('/')),
            target,
        };

        let mut cmd = session.command();
        cmd.args(["-c", "pwd"]);
        let (status, stdout, stderr) =
            process::run_captured(cmd, &client.smbclient_binary, None, session.timeout()).await?;
        let output = format!("{}\n{}", stdout, stderr);
        if let Some(failure) = classify_smb_output(&output, true) {
            return Err(failure);
        }
        if !status.success() {
            return Err(Failure::transport(format!(
                "smb handshake with {} failed: {}",
                session.service,
                last_line(&output)
            )));
        }
        debug!("SMB session to {} ready", session.service);
        Ok(session)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.client.connect_timeout_secs.max(1))
    }

    fn command(&self) -> Command {
        let mut cmd = process::command(&self.client.smbclient_binary);
        cmd.arg(&self.service)
            .args(["-t", &self.client.connect_timeout_secs.max(1).to_string()]);
        if let Some(port) = self.target.port {
            cmd.args(["-p", &port.to_string()]);
        }
        match (&self.target.username, &self.target.password) {
            (Some(user), Some(password)) => {
                cmd.args(["-U", user]).env("PASSWD", password);
            }
            (Some(user), None) => {
                cmd.args(["-U", user, "-N"]);
            }
            (None, _) => {
                cmd.arg("-N");
            }
        }
        cmd
    }

    async fn remote_size(&self, path: &str) -> Option<u64> {
        let mut cmd = self.command();
        cmd.args(["-c", &format!("ls {}", client_quote(path.trim_start_matches('/')))]);
        match process::run_captured(cmd, &self.client.smbclient_binary, None, self.timeout()).await {
            Ok((status, stdout, _)) if status.success() => parse_ls_size(&stdout),
            Ok(_) => None,
            Err(failure) => {
                debug!("smb size probe failed: {}", failure);
                None
            }
        }
    }
}

struct SmbWatcher<'a> {
    session: &'a SmbSession<'a>,
    destination: &'a str,
    total: u64,
    sink: &'a ProgressSink,
    output: String,
}

#[async_trait]
impl OutputWatcher for SmbWatcher<'_> {
    fn on_line(&mut self, line: &str) {
        self.output.push_str(line);
        self.output.push('\n');
    }

    async fn on_tick(&mut self) {
        if let Some(size) = self.session.remote_size(self.destination).await {
            self.sink.report(size.min(self.total), Some(self.total));
        }
    }
}

fn parse_ls_size(output: &str) -> Option<u64> {
    output
        .lines()
        .filter_map(|line| LS_SIZE.captures(line))
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .next()
}

/// First meaningful `NT_STATUS_*` code in client output, as a failure.
///
/// `ACCESS_DENIED` while connecting means the credentials were refused;
/// after connecting it means the destination is not writable.
pub(crate) fn classify_smb_output(output: &str, handshake: bool) -> Option<Failure> {
    let code = NT_STATUS
        .captures_iter(output)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .find(|code| !matches!(*code, "OBJECT_NAME_COLLISION" | "OK"))?;

    let message = format!("NT_STATUS_{}: {}", code, last_line(output));
    Some(match code {
        "LOGON_FAILURE" | "WRONG_PASSWORD" | "ACCOUNT_DISABLED" | "ACCOUNT_LOCKED_OUT"
        | "PASSWORD_EXPIRED" | "ACCOUNT_RESTRICTION" => Failure::auth(message),
        "ACCESS_DENIED" if handshake => Failure::auth(message),
        "BAD_NETWORK_NAME" => Failure::config(message),
        "DISK_FULL" | "QUOTA_EXCEEDED" => {
            Failure::destination(format!("insufficient remote space, {}", message))
        }
        "ACCESS_DENIED" | "OBJECT_PATH_NOT_FOUND" | "OBJECT_NAME_INVALID"
        | "OBJECT_PATH_SYNTAX_BAD" | "OBJECT_NAME_NOT_FOUND" | "NOT_A_DIRECTORY"
        | "MEDIA_WRITE_PROTECTED" | "FILE_IS_A_DIRECTORY" => Failure::destination(message),
        _ => Failure::transport(message),
    })
}
