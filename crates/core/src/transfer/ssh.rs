//! OpenSSH control-master sessions shared by the sftp and rsync strategies.
//!
//! A session authenticates once (`ssh -M -N`) and every client invocation
//! for the same slot multiplexes over its control socket. Each slot opens
//! its own session; sessions are never shared between items.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::process::{last_line, run_captured};
use super::types::ClientConfig;
use crate::config::TargetConfig;
use crate::retry::Failure;

pub(crate) struct SshSession {
    binary: String,
    login: String,
    control_path: PathBuf,
    master: Child,
    timeout: Duration,
}

impl SshSession {
    /// Connect and authenticate, returning once the master is ready.
    pub(crate) async fn open(config: &ClientConfig, target: &TargetConfig) -> Result<Self, Failure> {
        let login = target
            .remote_login()
            .ok_or_else(|| Failure::config(format!("target {} has no host", target.name)))?;

        tokio::fs::create_dir_all(&config.runtime_dir)
            .await
            .map_err(|e| {
                Failure::config(format!(
                    "cannot create {}: {}",
                    config.runtime_dir.display(),
                    e
                ))
            })?;
        let control_path = config
            .runtime_dir
            .join(format!("cm-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]));

        let mut cmd = Command::new(&config.ssh_binary);
        cmd.arg("-M")
            .arg("-N")
            .args(["-o", &format!("ControlPath={}", control_path.display())])
            .args(["-o", "ControlPersist=no"])
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", &format!("ConnectTimeout={}", config.connect_timeout_secs)])
            .args(["-o", "ServerAliveInterval=15"]);
        if let Some(port) = target.port {
            cmd.args(["-p", &port.to_string()]);
        }
        if let Some(identity) = &target.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(&login)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let master = super::process::spawn(&mut cmd, &config.ssh_binary)?;
        let mut session = Self {
            binary: config.ssh_binary.clone(),
            login,
            control_path,
            master,
            timeout: Duration::from_secs(config.connect_timeout_secs.max(1)),
        };

        match session.wait_ready().await {
            Ok(()) => {
                debug!("SSH session to {} ready", session.login);
                Ok(session)
            }
            Err(failure) => {
                session.close().await;
                Err(failure)
            }
        }
    }

    /// Open a session and release it again.
    pub(crate) async fn check(config: &ClientConfig, target: &TargetConfig) -> Result<(), Failure> {
        let session = Self::open(config, target).await?;
        session.close().await;
        Ok(())
    }

    async fn wait_ready(&mut self) -> Result<(), Failure> {
        let deadline = Instant::now() + self.timeout + Duration::from_secs(2);
        loop {
            if let Some(status) = self
                .master
                .try_wait()
                .map_err(|e| Failure::transport(format!("ssh master failed: {}", e)))?
            {
                let mut stderr = String::new();
                if let Some(mut err) = self.master.stderr.take() {
                    use tokio::io::AsyncReadExt;
                    let _ = err.read_to_string(&mut stderr).await;
                }
                return Err(classify_ssh_failure(status.code(), &stderr));
            }

            let (status, _, _) = run_captured(self.check_command(), &self.binary, None, self.timeout)
                .await?;
            if status.success() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Failure::transport(format!(
                    "ssh handshake with {} timed out",
                    self.login
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn check_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.control_args())
            .args(["-O", "check"])
            .arg(&self.login)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub(crate) fn login(&self) -> &str {
        &self.login
    }

    /// Run `script` through the remote shell and capture its output.
    pub(crate) async fn exec(&self, script: &str) -> Result<(bool, String), Failure> {
        let mut cmd = super::process::command(&self.binary);
        cmd.args(self.control_args()).arg(&self.login).arg("--").arg(script);
        let (status, stdout, _) = run_captured(cmd, &self.binary, None, self.timeout).await?;
        Ok((status.success(), stdout))
    }

    /// Options that route a client through this session's master.
    pub(crate) fn control_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ]
    }

    /// `ssh ...` invocation for clients that take a remote shell (rsync `-e`).
    pub(crate) fn remote_shell(&self) -> String {
        format!(
            "{} -o ControlPath={} -o ControlMaster=no -o BatchMode=yes",
            self.binary,
            self.control_path.display()
        )
    }

    /// Release the connection. Safe to call on any exit path.
    pub(crate) async fn close(mut self) {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.control_args())
            .args(["-O", "exit"])
            .arg(&self.login)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Err(failure) = run_captured(cmd, &self.binary, None, Duration::from_secs(5)).await {
            debug!("ssh -O exit failed: {}", failure);
        }
        if let Err(e) = self.master.kill().await {
            debug!("ssh master already gone: {}", e);
        }
        if let Err(e) = tokio::fs::remove_file(&self.control_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove control socket {}: {}",
                    self.control_path.display(),
                    e
                );
            }
        }
    }
}

/// Classify an ssh handshake failure from its exit code and stderr.
pub(crate) fn classify_ssh_failure(code: Option<i32>, stderr: &str) -> Failure {
    let text = stderr.to_ascii_lowercase();
    let detail = last_line(stderr);

    if text.contains("permission denied")
        || text.contains("authentication failed")
        || text.contains("too many authentication failures")
        || text.contains("host key verification failed")
    {
        return Failure::auth(format!("ssh authentication rejected: {}", detail));
    }
    if text.contains("could not resolve hostname") || text.contains("bad configuration option") {
        return Failure::config(format!("ssh configuration error: {}", detail));
    }
    Failure::transport(format!(
        "ssh connection failed (exit {}): {}",
        code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
        detail
    ))
}
