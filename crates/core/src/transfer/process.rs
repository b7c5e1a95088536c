//! Supervision of external transfer clients.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};

use crate::progress::{Interrupt, ProgressSink};
use crate::retry::Failure;

/// Callbacks invoked while a client runs.
#[async_trait]
pub(crate) trait OutputWatcher: Send {
    /// One line of stdout; carriage returns also end a line.
    fn on_line(&mut self, _line: &str) {}

    /// Called every progress interval.
    async fn on_tick(&mut self) {}
}

#[derive(Debug)]
pub(crate) enum ProcessEnd {
    Exited { status: ExitStatus, stderr: String },
    Interrupted(Interrupt),
}

/// Splits a byte stream on `\n` and `\r`.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let line = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            Some(line)
        }
    }
}

/// Prepare a client command: piped output, killed when dropped.
pub(crate) fn command(binary: &str) -> Command {
    let mut cmd = Command::new(binary);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

pub(crate) fn spawn(cmd: &mut Command, binary: &str) -> Result<Child, Failure> {
    cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Failure::config(format!("{} not found in PATH", binary))
        } else {
            Failure::transport(format!("failed to start {}: {}", binary, e))
        }
    })
}

/// Write `input` to the child's stdin and close it.
pub(crate) async fn feed_stdin(child: &mut Child, input: &str) -> Result<(), Failure> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| Failure::transport(format!("failed to write client input: {}", e)))?;
        stdin.shutdown().await.ok();
    }
    Ok(())
}

async fn read_some(stdout: &mut Option<ChildStdout>, buffer: &mut [u8]) -> std::io::Result<usize> {
    match stdout {
        Some(out) => out.read(buffer).await,
        None => Ok(0),
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut text = String::new();
    if let Some(mut reader) = reader {
        let mut bytes = Vec::new();
        if reader.read_to_end(&mut bytes).await.is_ok() {
            text = String::from_utf8_lossy(&bytes).into_owned();
        }
    }
    text
}

/// Run `child` to completion while feeding stdout to `watcher`, ticking it
/// every progress interval and killing the child on a pause or cancel.
pub(crate) async fn supervise(
    mut child: Child,
    sink: &ProgressSink,
    watcher: &mut dyn OutputWatcher,
) -> Result<ProcessEnd, Failure> {
    let mut stdout = child.stdout.take();
    let stderr_task = tokio::spawn(read_all(child.stderr.take()));

    let mut splitter = LineSplitter::default();
    let mut buffer = vec![0u8; 8192];
    let mut stdout_open = stdout.is_some();
    let mut ticker = tokio::time::interval(sink.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            interrupt = sink.interrupted() => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Ok(ProcessEnd::Interrupted(interrupt));
            }
            read = read_some(&mut stdout, &mut buffer), if stdout_open => {
                match read {
                    Ok(0) | Err(_) => stdout_open = false,
                    Ok(n) => {
                        for line in splitter.feed(&buffer[..n]) {
                            watcher.on_line(&line);
                        }
                    }
                }
            }
            _ = ticker.tick() => watcher.on_tick().await,
            status = child.wait() => {
                let status = status
                    .map_err(|e| Failure::transport(format!("failed to wait for client: {}", e)))?;
                // Drain what the client wrote before exiting.
                if stdout_open {
                    if let Some(out) = stdout.as_mut() {
                        let mut rest = Vec::new();
                        if out.read_to_end(&mut rest).await.is_ok() {
                            for line in splitter.feed(&rest) {
                                watcher.on_line(&line);
                            }
                        }
                    }
                }
                if let Some(line) = splitter.finish() {
                    watcher.on_line(&line);
                }
                let stderr = stderr_task.await.unwrap_or_default();
                return Ok(ProcessEnd::Exited { status, stderr });
            }
        }
    }
}

/// Run a short-lived command to completion, bounded by `timeout`.
pub(crate) async fn run_captured(
    mut cmd: Command,
    binary: &str,
    input: Option<&str>,
    timeout: std::time::Duration,
) -> Result<(ExitStatus, String, String), Failure> {
    if input.is_some() {
        cmd.stdin(Stdio::piped());
    }
    let mut child = spawn(&mut cmd, binary)?;
    if let Some(input) = input {
        feed_stdin(&mut child, input).await?;
    }
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let run = async {
        let (out, err, status) = tokio::join!(read_all(stdout), read_all(stderr), child.wait());
        status.map(|status| (status, out, err))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(Failure::transport(format!("{} failed: {}", binary, e))),
        Err(_) => Err(Failure::transport(format!(
            "{} timed out after {}s",
            binary,
            timeout.as_secs()
        ))),
    }
}

/// Quote a path for a POSIX shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quote a path for sftp/smbclient command input.
pub(crate) fn client_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Last non-empty line of client output, for error messages.
pub(crate) fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
}
