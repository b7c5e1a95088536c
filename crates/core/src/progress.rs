//! Progress reporting and cooperative interruption for running phases.
//!
//! Every phase call receives a [`ProgressSink`]. The callee reports absolute
//! byte counts through it as often as it likes and checks for a pending
//! pause or cancel signal between I/O steps. The executor samples the sink
//! at a bounded interval to persist progress and to detect stalls.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Control signal delivered to a running phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    #[default]
    Run,
    Pause,
    Cancel,
}

/// A phase stopped early because of a control signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Pause,
    Cancel,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pause => f.write_str("paused"),
            Self::Cancel => f.write_str("cancelled"),
        }
    }
}

impl Signal {
    pub fn interrupt(&self) -> Option<Interrupt> {
        match self {
            Self::Run => None,
            Self::Pause => Some(Interrupt::Pause),
            Self::Cancel => Some(Interrupt::Cancel),
        }
    }
}

/// Latest progress observation of a running phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Bytes in place so far, including any resumed prefix.
    pub bytes: u64,
    /// Expected total, when known.
    pub total: Option<u64>,
    /// Rate between the last two reports, bytes per second.
    pub rate_bps: u64,
}

#[derive(Debug)]
struct RateWindow {
    at: Instant,
    bytes: u64,
}

/// Handle passed into a phase call.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    signal: watch::Receiver<Signal>,
    progress: Arc<watch::Sender<ProgressSnapshot>>,
    window: Arc<Mutex<RateWindow>>,
    interval: Duration,
}

impl ProgressSink {
    pub fn new(signal: watch::Receiver<Signal>, interval: Duration) -> Self {
        let (progress, _) = watch::channel(ProgressSnapshot::default());
        Self {
            signal,
            progress: Arc::new(progress),
            window: Arc::new(Mutex::new(RateWindow {
                at: Instant::now(),
                bytes: 0,
            })),
            interval,
        }
    }

    /// A sink that is never interrupted.
    pub fn detached(interval: Duration) -> Self {
        let (_tx, rx) = watch::channel(Signal::Run);
        Self::new(rx, interval)
    }

    /// Cadence at which callers should report and check for signals.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record the absolute number of bytes in place.
    pub fn report(&self, bytes: u64, total: Option<u64>) {
        let rate_bps = match self.window.lock() {
            Ok(mut window) => {
                let elapsed = window.at.elapsed().as_secs_f64();
                let rate = if elapsed > 0.0 && bytes >= window.bytes {
                    ((bytes - window.bytes) as f64 / elapsed) as u64
                } else {
                    0
                };
                if elapsed >= self.interval.as_secs_f64() || bytes < window.bytes {
                    window.at = Instant::now();
                    window.bytes = bytes;
                }
                rate
            }
            Err(_) => 0,
        };

        self.progress.send_if_modified(|snapshot| {
            let changed = snapshot.bytes != bytes || snapshot.total != total;
            snapshot.bytes = bytes;
            snapshot.total = total;
            snapshot.rate_bps = rate_bps;
            changed
        });
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.progress.borrow()
    }

    /// Observe every change of the reported byte count.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// The pending interrupt, if any.
    pub fn interrupt(&self) -> Option<Interrupt> {
        self.signal.borrow().interrupt()
    }

    /// `Err` with the pending interrupt, for use with `?` in copy loops.
    pub fn check(&self) -> Result<(), Interrupt> {
        match self.interrupt() {
            Some(interrupt) => Err(interrupt),
            None => Ok(()),
        }
    }

    /// Resolves once a pause or cancel is requested.
    ///
    /// Never resolves when the signal sender is gone.
    pub async fn interrupted(&self) -> Interrupt {
        let mut signal = self.signal.clone();
        loop {
            if let Some(interrupt) = signal.borrow_and_update().interrupt() {
                return interrupt;
            }
            if signal.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Resolves once `timeout` passes without the byte count increasing.
    pub async fn stalled(&self, timeout: Duration) {
        let mut progress = self.progress.subscribe();
        let mut seen = progress.borrow_and_update().bytes;
        let mut deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, progress.changed()).await {
                Err(_) => return,
                Ok(Err(_)) => std::future::pending::<()>().await,
                Ok(Ok(())) => {
                    let bytes = progress.borrow_and_update().bytes;
                    if bytes > seen {
                        seen = bytes;
                        deadline = Instant::now() + timeout;
                    }
                }
            }
        }
    }
}
