//! Mock fetcher for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::acquisition::{FetchError, FetchRequest, FetchedArtifact, Fetcher};
use crate::progress::ProgressSink;
use crate::retry::Failure;

/// Mock implementation of the Fetcher trait.
///
/// Writes a synthetic payload to the requested destination in chunks,
/// reporting progress and honouring pause/cancel between chunks. A partial
/// file left by an earlier attempt is resumed, not rewritten.
///
/// # Example
///
/// ```rust,ignore
/// use mediarelay_core::testing::MockFetcher;
///
/// let fetcher = MockFetcher::new();
/// fetcher.set_payload(4096, 512).await;
/// fetcher.fail_next(Failure::transport("connection reset")).await;
/// ```
#[derive(Debug)]
pub struct MockFetcher {
    /// Requests received, in call order.
    calls: Arc<RwLock<Vec<FetchRequest>>>,
    /// Failures returned by the next calls, one per call.
    failures: Arc<RwLock<VecDeque<Failure>>>,
    /// Payload size in bytes.
    payload_bytes: Arc<RwLock<u64>>,
    /// Bytes written between progress reports.
    chunk_bytes: Arc<RwLock<u64>>,
    /// Delay after each chunk.
    chunk_delay: Arc<RwLock<Duration>>,
    /// Stop reporting once this many bytes are in place.
    stall_at: Arc<RwLock<Option<u64>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    /// Create a new mock fetcher serving 64 KiB in 8 KiB chunks.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            failures: Arc::new(RwLock::new(VecDeque::new())),
            payload_bytes: Arc::new(RwLock::new(64 * 1024)),
            chunk_bytes: Arc::new(RwLock::new(8 * 1024)),
            chunk_delay: Arc::new(RwLock::new(Duration::from_millis(5))),
            stall_at: Arc::new(RwLock::new(None)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn set_payload(&self, bytes: u64, chunk: u64) {
        *self.payload_bytes.write().await = bytes;
        *self.chunk_bytes.write().await = chunk.max(1);
    }

    pub async fn set_chunk_delay(&self, delay: Duration) {
        *self.chunk_delay.write().await = delay;
    }

    /// Hang without further progress once `bytes` are written.
    pub async fn set_stall_at(&self, bytes: Option<u64>) {
        *self.stall_at.write().await = bytes;
    }

    /// Queue a failure for the next call.
    pub async fn fail_next(&self, failure: Failure) {
        self.failures.write().await.push_back(failure);
    }

    /// Queue the same failure for the next `times` calls.
    pub async fn fail_times(&self, failure: Failure, times: usize) {
        let mut failures = self.failures.write().await;
        for _ in 0..times {
            failures.push_back(failure.clone());
        }
    }

    pub async fn recorded_calls(&self) -> Vec<FetchRequest> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Calls for one item.
    pub async fn calls_for(&self, item_id: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.item_id == item_id)
            .count()
    }

    /// Highest number of fetches observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Tracks one running fetch.
struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn io_failure(e: std::io::Error) -> FetchError {
    FetchError::Failed(Failure::destination(format!("staging write failed: {}", e)))
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        sink: &ProgressSink,
    ) -> Result<FetchedArtifact, FetchError> {
        self.calls.write().await.push(request.clone());
        let _guard = ActiveGuard::enter(&self.active, &self.peak);

        if let Some(failure) = self.failures.write().await.pop_front() {
            return Err(failure.into());
        }

        let size = *self.payload_bytes.read().await;
        let chunk = *self.chunk_bytes.read().await;
        let delay = *self.chunk_delay.read().await;
        let stall_at = *self.stall_at.read().await;

        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_failure)?;
        }

        let mut written = match tokio::fs::metadata(&request.destination).await {
            Ok(meta) => meta.len().min(size),
            Err(_) => 0,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.destination)
            .await
            .map_err(io_failure)?;
        sink.report(written, Some(size));

        while written < size {
            sink.check()?;
            if stall_at.is_some_and(|at| written >= at) {
                return Err(sink.interrupted().await.into());
            }

            let n = chunk.min(size - written);
            file.write_all(&vec![b'm'; n as usize])
                .await
                .map_err(io_failure)?;
            written += n;
            sink.report(written, Some(size));

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        file.flush().await.map_err(io_failure)?;

        Ok(FetchedArtifact {
            path: request.destination.clone(),
            size_bytes: size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Signal;
    use tempfile::TempDir;
    use tokio::sync::watch;

    fn request(dir: &TempDir) -> FetchRequest {
        FetchRequest {
            item_id: "item-1".to_string(),
            url: "http://cdn/a.mkv".to_string(),
            destination: dir.path().join("item-1").join("a.mkv"),
        }
    }

    #[tokio::test]
    async fn test_fetch_writes_payload() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.set_payload(1000, 300).await;
        fetcher.set_chunk_delay(Duration::ZERO).await;

        let sink = ProgressSink::detached(Duration::from_millis(10));
        let artifact = fetcher.fetch(&request(&dir), &sink).await.unwrap();

        assert_eq!(artifact.size_bytes, 1000);
        assert_eq!(std::fs::metadata(&artifact.path).unwrap().len(), 1000);
        assert_eq!(sink.snapshot().bytes, 1000);
        assert_eq!(fetcher.call_count().await, 1);
        assert_eq!(fetcher.max_concurrent(), 1);
        assert_eq!(fetcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.set_chunk_delay(Duration::ZERO).await;
        fetcher.fail_next(Failure::transport("reset")).await;

        let sink = ProgressSink::detached(Duration::from_millis(10));
        let err = fetcher.fetch(&request(&dir), &sink).await.unwrap_err();
        assert!(matches!(err, FetchError::Failed(ref f) if f.is_retryable()));
        assert!(fetcher.fetch(&request(&dir), &sink).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_stops_on_pause_and_resumes() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.set_payload(1000, 100).await;
        fetcher.set_chunk_delay(Duration::ZERO).await;

        let (tx, rx) = watch::channel(Signal::Pause);
        let sink = ProgressSink::new(rx, Duration::from_millis(10));
        let err = fetcher.fetch(&request(&dir), &sink).await.unwrap_err();
        assert!(matches!(err, FetchError::Interrupted(_)));

        tx.send(Signal::Run).unwrap();
        let sink = ProgressSink::new(tx.subscribe(), Duration::from_millis(10));
        let artifact = fetcher.fetch(&request(&dir), &sink).await.unwrap();
        assert_eq!(std::fs::metadata(&artifact.path).unwrap().len(), 1000);
    }
}
