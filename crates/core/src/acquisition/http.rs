//! Streaming HTTP fetcher with `Range` resume.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::traits::{FetchError, FetchRequest, FetchedArtifact, Fetcher};
use crate::progress::ProgressSink;
use crate::retry::Failure;
use crate::transfer::classify_io;

/// HTTP fetcher configuration (`[acquisition]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpFetcherConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_user_agent() -> String {
    format!("mediarelay/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpFetcherConfig) -> Result<Self, Failure> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| Failure::config(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        sink: &ProgressSink,
    ) -> Result<FetchedArtifact, FetchError> {
        let path = &request.destination;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| classify_io(&e, &format!("create {}", parent.display())))?;
        }

        let existing = fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);

        let mut req = self.client.get(&request.url);
        if existing > 0 {
            req = req.header(header::RANGE, format!("bytes={}-", existing));
        }

        debug!("GET {} (offset {})", request.url, existing);
        let response = req.send().await.map_err(classify_request_error)?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && existing > 0 {
            // Partial file already holds the whole body.
            sink.report(existing, Some(existing));
            return Ok(FetchedArtifact {
                path: path.clone(),
                size_bytes: existing,
            });
        }
        if !status.is_success() {
            return Err(classify_status(status, &request.url).into());
        }

        let resumed = status == StatusCode::PARTIAL_CONTENT;
        let mut written = if resumed { existing } else { 0 };
        let total = response.content_length().map(|len| len + written);
        if existing > 0 && !resumed {
            info!("Server ignored range request for {}; restarting", request.url);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(path)
            .await
            .map_err(|e| classify_io(&e, &format!("open {}", path.display())))?;

        sink.report(written, total);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                interrupt = sink.interrupted() => {
                    file.flush().await.ok();
                    return Err(FetchError::Interrupted(interrupt));
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(classify_request_error)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| classify_io(&e, &format!("write {}", path.display())))?;
            written += chunk.len() as u64;
            sink.report(written, total);
        }

        file.flush()
            .await
            .map_err(|e| classify_io(&e, &format!("flush {}", path.display())))?;

        if let Some(total) = total {
            if written < total {
                return Err(Failure::transport(format!(
                    "body ended early: {} of {} bytes",
                    written, total
                ))
                .into());
            }
        }

        Ok(FetchedArtifact {
            path: path.clone(),
            size_bytes: written,
        })
    }
}

fn classify_request_error(e: reqwest::Error) -> Failure {
    if e.is_builder() {
        Failure::source(format!("invalid source url: {}", e))
    } else {
        Failure::transport(format!("http request failed: {}", e))
    }
}

fn classify_status(status: StatusCode, url: &str) -> Failure {
    let message = format!("{} returned {}", url, status);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Failure::auth(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => Failure::transport(message),
        s if s.is_server_error() => Failure::transport(message),
        _ => Failure::source(message),
    }
}
