//! Manifest ingestion API.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use mediarelay_core::{ingest_source, M3uManifest};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestParams {
    /// Label for logs
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RejectedEntry {
    pub title: String,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: Vec<String>,
    pub duplicates: Vec<String>,
    pub rejected: Vec<RejectedEntry>,
}

/// Ingest an M3U playlist sent as the request body.
pub async fn ingest_m3u(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IngestParams>,
    body: String,
) -> Json<IngestResponse> {
    let name = params.name.unwrap_or_else(|| "upload.m3u".to_string());
    let report = ingest_source(state.engine(), M3uManifest::new(name, Cursor::new(body)));

    Json(IngestResponse {
        accepted: report.accepted,
        duplicates: report.duplicates,
        rejected: report
            .rejected
            .into_iter()
            .map(|r| RejectedEntry {
                title: r.title,
                url: r.url,
                reason: r.reason,
            })
            .collect(),
    })
}
