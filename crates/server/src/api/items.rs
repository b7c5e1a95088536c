//! Item API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use mediarelay_core::{
    ContentCategory, EngineError, EnrichedMetadata, Item, ItemError, ItemFilter, ItemProgress,
    ItemState, LastError, Phase, Priority, QualityTier, RawCandidate,
};

use crate::state::AppState;

/// Maximum allowed limit for item queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for item queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a candidate
#[derive(Debug, Deserialize)]
pub struct CreateItemBody {
    pub title: String,
    pub url: String,
    /// Quality token, e.g. "720p" or "FHD"
    pub quality: Option<String>,
    #[serde(default)]
    pub category: ContentCategory,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<i32>,
    /// Explicit target name
    pub target: Option<String>,
}

impl From<CreateItemBody> for RawCandidate {
    fn from(body: CreateItemBody) -> Self {
        Self {
            title: body.title,
            url: body.url,
            quality: body.quality,
            category: body.category,
            season: body.season,
            episode: body.episode,
            year: body.year,
            target: body.target,
        }
    }
}

/// Query parameters for listing items
#[derive(Debug, Deserialize)]
pub struct ListItemsParams {
    /// Filter by state
    pub state: Option<String>,
    /// Filter by target
    pub target: Option<String>,
    /// Maximum number of items to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response for item operations
#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: String,
    pub title: String,
    pub source_url: String,
    pub category: ContentCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub quality: QualityTier,
    pub priority: Priority,
    pub target: String,
    pub state: ItemState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_phase: Option<Phase>,
    pub progress: ItemProgress,
    pub acquisition_attempts: u32,
    pub transfer_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EnrichedMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Item> for ItemResponse {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            title: item.title,
            source_url: item.source_url,
            category: item.category,
            season: item.season,
            episode: item.episode,
            year: item.year,
            quality: item.quality,
            priority: item.priority,
            target: item.target,
            state: item.state,
            paused_phase: item.paused_phase,
            progress: item.progress,
            acquisition_attempts: item.acquisition_attempts,
            transfer_attempts: item.transfer_attempts,
            destination_path: item.destination_path,
            metadata: item.metadata,
            last_error: item.last_error,
            retry_after: item.retry_after.map(|at| at.to_rfc3339()),
            created_at: item.created_at.to_rfc3339(),
            updated_at: item.updated_at.to_rfc3339(),
        }
    }
}

/// Response for listing items
#[derive(Debug, Serialize)]
pub struct ListItemsResponse {
    pub items: Vec<ItemResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ItemErrorResponse {
    pub error: String,
    /// Machine-readable rejection reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Live item that already covers a duplicate submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<String>,
}

pub(crate) type ApiError = (StatusCode, Json<ItemErrorResponse>);

fn error_response(status: StatusCode, error: String) -> ApiError {
    (
        status,
        Json(ItemErrorResponse {
            error,
            reason: None,
            existing_id: None,
        }),
    )
}

pub(crate) fn engine_error(e: EngineError) -> ApiError {
    match e {
        EngineError::Rejected(rejection) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ItemErrorResponse {
                error: rejection.to_string(),
                reason: Some(rejection.reason().to_string()),
                existing_id: None,
            }),
        ),
        EngineError::Item(ItemError::DuplicateItem {
            ref existing_id, ..
        }) => {
            let existing_id = Some(existing_id.clone());
            (
                StatusCode::CONFLICT,
                Json(ItemErrorResponse {
                    error: e.to_string(),
                    reason: Some("duplicate".to_string()),
                    existing_id,
                }),
            )
        }
        EngineError::Item(ItemError::NotFound(id)) => {
            error_response(StatusCode::NOT_FOUND, format!("Item not found: {}", id))
        }
        EngineError::UnknownTarget(name) => {
            error_response(StatusCode::NOT_FOUND, format!("Target not found: {}", name))
        }
        EngineError::Item(ItemError::StaleState { .. }) | EngineError::InvalidOperation(_) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        e => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a candidate
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateItemBody>,
) -> Result<(StatusCode, Json<ItemResponse>), ApiError> {
    let item = state.engine().enqueue(body.into()).map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(ItemResponse::from(item))))
}

/// Get an item by ID
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, ApiError> {
    let item = state.engine().item(&id).map_err(engine_error)?;
    Ok(Json(ItemResponse::from(item)))
}

/// List items with optional filters
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListItemsParams>,
) -> Result<Json<ListItemsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = ItemFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref state_filter) = params.state {
        match ItemState::parse(state_filter) {
            Some(item_state) => filter = filter.with_state(item_state),
            None => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown state: {}", state_filter),
                ))
            }
        }
    }

    if let Some(ref target) = params.target {
        filter = filter.with_target(target);
    }

    let items = state.engine().items(&filter).map_err(engine_error)?;

    // Total count (without pagination)
    let count_filter = ItemFilter {
        limit: i64::MAX,
        offset: 0,
        ..filter.clone()
    };
    let total = state.engine().count(&count_filter).map_err(engine_error)?;

    Ok(Json(ListItemsResponse {
        items: items.into_iter().map(ItemResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Pause an item
pub async fn pause_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, ApiError> {
    let item = state.engine().pause(&id).await.map_err(engine_error)?;
    Ok(Json(ItemResponse::from(item)))
}

/// Resume a paused item
pub async fn resume_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, ApiError> {
    let item = state.engine().resume(&id).map_err(engine_error)?;
    Ok(Json(ItemResponse::from(item)))
}

/// Cancel an item
pub async fn cancel_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, ApiError> {
    let item = state.engine().cancel(&id).await.map_err(engine_error)?;
    Ok(Json(ItemResponse::from(item)))
}

/// Delete a completed, failed or cancelled item
pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, ApiError> {
    let item = state.engine().delete(&id).await.map_err(engine_error)?;
    Ok(Json(ItemResponse::from(item)))
}
