//! Request intake and status API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use torrelay_core::{
    DeliveryRecord, NewRequest, Request, RequestStatus, Requester, StoreError,
};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a locator
#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    /// Magnet URI or info hash
    pub locator: String,
    /// Actor the request is made on behalf of
    pub requester_id: String,
    /// Sets the requester's priority (higher = served first on ties)
    pub priority: Option<i32>,
}

/// Status view of a request
#[derive(Debug, Serialize)]
pub struct RequestResponse {
    pub id: String,
    pub locator: String,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_completed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_pct: Option<f64>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_ref: Option<String>,
}

impl From<Request> for RequestResponse {
    fn from(request: Request) -> Self {
        Self {
            status: request.status(),
            progress_pct: request.progress_pct(),
            id: request.id,
            locator: request.locator,
            display_name: request.display_name,
            size_bytes: request.size_bytes,
            bytes_completed: request.bytes_completed,
            created_at: request.created_at.to_rfc3339(),
            claimed_at: request.claimed_at.map(|t| t.to_rfc3339()),
            started_at: request.started_at.map(|t| t.to_rfc3339()),
            finished_at: request.finished_at.map(|t| t.to_rfc3339()),
            last_error: request.last_error,
            delivery_ref: request.delivery_ref,
        }
    }
}

/// Request status plus per-requester delivery bookkeeping
#[derive(Debug, Serialize)]
pub struct RequestDetailResponse {
    #[serde(flatten)]
    pub request: RequestResponse,
    pub deliveries: Vec<DeliveryRecord>,
}

/// Requests linked to a requester
#[derive(Debug, Serialize)]
pub struct RequesterRequestsResponse {
    pub requester: Requester,
    pub requests: Vec<RequestResponse>,
}

/// Requesters still waiting to be told about a delivered request
#[derive(Debug, Serialize)]
pub struct PendingDeliveriesResponse {
    pub request_id: String,
    pub pending: Vec<Requester>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    let status = match e {
        StoreError::NotFound(_) | StoreError::RequesterNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyDelivered(_) => StatusCode::CONFLICT,
        StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error(status, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a locator; joins the existing request if one is already known
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestResponse>), ApiError> {
    let locator = body.locator.trim();
    if locator.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "locator must not be empty"));
    }
    if body.requester_id.trim().is_empty() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "requester_id must not be empty",
        ));
    }

    if let Some(priority) = body.priority {
        state
            .store()
            .upsert_requester(&body.requester_id, priority)
            .map_err(store_error)?;
    }

    let request = state
        .store()
        .create_request(NewRequest::new(locator, body.requester_id.as_str()))
        .map_err(store_error)?;

    info!(
        request_id = %request.id,
        requester_id = %body.requester_id,
        status = request.status().as_str(),
        "Request submitted"
    );

    Ok((StatusCode::CREATED, Json(RequestResponse::from(request))))
}

/// Get a request by ID
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RequestDetailResponse>, ApiError> {
    let request = state
        .store()
        .get(&id)
        .map_err(store_error)?
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("Request not found: {}", id)))?;

    let deliveries = state.store().delivery_records(&id).map_err(store_error)?;

    Ok(Json(RequestDetailResponse {
        request: RequestResponse::from(request),
        deliveries,
    }))
}

/// List requests linked to a requester
pub async fn list_requester_requests(
    State(state): State<Arc<AppState>>,
    Path(requester_id): Path<String>,
) -> Result<Json<RequesterRequestsResponse>, ApiError> {
    let requester = state
        .store()
        .get_requester(&requester_id)
        .map_err(store_error)?
        .ok_or_else(|| {
            error(
                StatusCode::NOT_FOUND,
                format!("Requester not found: {}", requester_id),
            )
        })?;

    let requests = state
        .store()
        .list_for_requester(&requester_id)
        .map_err(store_error)?;

    Ok(Json(RequesterRequestsResponse {
        requester,
        requests: requests.into_iter().map(RequestResponse::from).collect(),
    }))
}

/// Requesters not yet told about a delivered request
pub async fn pending_deliveries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PendingDeliveriesResponse>, ApiError> {
    if state.store().get(&id).map_err(store_error)?.is_none() {
        return Err(error(
            StatusCode::NOT_FOUND,
            format!("Request not found: {}", id),
        ));
    }

    let pending = state
        .store()
        .undelivered_requesters(&id)
        .map_err(store_error)?;

    Ok(Json(PendingDeliveriesResponse {
        request_id: id,
        pending,
    }))
}

/// Acknowledge that a requester was told about a delivered request
pub async fn acknowledge_delivery(
    State(state): State<Arc<AppState>>,
    Path((id, requester_id)): Path<(String, String)>,
) -> Result<Json<PendingDeliveriesResponse>, ApiError> {
    let request = state
        .store()
        .get(&id)
        .map_err(store_error)?
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("Request not found: {}", id)))?;

    if request.status() != RequestStatus::Delivered {
        return Err(error(
            StatusCode::CONFLICT,
            format!(
                "Cannot acknowledge request {}: current status is {}",
                id,
                request.status().as_str()
            ),
        ));
    }

    state
        .store()
        .mark_delivered(&id, &requester_id)
        .map_err(store_error)?;

    let pending = state
        .store()
        .undelivered_requesters(&id)
        .map_err(store_error)?;

    Ok(Json(PendingDeliveriesResponse {
        request_id: id,
        pending,
    }))
}
