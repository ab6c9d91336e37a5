//! User operation handlers
//!
//! POST /api/submit_op        - accept a pre-signed operation, returns its op hash
//! GET  /api/status/{op_hash} - lifecycle status of one operation
//! GET  /api/history          - every operation ever accepted

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    Json,
};
use tracing::{error, info, warn};

use crate::models::operation::{ErrorResponse, SubmitOperationRequest, SubmitOperationResponse};
use crate::models::record::OperationStatusView;
use crate::services::intake::IntakeError;
use crate::services::status::StatusError;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: Some(code.to_string()),
        }),
    )
}

/// Submit operation endpoint handler
///
/// POST /api/submit_op
///
/// Returns as soon as the operation is persisted as `pending`; poll
/// `/api/status/{op_hash}` for the outcome.
///
/// # Response
///
/// ```json
/// { "op_hash": "9b2f1c9e-..." }
/// ```
pub async fn submit_op(
    State(state): State<AppState>,
    payload: Result<Json<SubmitOperationRequest>, JsonRejection>,
) -> Result<Json<SubmitOperationResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected malformed operation body");
        api_error(StatusCode::BAD_REQUEST, rejection.body_text(), "VALIDATION_ERROR")
    })?;

    let op_hash = state.intake.submit(request).await.map_err(|e| match e {
        IntakeError::Validation(err) => {
            warn!(error = %err, "Operation failed validation");
            api_error(StatusCode::BAD_REQUEST, err.to_string(), "VALIDATION_ERROR")
        }
        conflict @ IntakeError::SlotInUse { .. } => {
            warn!(error = %conflict, "Duplicate in-flight operation");
            api_error(StatusCode::CONFLICT, conflict.to_string(), "NONCE_SLOT_IN_USE")
        }
        IntakeError::Store(err) => {
            error!(error = %err, "Failed to persist operation");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist operation",
                "DATABASE_ERROR",
            )
        }
    })?;

    info!(op_hash = %op_hash, "Operation submitted");
    Ok(Json(SubmitOperationResponse { op_hash }))
}

/// GET /api/status/{op_hash}
///
/// # Response
/// - 200: `{op_hash, status, receipt, tx_hash?, error?}`; `receipt` is null
///   unless `completed`
/// - 404: unknown op hash
/// - 500: database error
pub async fn get_status(
    State(state): State<AppState>,
    Path(op_hash): Path<String>,
) -> Result<Json<OperationStatusView>, ApiError> {
    let view = state.status.get_status(&op_hash).await.map_err(|e| match e {
        StatusError::NotFound(_) => {
            api_error(StatusCode::NOT_FOUND, "Operation not found", "OPERATION_NOT_FOUND")
        }
        StatusError::Store(err) => {
            error!(op_hash = %op_hash, error = %err, "Database error fetching operation");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {}", err),
                "DATABASE_ERROR",
            )
        }
    })?;

    Ok(Json(view))
}

/// GET /api/history
pub async fn get_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<OperationStatusView>>, ApiError> {
    let history = state.status.list_history().await.map_err(|e| {
        error!(error = %e, "Database error listing operations");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Database error: {}", e),
            "DATABASE_ERROR",
        )
    })?;

    info!(count = history.len(), "Operation history query completed");
    Ok(Json(history))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.db.ping().await.map_err(|e| {
        error!(error = %e, "Database ping failed");
        api_error(StatusCode::SERVICE_UNAVAILABLE, "Database unavailable", "DATABASE_ERROR")
    })?;
    Ok("ok")
}
