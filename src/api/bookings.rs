use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::booking::{BookingRequest, BookingResult};

/// Runs the whole booking, so the response only comes back once the
/// payment has resolved or the confirmation window has closed.
pub async fn create_booking(
    State(state): State<AppState>,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<Json<BookingResult>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let result = state.orchestrator.submit_booking(request).await?;
    Ok(Json(result))
}
