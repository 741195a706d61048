use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::booking::validation::normalize_phone;
use crate::payments::attempts::AttemptSnapshot;
use crate::payments::listener::CallbackQuery;
use crate::payments::types::StkPushRequest;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub phone: String,
    pub amount: u64,
    #[serde(default)]
    pub account_reference: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub attempt_id: Uuid,
    pub acknowledged: bool,
    pub checkout_request_id: Option<String>,
    pub customer_message: Option<String>,
}

/// Push a payment prompt that is not tied to a booking.
pub async fn initiate_payment(
    State(state): State<AppState>,
    payload: Result<Json<InitiatePaymentRequest>, JsonRejection>,
) -> Result<Json<InitiatePaymentResponse>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let phone = normalize_phone(&body.phone)?;
    if body.amount == 0 {
        return Err(ApiError::BadRequest("amount must be greater than zero".to_string()));
    }

    let request = StkPushRequest::new(
        phone,
        body.amount,
        body.account_reference
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "Payment".to_string()),
        body.description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| "Payment".to_string()),
    );
    let attempt_id = request.attempt_id;
    let mut pending = state
        .listener
        .track(&request, None, None)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let push = state.gateway.initiate_push(request).await;
    let answered = match &push {
        Ok(ack) if ack.acknowledged => {
            state
                .listener
                .acknowledge(ack)
                .map_err(|e| ApiError::Internal(e.to_string()))?;

            // Same bounded wait as a booking.
            let timeout = state.orchestrator.config().confirmation_timeout;
            tokio::spawn(async move {
                let status = pending.wait(timeout).await;
                debug!("Attempt {} settled as {}", attempt_id, status.label());
            });
            None
        }
        Ok(ack) => state
            .listener
            .fail(
                attempt_id,
                ack.response_description
                    .clone()
                    .unwrap_or_else(|| "push request not accepted".to_string()),
            )
            .map_err(|e| ApiError::Internal(e.to_string()))?,
        Err(e) => state
            .listener
            .fail(attempt_id, e.to_string())
            .map_err(|e| ApiError::Internal(e.to_string()))?,
    };

    if let Some(status) = answered {
        info!(
            "Attempt {} push reported a failure but the payer already answered: {}",
            attempt_id,
            status.label()
        );
        return Ok(Json(InitiatePaymentResponse {
            attempt_id,
            acknowledged: true,
            checkout_request_id: None,
            customer_message: None,
        }));
    }

    let ack = push?;
    Ok(Json(InitiatePaymentResponse {
        attempt_id,
        acknowledged: ack.acknowledged,
        checkout_request_id: ack.checkout_request_id,
        customer_message: ack.customer_message,
    }))
}

/// Gateway callback. Always answers 200 so the gateway stops retrying;
/// whatever was wrong with the callback is logged by the listener.
pub async fn payment_callback(
    State(state): State<AppState>,
    query: Option<Query<CallbackQuery>>,
    body: Bytes,
) -> Json<Value> {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let outcome = state.listener.on_callback(&body, &query);
    debug!("Callback handled: {:?}", outcome);
    Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptSnapshot>, ApiError> {
    let attempt_id = Uuid::parse_str(&attempt_id)
        .map_err(|_| ApiError::BadRequest(format!("'{}' is not a valid attempt id", attempt_id)))?;

    let snapshot = state
        .listener
        .attempt(attempt_id)
        .ok_or_else(|| ApiError::NotFound(format!("Payment attempt {} not found", attempt_id)))?;
    info!(
        "Payment attempt {} polled: {}",
        attempt_id,
        snapshot.attempt.status.label()
    );
    Ok(Json(snapshot))
}
