use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::booking::validation::validate_email;
use crate::notifications::OutboundEmail;

#[derive(Debug, Deserialize)]
pub struct ReceiptMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(default)]
    pub html: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackMessage {
    pub to: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn required(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

pub async fn send_receipt(
    State(state): State<AppState>,
    payload: Result<Json<ReceiptMessage>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let to = validate_email(&body.to)?;
    required("subject", &body.subject)?;
    required("text", &body.text)?;

    state
        .dispatcher
        .send_message(OutboundEmail {
            to,
            subject: body.subject,
            text: body.text,
            html: body.html.filter(|h| !h.trim().is_empty()),
        })
        .await?;

    Ok(Json(SendResponse {
        success: true,
        message: None,
    }))
}

pub async fn send_feedback(
    State(state): State<AppState>,
    payload: Result<Json<FeedbackMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<SendResponse>), ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let to = validate_email(&body.to)?;
    required("subject", &body.subject)?;
    required("message", &body.message)?;

    let sent = state
        .dispatcher
        .send_message(OutboundEmail {
            to,
            subject: body.subject,
            text: body.message,
            html: None,
        })
        .await;

    Ok(match sent {
        Ok(()) => (
            StatusCode::OK,
            Json(SendResponse {
                success: true,
                message: Some("Email sent successfully".to_string()),
            }),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SendResponse {
                success: false,
                message: Some("Failed to send email".to_string()),
            }),
        ),
    })
}
