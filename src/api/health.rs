use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub gateway: String,
    pub mpesa_configured: bool,
    pub mail_configured: bool,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.server.environment.clone(),
        gateway: state.gateway.name().to_string(),
        mpesa_configured: state.config.mpesa_configured(),
        mail_configured: state.config.mail_configured(),
    })
}
