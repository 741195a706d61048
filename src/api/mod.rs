//! HTTP surface

pub mod bookings;
pub mod error;
pub mod health;
pub mod notify;
pub mod payments;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/bookings", post(bookings::create_booking))
        .route("/api/payment/initiate", post(payments::initiate_payment))
        .route("/api/payment/callback", post(payments::payment_callback))
        .route("/api/payment/:attempt_id", get(payments::get_payment))
        // Paths used by the first version of the booking UI
        .route("/api/mpesa/stkpush", post(payments::initiate_payment))
        .route("/api/mpesa/callback", post(payments::payment_callback))
        .route("/api/notify/receipt", post(notify::send_receipt))
        .route("/api/email/send-feedback", post(notify::send_feedback))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
