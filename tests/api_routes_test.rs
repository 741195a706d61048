mod support;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use mpesa_booking_backend::api::{self, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    api::router(AppState {
        config: Arc::new(test_config()),
        orchestrator: h.orchestrator.clone(),
        listener: h.listener.clone(),
        gateway: h.gateway.clone(),
        dispatcher: h.dispatcher.clone(),
    })
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_configuration() {
    let h = harness(vec![], FakeMailer::default(), booking_config());
    let response = app(&h)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["mpesa_configured"], true);
    assert_eq!(body["gateway"], "fake");
}

#[tokio::test]
async fn test_callback_always_answers_accepted() {
    let h = harness(vec![], FakeMailer::default(), booking_config());

    for body in [
        Body::from("not json at all"),
        Body::from(r#"{"Body":{}}"#),
        Body::from(success_callback(uuid::Uuid::new_v4(), "QKT1UNKNOWN")),
    ] {
        let request = Request::builder()
            .method("POST")
            .uri("/api/payment/callback?ref=garbage")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        let response = app(&h).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "ResultCode": 0, "ResultDesc": "Accepted" })
        );
    }
}

#[tokio::test]
async fn test_invalid_booking_is_rejected_with_envelope() {
    let h = harness(vec![], FakeMailer::default(), booking_config());
    let mut request = serde_json::to_value(booking_request()).unwrap();
    request["guests"] = json!(0);

    let response = app(&h)
        .oneshot(post_json("/api/bookings", request))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["message"], "at least one guest is required");
    assert_eq!(h.gateway.calls(), 0);
}

#[tokio::test]
async fn test_malformed_booking_body_is_bad_request() {
    let h = harness(vec![], FakeMailer::default(), booking_config());
    let response = app(&h)
        .oneshot(post_json("/api/bookings", json!({ "hotel": "Monaco Palace" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_initiate_then_poll_attempt() {
    let h = harness(vec![Scripted::Ack], FakeMailer::default(), booking_config());
    let response = app(&h)
        .oneshot(post_json(
            "/api/payment/initiate",
            json!({
                "phone": "0712345678",
                "amount": 12000,
                "accountReference": "BK1A2B3C4D",
                "description": "Hotel booking"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["acknowledged"], true);
    let attempt_id = body["attemptId"].as_str().unwrap().to_string();

    let response = app(&h)
        .oneshot(
            Request::get(format!("/api/payment/{}", attempt_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = json_body(response).await;
    assert_eq!(snapshot["status"]["state"], "awaiting_confirmation");
    assert_eq!(snapshot["phone"], "254712345678");
    assert_eq!(snapshot["amount"], 12000);
}

#[tokio::test(start_paused = true)]
async fn test_initiated_payment_times_out_without_callback() {
    let h = harness(vec![Scripted::Ack], FakeMailer::default(), booking_config());
    let response = app(&h)
        .oneshot(post_json(
            "/api/payment/initiate",
            json!({ "phone": "0712345678", "amount": 500 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let attempt_id = json_body(response).await["attemptId"]
        .as_str()
        .unwrap()
        .to_string();

    tokio::time::sleep(booking_config().confirmation_timeout + Duration::from_secs(1)).await;

    let response = app(&h)
        .oneshot(
            Request::get(format!("/api/payment/{}", attempt_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(json_body(response).await["status"]["state"], "timed_out");

    let attempt_id = uuid::Uuid::parse_str(&attempt_id).unwrap();
    let outcome = h.listener.on_callback(
        &success_callback(attempt_id, "QKT1LATE02"),
        &query_for(attempt_id),
    );
    assert_eq!(
        outcome,
        mpesa_booking_backend::payments::CallbackOutcome::DiscardedAfterTimeout { attempt_id }
    );
}

#[tokio::test]
async fn test_initiate_maps_gateway_errors() {
    let h = harness(
        vec![Scripted::Rejected, Scripted::Network],
        FakeMailer::default(),
        booking_config(),
    );
    let body = json!({ "phone": "254712345678", "amount": 100 });

    let rejected = app(&h)
        .oneshot(post_json("/api/payment/initiate", body.clone()))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let envelope = json_body(rejected).await;
    assert_eq!(envelope["error"]["code"], "GATEWAY_REJECTED");
    assert_eq!(envelope["error"]["details"], "400.002.02");

    let unavailable = app(&h)
        .oneshot(post_json("/api/payment/initiate", body))
        .await
        .unwrap();
    assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_unknown_attempt_is_not_found() {
    let h = harness(vec![], FakeMailer::default(), booking_config());
    let response = app(&h)
        .oneshot(
            Request::get(format!("/api/payment/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(&h)
        .oneshot(Request::get("/api/payment/not-a-uuid").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_notify_receipt_and_feedback() {
    let h = harness(vec![], FakeMailer::default(), booking_config());

    let response = app(&h)
        .oneshot(post_json(
            "/api/notify/receipt",
            json!({
                "to": "amina@example.com",
                "subject": "Your booking",
                "text": "Thanks for booking",
                "html": "<p>Thanks for booking</p>"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "success": true }));

    let response = app(&h)
        .oneshot(post_json(
            "/api/email/send-feedback",
            json!({ "to": "amina@example.com", "subject": "Feedback", "message": "Lovely stay" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "success": true, "message": "Email sent successfully" })
    );

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].html.as_deref(), Some("<p>Thanks for booking</p>"));
    assert_eq!(sent[1].text, "Lovely stay");
}

#[tokio::test]
async fn test_feedback_reports_send_failure() {
    let h = harness(vec![], FakeMailer::failing(), booking_config());
    let response = app(&h)
        .oneshot(post_json(
            "/api/email/send-feedback",
            json!({ "to": "amina@example.com", "subject": "Feedback", "message": "Lovely stay" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["success"], false);
}

#[tokio::test]
async fn test_notify_rejects_bad_address() {
    let h = harness(vec![], FakeMailer::default(), booking_config());
    let response = app(&h)
        .oneshot(post_json(
            "/api/notify/receipt",
            json!({ "to": "nobody", "subject": "s", "text": "t" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.mailer.sent().is_empty());
}
