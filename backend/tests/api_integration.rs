mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use lessons::api::router;
use lessons::state::AppState;

use common::{TestEnv, config};

fn app(env: &TestEnv) -> Router {
    let state = AppState::new(
        env.db.pool.clone(),
        &env.stores,
        env.gateway.clone(),
        env.notifier.clone(),
        &config(),
    );
    router(state)
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let env = TestEnv::new().await;
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, _) = send(app(&env), req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn insufficient_balance_is_payment_required() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(4_000).await;

    let (status, body) = send(
        app(&env),
        post_json(
            "/bookings/lessons",
            json!({
                "learner_id": learner.id,
                "instructor_id": instructor.id,
                "start": "2030-01-07T09:00:00",
                "duration_minutes": 60,
                "lesson_type": "standard"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["field"], "balance");
    assert!(body["message"].as_str().unwrap().contains("45.00"));
    assert_eq!(env.balance(learner.id).await, 4_000);
}

#[tokio::test]
async fn booking_then_listing_lessons() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(10_000).await;

    let (status, lesson) = send(
        app(&env),
        post_json(
            "/bookings/lessons",
            json!({
                "learner_id": learner.id,
                "instructor_id": instructor.id,
                "start": "2030-01-07T10:00:00",
                "duration_minutes": 60,
                "lesson_type": "standard"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(lesson["price"], 4_500);

    let req = Request::builder()
        .uri(format!("/learners/{}/lessons?status=scheduled", learner.id))
        .body(Body::empty())
        .unwrap();
    let (status, listed) = send(app(&env), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], lesson["id"]);
}

#[tokio::test]
async fn slots_endpoint_lists_open_times() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;

    let req = Request::builder()
        .uri(format!(
            "/instructors/{}/slots?from=2030-01-07&to=2030-01-07&duration=60",
            instructor.id
        ))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&env), req).await;

    assert_eq!(status, StatusCode::OK);
    let starts: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["start"].as_str().unwrap())
        .collect();
    assert_eq!(starts, ["09:00", "09:30", "10:00", "10:30", "11:00"]);
}

#[tokio::test]
async fn unsigned_webhook_is_rejected() {
    let env = TestEnv::new().await;
    let req = post_json(
        "/webhooks/payments",
        json!({"id": "evt_1", "type": "payment_intent.succeeded", "data": {"object": {"id": "pi_1"}}}),
    );

    let (status, body) = send(app(&env), req).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn unknown_lesson_is_not_found() {
    let env = TestEnv::new().await;
    let req = post_json(
        &format!("/lessons/{}/cancel", uuid::Uuid::new_v4()),
        json!({"cancelled_by": "learner"}),
    );

    let (status, _) = send(app(&env), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
