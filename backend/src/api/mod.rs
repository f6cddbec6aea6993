mod dto;
mod handlers;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use axum::routing::{get, post};
use common::logger::{TraceId, request_span};
use tracing::Instrument;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/instructors/{id}/slots", get(handlers::list_slots))
        .route("/bookings/lessons", post(handlers::book_lesson))
        .route("/bookings/packages", post(handlers::book_package))
        .route("/bookings/public", post(handlers::create_public_booking))
        .route("/payments/top-ups", post(handlers::create_top_up))
        .route("/payments/{id}/confirm", post(handlers::confirm_payment))
        .route("/webhooks/payments", post(handlers::payment_webhook))
        .route("/learners/{id}/lessons", get(handlers::learner_lessons))
        .route("/learners/{id}/payments", get(handlers::learner_payments))
        .route("/packages/{id}/lessons", get(handlers::package_lessons))
        .route("/lessons/{id}/cancel", post(handlers::cancel_lesson))
        .route("/lessons/{id}/complete", post(handlers::complete_lesson))
        .route("/lessons/{id}/no-show", post(handlers::mark_no_show))
        .route("/lessons/{id}/schedule", post(handlers::schedule_lesson))
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

/// Runs every request under a root span with a fresh trace id.
async fn trace_request(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let span = request_span(&route, &TraceId::new());

    next.run(req).instrument(span).await
}
