use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use super::dto::{CancelBody, LessonListQuery, ScheduleBody, SlotsQuery, TopUpBody};
use crate::booking::{LessonRequest, PackageBooking, PackageRequest, Slot};
use crate::error::AppError;
use crate::logger::annotate_span;
use crate::model::{Lesson, Payment};
use crate::payments::{
    PublicBooking, PublicBookingRequest, Reconciled, SIGNATURE_HEADER, TopUp, WebhookOutcome,
};
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

pub async fn list_slots(
    State(state): State<AppState>,
    Path(instructor_id): Path<Uuid>,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<Vec<Slot>>, AppError> {
    let slots = state
        .slots
        .resolve_slots(&instructor_id, q.from, q.to, q.duration)
        .await?;
    Ok(Json(slots))
}

pub async fn book_lesson(
    State(state): State<AppState>,
    Json(req): Json<LessonRequest>,
) -> Result<(StatusCode, Json<Lesson>), AppError> {
    annotate_span(Some(&req.learner_id), None);
    let lesson = state.bookings.book_lesson(req).await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

pub async fn book_package(
    State(state): State<AppState>,
    Json(req): Json<PackageRequest>,
) -> Result<(StatusCode, Json<PackageBooking>), AppError> {
    annotate_span(Some(&req.learner_id), None);
    let booking = state.bookings.book_package(req).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn create_public_booking(
    State(state): State<AppState>,
    Json(req): Json<PublicBookingRequest>,
) -> Result<(StatusCode, Json<PublicBooking>), AppError> {
    annotate_span(Some(&req.learner_id), None);
    let booking = state.checkout.create_public_booking(req).await?;
    annotate_span(None, Some(&booking.payment.id));
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn create_top_up(
    State(state): State<AppState>,
    Json(body): Json<TopUpBody>,
) -> Result<(StatusCode, Json<TopUp>), AppError> {
    annotate_span(Some(&body.learner_id), None);
    let top_up = state
        .checkout
        .create_top_up(&body.learner_id, body.amount)
        .await?;
    annotate_span(None, Some(&top_up.payment.id));
    Ok((StatusCode::CREATED, Json(top_up)))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Reconciled>, AppError> {
    let reconciled = state.reconciler.confirm_payment(&payment_id).await?;
    Ok(Json(reconciled))
}

/// Takes the raw body: the signature covers the exact bytes received.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let outcome = state.reconciler.handle_webhook(signature, &body).await?;
    Ok(Json(outcome))
}

pub async fn learner_lessons(
    State(state): State<AppState>,
    Path(learner_id): Path<Uuid>,
    Query(q): Query<LessonListQuery>,
) -> Result<Json<Vec<Lesson>>, AppError> {
    annotate_span(Some(&learner_id), None);
    let lessons = state.bookings.learner_lessons(&learner_id, q.status).await?;
    Ok(Json(lessons))
}

pub async fn learner_payments(
    State(state): State<AppState>,
    Path(learner_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, AppError> {
    annotate_span(Some(&learner_id), None);
    let payments = state.reconciler.learner_payments(&learner_id).await?;
    Ok(Json(payments))
}

pub async fn package_lessons(
    State(state): State<AppState>,
    Path(package_id): Path<Uuid>,
) -> Result<Json<Vec<Lesson>>, AppError> {
    Ok(Json(state.bookings.package_lessons(&package_id).await?))
}

pub async fn cancel_lesson(
    State(state): State<AppState>,
    Path(lesson_id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Lesson>, AppError> {
    let lesson = state
        .bookings
        .cancel_lesson(&lesson_id, body.cancelled_by, body.reason)
        .await?;
    Ok(Json(lesson))
}

pub async fn complete_lesson(
    State(state): State<AppState>,
    Path(lesson_id): Path<Uuid>,
) -> Result<Json<Lesson>, AppError> {
    Ok(Json(state.bookings.complete_lesson(&lesson_id).await?))
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    Path(lesson_id): Path<Uuid>,
) -> Result<Json<Lesson>, AppError> {
    Ok(Json(state.bookings.mark_no_show(&lesson_id).await?))
}

pub async fn schedule_lesson(
    State(state): State<AppState>,
    Path(lesson_id): Path<Uuid>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<Lesson>, AppError> {
    let lesson = state
        .bookings
        .schedule_package_lesson(&lesson_id, body.start)
        .await?;
    Ok(Json(lesson))
}
