//! Gateway-settled purchases: balance top-ups and pay-before-confirm bookings.
//!
//! Both open a pending payment plus a gateway intent and hand the client
//! secret back. Nothing is credited here; settlement belongs to the
//! reconciler.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::booking::conflict::ConflictGuard;
use crate::booking::pricing::lesson_price;
use crate::error::AppError;
use crate::model::{
    Cancellation, CancelledBy, Funding, Interval, Lesson, LessonPaymentStatus, LessonStatus,
    Payment, PaymentKind,
};
use crate::payments::gateway::{IntentRequest, PaymentGateway};
use crate::store::{InstructorDirectory, LearnerDirectory, LessonRepository, PaymentRepository, Stores};
use crate::time::{now_ms, to_ms};

#[derive(Debug, Clone, Deserialize)]
pub struct PublicBookingRequest {
    pub learner_id: Uuid,
    pub instructor_id: Uuid,
    pub start: NaiveDateTime,
    pub duration_minutes: u32,
    pub lesson_type: String,
    #[serde(default)]
    pub pickup: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicBooking {
    pub lesson: Lesson,
    pub payment: Payment,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopUp {
    pub payment: Payment,
    pub client_secret: String,
}

pub struct Checkout {
    learners: Arc<dyn LearnerDirectory>,
    instructors: Arc<dyn InstructorDirectory>,
    lessons: Arc<dyn LessonRepository>,
    payments: Arc<dyn PaymentRepository>,
    guard: ConflictGuard,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl Checkout {
    pub fn new(stores: &Stores, gateway: Arc<dyn PaymentGateway>, default_currency: &str) -> Self {
        Self {
            learners: stores.learners.clone(),
            instructors: stores.instructors.clone(),
            lessons: stores.lessons.clone(),
            payments: stores.payments.clone(),
            guard: ConflictGuard::new(stores.lessons.clone()),
            gateway,
            currency: default_currency.to_string(),
        }
    }

    #[instrument(skip(self), target = "checkout", fields(learner_id = %learner_id))]
    pub async fn create_top_up(&self, learner_id: &Uuid, amount: i64) -> Result<TopUp, AppError> {
        if amount <= 0 {
            return Err(AppError::BadRequest("top-up amount must be positive".into()));
        }
        self.learners
            .find_learner(learner_id)
            .await?
            .ok_or_else(|| AppError::not_found("learner", learner_id))?;

        let mut payment =
            Payment::pending(*learner_id, PaymentKind::TopUp, amount, &self.currency, now_ms());
        self.payments.insert_payment(&payment).await?;

        let client_secret = self
            .open_intent(&mut payment, "Lesson balance top-up".to_string(), None)
            .await?;

        info!(payment_id = %payment.id, amount, "top-up opened");
        Ok(TopUp {
            payment,
            client_secret,
        })
    }

    /// The lesson is created `pending-confirmation` and does not occupy the
    /// calendar until its payment succeeds.
    #[instrument(
        skip(self, req),
        target = "checkout",
        fields(learner_id = %req.learner_id, instructor_id = %req.instructor_id)
    )]
    pub async fn create_public_booking(
        &self,
        req: PublicBookingRequest,
    ) -> Result<PublicBooking, AppError> {
        if req.duration_minutes == 0 {
            return Err(AppError::BadRequest("duration must be positive".into()));
        }
        self.learners
            .find_learner(&req.learner_id)
            .await?
            .ok_or_else(|| AppError::not_found("learner", req.learner_id))?;
        let instructor = self
            .instructors
            .find_instructor(&req.instructor_id)
            .await?
            .ok_or_else(|| AppError::not_found("instructor", req.instructor_id))?;

        let price = lesson_price(&instructor, &req.lesson_type, req.duration_minutes);
        let start_ms = to_ms(req.start);
        let interval = Interval::new(start_ms, start_ms + req.duration_minutes as i64 * 60_000);
        self.guard
            .ensure_free(instructor.id, req.learner_id, interval)
            .await?;

        let now = now_ms();
        let lesson = Lesson {
            id: Uuid::new_v4(),
            instructor_id: instructor.id,
            learner_id: req.learner_id,
            start_ms: interval.start_ms,
            end_ms: interval.end_ms,
            duration_minutes: req.duration_minutes,
            lesson_type: req.lesson_type,
            status: LessonStatus::PendingConfirmation,
            payment_status: LessonPaymentStatus::Pending,
            price,
            funding: Funding::LearnerBalance,
            package: None,
            pickup: req.pickup,
            notes: req.notes,
            cancellation: None,
            created_ms: now,
            updated_ms: now,
        };
        self.lessons.insert_lesson(&lesson).await?;

        let currency = if instructor.currency.is_empty() {
            self.currency.as_str()
        } else {
            instructor.currency.as_str()
        };
        let mut payment =
            Payment::pending(req.learner_id, PaymentKind::PublicBooking, price, currency, now);
        payment.instructor_id = Some(instructor.id);
        payment.lesson_ids = vec![lesson.id];
        self.payments.insert_payment(&payment).await?;

        let description = format!("Driving lesson with {}", instructor.name);
        let client_secret = self
            .open_intent(&mut payment, description, Some(lesson.id))
            .await?;

        info!(payment_id = %payment.id, lesson_id = %lesson.id, price, "public booking opened");
        Ok(PublicBooking {
            lesson,
            payment,
            client_secret,
        })
    }

    /// Opens the gateway intent for a stored pending payment. A gateway
    /// failure fails the payment and releases the awaiting lesson, if any.
    async fn open_intent(
        &self,
        payment: &mut Payment,
        description: String,
        awaiting: Option<Uuid>,
    ) -> Result<String, AppError> {
        let req = IntentRequest {
            payment_id: payment.id,
            learner_id: payment.learner_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            description,
        };

        let opened = match self.gateway.create_intent(&req).await {
            Ok(opened) => opened,
            Err(e) => {
                let now = now_ms();
                if let Err(err) = self.payments.mark_failed(&payment.id, now).await {
                    warn!(error = %err, payment_id = %payment.id, "could not fail payment");
                }
                if let Some(lesson_id) = awaiting {
                    let cancellation = Cancellation {
                        cancelled_by: CancelledBy::System,
                        reason: Some("payment could not be started".into()),
                        cancelled_ms: now,
                    };
                    if let Err(err) = self
                        .lessons
                        .transition(
                            &lesson_id,
                            LessonStatus::PendingConfirmation,
                            LessonStatus::Cancelled,
                            Some(&cancellation),
                            now,
                        )
                        .await
                    {
                        warn!(error = %err, lesson_id = %lesson_id, "could not release lesson");
                    }
                }
                return Err(AppError::ExternalGateway(e.to_string()));
            }
        };

        if !self
            .payments
            .attach_gateway_ref(&payment.id, &opened.intent_id)
            .await?
        {
            return Err(AppError::InvalidState(format!(
                "payment {} already has a gateway intent",
                payment.id
            )));
        }
        payment.gateway_ref = Some(opened.intent_id);
        Ok(opened.client_secret)
    }
}
