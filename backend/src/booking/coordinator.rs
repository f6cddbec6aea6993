//! Booking orchestration.
//!
//! Responsibilities:
//! - Price a lesson or package and debit exactly one ledger for it.
//! - Check both calendars before claiming a concrete interval.
//! - Create the commitment records and move them through their lifecycle.
//!
//! Non-responsibilities:
//! - Gateway-settled payments (see `payments::reconciler`).
//! - Slot discovery (see `booking::slots`).
//!
//! Every state change is a conditional write; the ledger is only touched
//! by the caller that won it. Side effects after the financial write
//! (statistics, audit payment, notification) are logged and swallowed.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use common::logger::child_span;
use tracing::{Instrument, field, info, instrument, warn};
use uuid::Uuid;

use crate::booking::conflict::ConflictGuard;
use crate::booking::ledger::{BalanceLedger, DebitOutcome};
use crate::booking::pricing::lesson_price;
use crate::error::AppError;
use crate::model::{
    Account, Cancellation, CancelledBy, Funding, Interval, Learner, Lesson, LessonPaymentStatus,
    LessonStatus, PackageSlot, Payment, PaymentKind, PaymentStatus,
};
use crate::money::even_share;
use crate::notify::{BookingConfirmation, NotificationGateway, dispatch_confirmation};
use crate::store::{
    InstructorDirectory, LearnerDirectory, LessonRepository, PackageCatalog, PaymentRepository,
    RelationshipRepository, Stores,
};
use crate::time::{now_ms, to_ms};

#[derive(Debug, Clone, Deserialize)]
pub struct LessonRequest {
    pub learner_id: Uuid,
    /// Defaults to the learner's primary instructor.
    #[serde(default)]
    pub instructor_id: Option<Uuid>,
    pub start: NaiveDateTime,
    pub duration_minutes: u32,
    pub lesson_type: String,
    #[serde(default)]
    pub funding: Funding,
    #[serde(default)]
    pub pickup: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageRequest {
    pub learner_id: Uuid,
    pub package_id: Uuid,
    #[serde(default)]
    pub funding: Funding,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageBooking {
    pub package_id: Uuid,
    pub price: i64,
    pub lessons: Vec<Lesson>,
}

pub struct BookingCoordinator {
    learners: Arc<dyn LearnerDirectory>,
    instructors: Arc<dyn InstructorDirectory>,
    packages: Arc<dyn PackageCatalog>,
    lessons: Arc<dyn LessonRepository>,
    relationships: Arc<dyn RelationshipRepository>,
    payments: Arc<dyn PaymentRepository>,
    guard: ConflictGuard,
    ledger: BalanceLedger,
    notifier: Arc<dyn NotificationGateway>,
    currency: String,
}

impl BookingCoordinator {
    pub fn new(
        stores: &Stores,
        notifier: Arc<dyn NotificationGateway>,
        default_currency: &str,
    ) -> Self {
        Self {
            learners: stores.learners.clone(),
            instructors: stores.instructors.clone(),
            packages: stores.packages.clone(),
            lessons: stores.lessons.clone(),
            relationships: stores.relationships.clone(),
            payments: stores.payments.clone(),
            guard: ConflictGuard::new(stores.lessons.clone()),
            ledger: BalanceLedger::new(stores.ledger.clone()),
            notifier,
            currency: default_currency.to_string(),
        }
    }

    /// Books one lesson against a prepaid balance.
    ///
    /// Order: price, balance precheck, conflicts, guarded debit, insert.
    /// The debit re-checks the balance at write time, so a concurrent
    /// booking that drained it in between still yields `InsufficientBalance`.
    #[instrument(
        skip(self, req),
        target = "booking",
        fields(learner_id = %req.learner_id, instructor_id = field::Empty, lesson_id = field::Empty)
    )]
    pub async fn book_lesson(&self, req: LessonRequest) -> Result<Lesson, AppError> {
        if req.duration_minutes == 0 {
            return Err(AppError::BadRequest("duration must be positive".into()));
        }

        let learner = self.learner(&req.learner_id).await?;
        let instructor_id = req
            .instructor_id
            .or(learner.primary_instructor_id)
            .ok_or_else(|| {
                AppError::BadRequest("no instructor given and learner has no primary instructor".into())
            })?;
        tracing::Span::current().record("instructor_id", field::display(&instructor_id));

        let instructor = self
            .instructors
            .find_instructor(&instructor_id)
            .await?
            .ok_or_else(|| AppError::not_found("instructor", instructor_id))?;

        let price = lesson_price(&instructor, &req.lesson_type, req.duration_minutes);
        let account = funding_account(req.funding, learner.id, instructor_id);

        let available = self.ledger.balance(&account).await?;
        if available < price {
            return Err(AppError::InsufficientBalance {
                required: price,
                available,
            });
        }

        let start_ms = to_ms(req.start);
        let interval = Interval::new(start_ms, start_ms + minutes_ms(req.duration_minutes));
        self.guard
            .ensure_free(instructor_id, learner.id, interval)
            .await?;

        self.debit(&account, price).await?;

        let now = now_ms();
        let lesson = Lesson {
            id: Uuid::new_v4(),
            instructor_id,
            learner_id: learner.id,
            start_ms: interval.start_ms,
            end_ms: interval.end_ms,
            duration_minutes: req.duration_minutes,
            lesson_type: req.lesson_type,
            status: LessonStatus::Scheduled,
            payment_status: LessonPaymentStatus::Paid,
            price,
            funding: req.funding,
            package: None,
            pickup: req.pickup,
            notes: req.notes,
            cancellation: None,
            created_ms: now,
            updated_ms: now,
        };
        tracing::Span::current().record("lesson_id", field::display(&lesson.id));

        if let Err(e) = self.lessons.insert_lesson(&lesson).await {
            self.refund_debit(&account, price).await;
            return Err(e.into());
        }

        self.after_booking(&learner, instructor_id, std::slice::from_ref(&lesson), None, price)
            .instrument(child_span("after_booking"))
            .await;

        info!(price, funding = req.funding.as_str(), "lesson booked");
        Ok(lesson)
    }

    /// Buys a package: one debit for the package price, then N unscheduled
    /// placeholders. Each placeholder carries an even share of the price,
    /// rounded on its own; the remainder is not reconciled.
    #[instrument(
        skip(self, req),
        target = "booking",
        fields(learner_id = %req.learner_id, package_id = %req.package_id)
    )]
    pub async fn book_package(&self, req: PackageRequest) -> Result<PackageBooking, AppError> {
        let learner = self.learner(&req.learner_id).await?;
        let package = self
            .packages
            .find_package(&req.package_id)
            .await?
            .ok_or_else(|| AppError::not_found("package", req.package_id))?;
        if !package.active {
            return Err(AppError::InvalidState(format!(
                "package {} is not on sale",
                package.id
            )));
        }

        let account = funding_account(req.funding, learner.id, package.instructor_id);
        let available = self.ledger.balance(&account).await?;
        if available < package.price {
            return Err(AppError::InsufficientBalance {
                required: package.price,
                available,
            });
        }

        self.debit(&account, package.price).await?;

        let now = now_ms();
        let share = even_share(package.price, package.lesson_count);
        let lessons: Vec<Lesson> = (1..=package.lesson_count)
            .map(|ordinal| Lesson {
                id: Uuid::new_v4(),
                instructor_id: package.instructor_id,
                learner_id: learner.id,
                start_ms: 0,
                end_ms: 0,
                duration_minutes: package.lesson_duration_minutes,
                lesson_type: package.lesson_type.clone(),
                status: LessonStatus::PendingConfirmation,
                payment_status: LessonPaymentStatus::Paid,
                price: share,
                funding: req.funding,
                package: Some(PackageSlot {
                    package_id: package.id,
                    ordinal,
                    total: package.lesson_count,
                }),
                pickup: None,
                notes: None,
                cancellation: None,
                created_ms: now,
                updated_ms: now,
            })
            .collect();

        if let Err(e) = self.lessons.insert_lessons(&lessons).await {
            self.refund_debit(&account, package.price).await;
            return Err(e.into());
        }

        self.after_booking(
            &learner,
            package.instructor_id,
            &lessons,
            Some(package.id),
            package.price,
        )
        .instrument(child_span("after_booking"))
        .await;

        info!(
            price = package.price,
            lessons = lessons.len(),
            share,
            "package booked"
        );
        Ok(PackageBooking {
            package_id: package.id,
            price: package.price,
            lessons,
        })
    }

    /// Places a package placeholder at a concrete time.
    #[instrument(skip(self), target = "booking", fields(lesson_id = %lesson_id))]
    pub async fn schedule_package_lesson(
        &self,
        lesson_id: &Uuid,
        start: NaiveDateTime,
    ) -> Result<Lesson, AppError> {
        let mut lesson = self.lesson(lesson_id).await?;
        if !lesson.is_placeholder() {
            return Err(AppError::InvalidState(format!(
                "lesson {lesson_id} is not an unscheduled package lesson"
            )));
        }

        let start_ms = to_ms(start);
        let interval = Interval::new(start_ms, start_ms + minutes_ms(lesson.duration_minutes));
        self.guard
            .ensure_free(lesson.instructor_id, lesson.learner_id, interval)
            .await?;

        let now = now_ms();
        if !self
            .lessons
            .schedule_placeholder(lesson_id, interval, now)
            .await?
        {
            return Err(AppError::InvalidState(format!(
                "lesson {lesson_id} was scheduled concurrently"
            )));
        }

        lesson.start_ms = interval.start_ms;
        lesson.end_ms = interval.end_ms;
        lesson.status = LessonStatus::Scheduled;
        lesson.updated_ms = now;
        Ok(lesson)
    }

    /// `scheduled -> cancelled`. A paid lesson returns its price to the
    /// ledger that funded it; if that credit fails the cancellation is
    /// rolled back so the refund cannot be lost.
    #[instrument(skip(self, reason), target = "booking", fields(lesson_id = %lesson_id))]
    pub async fn cancel_lesson(
        &self,
        lesson_id: &Uuid,
        by: CancelledBy,
        reason: Option<String>,
    ) -> Result<Lesson, AppError> {
        let mut lesson = self.lesson(lesson_id).await?;
        let now = now_ms();
        let cancellation = Cancellation {
            cancelled_by: by,
            reason,
            cancelled_ms: now,
        };

        self.transition(&lesson, LessonStatus::Cancelled, Some(&cancellation), now)
            .await?;
        lesson.status = LessonStatus::Cancelled;
        lesson.cancellation = Some(cancellation);
        lesson.updated_ms = now;

        if lesson.payment_status != LessonPaymentStatus::Paid || lesson.price == 0 {
            return Ok(lesson);
        }

        let account = funding_account(lesson.funding, lesson.learner_id, lesson.instructor_id);
        if let Err(e) = self.ledger.credit(&account, lesson.price).await {
            self.revert(&lesson, LessonStatus::Cancelled).await;
            return Err(AppError::InternalInconsistency(format!(
                "refund for cancelled lesson {lesson_id} failed: {e}"
            )));
        }

        self.mark_lessons(&[lesson.id], LessonPaymentStatus::Refunded)
            .await;
        lesson.payment_status = LessonPaymentStatus::Refunded;

        info!(refunded = lesson.price, "lesson cancelled");
        Ok(lesson)
    }

    /// `scheduled -> completed`. An unpaid lesson is charged now and the
    /// balance may go negative.
    #[instrument(skip(self), target = "booking", fields(lesson_id = %lesson_id))]
    pub async fn complete_lesson(&self, lesson_id: &Uuid) -> Result<Lesson, AppError> {
        let mut lesson = self.lesson(lesson_id).await?;
        let now = now_ms();

        self.transition(&lesson, LessonStatus::Completed, None, now)
            .await?;
        lesson.status = LessonStatus::Completed;
        lesson.updated_ms = now;

        if lesson.payment_status == LessonPaymentStatus::Pending {
            let account = funding_account(lesson.funding, lesson.learner_id, lesson.instructor_id);
            if let Err(e) = self.ledger.charge(&account, lesson.price).await {
                self.revert(&lesson, LessonStatus::Completed).await;
                return Err(AppError::InternalInconsistency(format!(
                    "charge for completed lesson {lesson_id} failed: {e}"
                )));
            }
            self.mark_lessons(&[lesson.id], LessonPaymentStatus::Paid)
                .await;
            lesson.payment_status = LessonPaymentStatus::Paid;
        }

        info!("lesson completed");
        Ok(lesson)
    }

    #[instrument(skip(self), target = "booking", fields(lesson_id = %lesson_id))]
    pub async fn mark_no_show(&self, lesson_id: &Uuid) -> Result<Lesson, AppError> {
        let mut lesson = self.lesson(lesson_id).await?;
        let now = now_ms();

        self.transition(&lesson, LessonStatus::NoShow, None, now)
            .await?;
        lesson.status = LessonStatus::NoShow;
        lesson.updated_ms = now;
        Ok(lesson)
    }

    pub async fn learner_lessons(
        &self,
        learner_id: &Uuid,
        status: Option<LessonStatus>,
    ) -> Result<Vec<Lesson>, AppError> {
        self.learner(learner_id).await?;
        Ok(self.lessons.lessons_for_learner(learner_id, status).await?)
    }

    pub async fn package_lessons(&self, package_id: &Uuid) -> Result<Vec<Lesson>, AppError> {
        self.packages
            .find_package(package_id)
            .await?
            .ok_or_else(|| AppError::not_found("package", package_id))?;
        Ok(self.lessons.lessons_for_package(package_id).await?)
    }

    /* =========================
    Internals
    ========================= */

    async fn learner(&self, id: &Uuid) -> Result<Learner, AppError> {
        self.learners
            .find_learner(id)
            .await?
            .ok_or_else(|| AppError::not_found("learner", id))
    }

    async fn lesson(&self, id: &Uuid) -> Result<Lesson, AppError> {
        self.lessons
            .find_lesson(id)
            .await?
            .ok_or_else(|| AppError::not_found("lesson", id))
    }

    async fn debit(&self, account: &Account, amount: i64) -> Result<i64, AppError> {
        match self.ledger.debit(account, amount).await? {
            DebitOutcome::Applied { balance } => Ok(balance),
            DebitOutcome::Insufficient { available } => Err(AppError::InsufficientBalance {
                required: amount,
                available,
            }),
        }
    }

    /// Returns a debit whose booking could not be written.
    async fn refund_debit(&self, account: &Account, amount: i64) {
        if let Err(e) = self.ledger.credit(account, amount).await {
            tracing::error!(
                error = %e,
                amount,
                learner_id = %account.learner_id(),
                "could not return debit after failed booking insert"
            );
        }
    }

    async fn transition(
        &self,
        lesson: &Lesson,
        to: LessonStatus,
        cancellation: Option<&Cancellation>,
        now: i64,
    ) -> Result<(), AppError> {
        if !lesson.status.can_transition_to(to) || lesson.status != LessonStatus::Scheduled {
            return Err(AppError::InvalidState(format!(
                "lesson {} is {}, cannot become {to}",
                lesson.id, lesson.status
            )));
        }
        let moved = self
            .lessons
            .transition(&lesson.id, lesson.status, to, cancellation, now)
            .await?;
        if !moved {
            return Err(AppError::InvalidState(format!(
                "lesson {} changed concurrently",
                lesson.id
            )));
        }
        Ok(())
    }

    /// Puts a lesson back to `scheduled` after its ledger write failed.
    async fn revert(&self, lesson: &Lesson, from: LessonStatus) {
        match self
            .lessons
            .transition(&lesson.id, from, LessonStatus::Scheduled, None, now_ms())
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(lesson_id = %lesson.id, "lesson moved before revert"),
            Err(e) => tracing::error!(error = %e, lesson_id = %lesson.id, "lesson revert failed"),
        }
    }

    async fn mark_lessons(&self, ids: &[Uuid], status: LessonPaymentStatus) {
        if let Err(e) = self.lessons.set_payment_status(ids, status, now_ms()).await {
            warn!(error = %e, status = status.as_str(), "lesson payment status not updated");
        }
    }

    /// Statistics, primary instructor, audit payment, confirmation.
    async fn after_booking(
        &self,
        learner: &Learner,
        instructor_id: Uuid,
        lessons: &[Lesson],
        package_id: Option<Uuid>,
        price: i64,
    ) {
        let now = now_ms();

        if let Err(e) = self
            .relationships
            .record_booking(&learner.id, &instructor_id, lessons.len() as u32, now)
            .await
        {
            warn!(error = %e, "relationship statistics not recorded");
        }

        if learner.primary_instructor_id.is_none() {
            if let Err(e) = self
                .learners
                .assign_primary_instructor(&learner.id, &instructor_id)
                .await
            {
                warn!(error = %e, "primary instructor not assigned");
            }
        }

        let kind = if package_id.is_some() {
            PaymentKind::PackageBooking
        } else {
            PaymentKind::LessonBooking
        };
        let mut audit = Payment::pending(learner.id, kind, price, &self.currency, now);
        audit.instructor_id = Some(instructor_id);
        audit.package_id = package_id;
        audit.lesson_ids = lessons.iter().map(|l| l.id).collect();
        audit.status = PaymentStatus::Succeeded;
        audit.paid_ms = Some(now);
        if let Err(e) = self.payments.insert_payment(&audit).await {
            warn!(error = %e, "audit payment record not written");
        }

        if let Some(confirmation) = BookingConfirmation::for_lessons(lessons, price) {
            dispatch_confirmation(self.notifier.clone(), learner.email.clone(), confirmation);
        }
    }
}

/// The single ledger a booking with `funding` debits.
pub fn funding_account(funding: Funding, learner_id: Uuid, instructor_id: Uuid) -> Account {
    match funding {
        Funding::LearnerBalance => Account::Learner(learner_id),
        Funding::RelationshipBalance => Account::Relationship {
            learner_id,
            instructor_id,
        },
    }
}

fn minutes_ms(minutes: u32) -> i64 {
    minutes as i64 * 60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_selects_exactly_one_account() {
        let (l, i) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(funding_account(Funding::LearnerBalance, l, i), Account::Learner(l));
        assert_eq!(
            funding_account(Funding::RelationshipBalance, l, i),
            Account::Relationship {
                learner_id: l,
                instructor_id: i
            }
        );
    }

    #[test]
    fn lesson_request_defaults() {
        let req: LessonRequest = serde_json::from_value(serde_json::json!({
            "learner_id": Uuid::nil(),
            "start": "2030-01-07T09:00:00",
            "duration_minutes": 60,
            "lesson_type": "standard"
        }))
        .unwrap();

        assert_eq!(req.instructor_id, None);
        assert_eq!(req.funding, Funding::LearnerBalance);
        assert_eq!(minutes_ms(req.duration_minutes), 3_600_000);
    }
}
