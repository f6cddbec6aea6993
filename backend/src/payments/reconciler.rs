//! Payment reconciliation.
//!
//! Responsibilities:
//! - Drive payment status from gateway events (webhook push) and explicit
//!   confirmation (pull). Both paths converge on the same transitions.
//! - Apply each ledger effect exactly once: only the caller that wins the
//!   conditional status update touches the balance.
//! - Undo the claim when the ledger write fails so a retry can succeed.
//!
//! Guarantees:
//! - Duplicate, concurrent or out-of-order deliveries never double-credit.
//! - A claimed payment is never left without its ledger effect.
//! - A refund reverses exactly what its success applied.
//! - A pay-before-confirm lesson is only scheduled if its slot is still free
//!   when the payment settles.
//! - Lesson propagation and receipts are best-effort and never fail a
//!   settled payment.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::booking::conflict::ConflictGuard;
use crate::booking::ledger::BalanceLedger;
use crate::error::AppError;
use crate::logger::annotate_span;
use crate::model::{
    Account, Cancellation, CancelledBy, Lesson, LessonPaymentStatus, LessonStatus, Payment,
    PaymentKind, PaymentStatus,
};
use crate::notify::{NotificationGateway, Receipt, dispatch_receipt};
use crate::payments::gateway::{IntentStatus, PaymentGateway};
use crate::payments::webhook::{EventKind, GatewayEvent, WebhookVerifier};
use crate::store::{
    LearnerDirectory, LessonRepository, PaymentRepository, RelationshipRepository, Stores,
};
use crate::time::now_ms;

/// Payment after reconciliation. `applied` is true only for the call that
/// performed the transition (and its ledger effect).
#[derive(Debug, Clone, Serialize)]
pub struct Reconciled {
    pub payment: Payment,
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed { payment_id: Uuid, applied: bool },
    /// Unknown event type or an intent this service never opened.
    Ignored { reason: String },
}

pub struct PaymentReconciler {
    payments: Arc<dyn PaymentRepository>,
    lessons: Arc<dyn LessonRepository>,
    learners: Arc<dyn LearnerDirectory>,
    relationships: Arc<dyn RelationshipRepository>,
    ledger: BalanceLedger,
    guard: ConflictGuard,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationGateway>,
    verifier: WebhookVerifier,
}

impl PaymentReconciler {
    pub fn new(
        stores: &Stores,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationGateway>,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            payments: stores.payments.clone(),
            lessons: stores.lessons.clone(),
            learners: stores.learners.clone(),
            relationships: stores.relationships.clone(),
            ledger: BalanceLedger::new(stores.ledger.clone()),
            guard: ConflictGuard::new(stores.lessons.clone()),
            gateway,
            notifier,
            verifier,
        }
    }

    /// Push path. The signature is checked before anything is parsed or
    /// mutated.
    #[instrument(skip(self, signature, body), target = "reconciler")]
    pub async fn handle_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, AppError> {
        let header = signature
            .ok_or_else(|| AppError::ExternalGateway("webhook rejected: signature missing".into()))?;
        self.verifier
            .verify(header, body, now_ms() / 1_000)?;

        let event = GatewayEvent::parse(body)?;
        self.handle_event(&event).await
    }

    #[instrument(
        skip(self, event),
        target = "reconciler",
        fields(event_id = %event.id, event_type = %event.event_type)
    )]
    pub async fn handle_event(&self, event: &GatewayEvent) -> Result<WebhookOutcome, AppError> {
        let Some(kind) = event.kind() else {
            debug!("event type not handled");
            return Ok(WebhookOutcome::Ignored {
                reason: format!("unhandled event type {}", event.event_type),
            });
        };

        let Some(payment) = self.payments.find_by_gateway_ref(event.intent_ref()).await? else {
            warn!(intent = event.intent_ref(), "event for unknown intent");
            return Ok(WebhookOutcome::Ignored {
                reason: format!("unknown intent {}", event.intent_ref()),
            });
        };

        let reconciled = match kind {
            EventKind::Succeeded => self.mark_succeeded(&payment.id).await?,
            EventKind::Failed => self.mark_failed(&payment.id).await?,
            EventKind::Canceled => self.mark_cancelled(&payment.id).await?,
            EventKind::Refunded => self.mark_refunded(&payment.id).await?,
        };

        Ok(WebhookOutcome::Processed {
            payment_id: reconciled.payment.id,
            applied: reconciled.applied,
        })
    }

    /// Pull path. Safe to call any number of times: a settled payment is
    /// returned untouched, a pending one is checked against the gateway.
    #[instrument(skip(self), target = "reconciler", fields(payment_id = %payment_id))]
    pub async fn confirm_payment(&self, payment_id: &Uuid) -> Result<Reconciled, AppError> {
        let payment = self.payment(payment_id).await?;
        annotate_span(Some(&payment.learner_id), Some(payment_id));

        if payment.status != PaymentStatus::Pending {
            return Ok(Reconciled {
                payment,
                applied: false,
            });
        }

        let Some(intent_id) = payment.gateway_ref.as_deref() else {
            return Err(AppError::InvalidState(format!(
                "payment {payment_id} has no gateway intent"
            )));
        };

        let status = self
            .gateway
            .retrieve_intent(intent_id)
            .await
            .map_err(|e| AppError::ExternalGateway(e.to_string()))?;

        match status {
            IntentStatus::Succeeded => self.mark_succeeded(payment_id).await,
            IntentStatus::Canceled => self.mark_cancelled(payment_id).await,
            IntentStatus::Pending => Ok(Reconciled {
                payment,
                applied: false,
            }),
        }
    }

    /// `pending -> succeeded`, then the ledger effect.
    ///
    /// The learner is credited with the amount minus whatever the payment
    /// settles for linked lessons still awaiting payment, so a
    /// pay-before-confirm booking nets to zero while a top-up credits in
    /// full. The net is stored on the payment for a later refund. If
    /// settling fails the claim is reverted and the error propagates.
    #[instrument(skip(self), target = "reconciler", fields(payment_id = %payment_id))]
    pub async fn mark_succeeded(&self, payment_id: &Uuid) -> Result<Reconciled, AppError> {
        let now = now_ms();
        if !self.payments.claim_success(payment_id, now).await? {
            let payment = self.payment(payment_id).await?;
            debug!(status = %payment.status, "success already reconciled or not pending");
            return Ok(Reconciled {
                payment,
                applied: false,
            });
        }

        let mut payment = self.payment(payment_id).await?;
        annotate_span(Some(&payment.learner_id), Some(payment_id));

        let settlement = match self.settle(&payment, now).await {
            Ok(settlement) => settlement,
            Err(e) => {
                match self.payments.revert_claim(payment_id, now_ms()).await {
                    Ok(true) => {}
                    Ok(false) => warn!("payment moved before its claim could be reverted"),
                    Err(re) => tracing::error!(error = %re, "claim revert failed"),
                }
                return Err(AppError::InternalInconsistency(format!(
                    "settling payment {payment_id} failed: {e}"
                )));
            }
        };

        self.propagate_success(&payment, &settlement.lesson_ids, now)
            .await;

        payment.status = PaymentStatus::Succeeded;
        payment.paid_ms = Some(now);
        payment.credited = settlement.credited;
        self.send_receipt(&payment).await;

        info!(amount = payment.amount, credited = payment.credited, "payment succeeded");
        Ok(Reconciled {
            payment,
            applied: true,
        })
    }

    /// `pending -> failed`. Nothing was credited, so there is no ledger effect.
    #[instrument(skip(self), target = "reconciler", fields(payment_id = %payment_id))]
    pub async fn mark_failed(&self, payment_id: &Uuid) -> Result<Reconciled, AppError> {
        let applied = self.payments.mark_failed(payment_id, now_ms()).await?;
        self.after_abandon(payment_id, applied, "payment failed")
            .await
    }

    /// `pending -> cancelled`.
    #[instrument(skip(self), target = "reconciler", fields(payment_id = %payment_id))]
    pub async fn mark_cancelled(&self, payment_id: &Uuid) -> Result<Reconciled, AppError> {
        let applied = self.payments.mark_cancelled(payment_id, now_ms()).await?;
        self.after_abandon(payment_id, applied, "payment cancelled")
            .await
    }

    /// `succeeded -> refunded`, then the success is undone. What it credited
    /// is charged back and the balance may go negative. Paid lessons still
    /// ahead are cancelled; lessons that already took place, or whose price
    /// went back to the balance on cancellation, are charged at their price.
    /// A failed ledger write reverts the refund.
    #[instrument(skip(self), target = "reconciler", fields(payment_id = %payment_id))]
    pub async fn mark_refunded(&self, payment_id: &Uuid) -> Result<Reconciled, AppError> {
        let now = now_ms();
        if !self.payments.claim_refund(payment_id, now).await? {
            let payment = self.payment(payment_id).await?;
            debug!(status = %payment.status, "refund already reconciled or not refundable");
            return Ok(Reconciled {
                payment,
                applied: false,
            });
        }

        let mut payment = self.payment(payment_id).await?;
        annotate_span(Some(&payment.learner_id), Some(payment_id));

        let reversal = match self.reverse(&payment).await {
            Ok(reversal) => reversal,
            Err(e) => {
                match self.payments.revert_refund(payment_id, now_ms()).await {
                    Ok(true) => {}
                    Ok(false) => warn!("payment moved before its refund could be reverted"),
                    Err(re) => tracing::error!(error = %re, "refund revert failed"),
                }
                return Err(AppError::InternalInconsistency(format!(
                    "ledger debit for refunded payment {payment_id} failed: {e}"
                )));
            }
        };

        if let Err(e) = self
            .lessons
            .set_payment_status(&reversal.paid, LessonPaymentStatus::Refunded, now)
            .await
        {
            warn!(error = %e, "lessons not marked refunded");
        }
        for id in &reversal.upcoming {
            self.release(id, LessonStatus::Scheduled, "payment refunded", now)
                .await;
        }

        payment.status = PaymentStatus::Refunded;
        payment.refunded_ms = Some(now);
        info!(
            amount = payment.amount,
            charged_back = reversal.charged,
            cancelled = reversal.upcoming.len(),
            "payment refunded"
        );
        Ok(Reconciled {
            payment,
            applied: true,
        })
    }

    pub async fn learner_payments(&self, learner_id: &Uuid) -> Result<Vec<Payment>, AppError> {
        self.learners
            .find_learner(learner_id)
            .await?
            .ok_or_else(|| AppError::not_found("learner", learner_id))?;
        Ok(self.payments.payments_for_learner(learner_id).await?)
    }

    /* =========================
    Internals
    ========================= */

    async fn payment(&self, id: &Uuid) -> Result<Payment, AppError> {
        self.payments
            .find_payment(id)
            .await?
            .ok_or_else(|| AppError::not_found("payment", id))
    }

    /// Applies the ledger effect of a claimed success and records it.
    ///
    /// An awaiting lesson whose slot was taken while the payment was open is
    /// released rather than promoted; its price stays with the learner as
    /// credit. Any read or write failure is returned so the claim can be
    /// reverted.
    async fn settle(&self, payment: &Payment, now: i64) -> Result<Settlement, AppError> {
        let mut settles = 0;
        let mut lesson_ids = Vec::with_capacity(payment.lesson_ids.len());

        for id in &payment.lesson_ids {
            let lesson = self.lesson(id).await?;
            if lesson.payment_status != LessonPaymentStatus::Pending
                || lesson.status == LessonStatus::Cancelled
            {
                continue;
            }

            let awaiting = payment.kind == PaymentKind::PublicBooking
                && lesson.status == LessonStatus::PendingConfirmation
                && lesson.package.is_none();
            if awaiting && !self.slot_still_free(&lesson).await? {
                warn!(lesson_id = %id, "slot taken while payment was open; lesson released");
                self.lessons
                    .transition(
                        id,
                        LessonStatus::PendingConfirmation,
                        LessonStatus::Cancelled,
                        Some(&system_cancellation("slot taken before payment settled", now)),
                        now,
                    )
                    .await?;
                continue;
            }

            settles += lesson.price;
            lesson_ids.push(lesson.id);
        }

        let credited = payment.amount - settles;
        if !self.payments.record_credit(&payment.id, credited, now).await? {
            return Err(AppError::InvalidState(format!(
                "payment {} moved while settling",
                payment.id
            )));
        }
        self.apply(&Account::Learner(payment.learner_id), credited)
            .await?;

        Ok(Settlement {
            credited,
            lesson_ids,
        })
    }

    /// Undoes the ledger effect of a success that is being refunded.
    async fn reverse(&self, payment: &Payment) -> Result<Reversal, AppError> {
        let mut owed = 0;
        let mut paid = Vec::new();
        let mut upcoming = Vec::new();

        for id in &payment.lesson_ids {
            let lesson = self.lesson(id).await?;
            match (lesson.status, lesson.payment_status) {
                (LessonStatus::Scheduled, LessonPaymentStatus::Paid) => {
                    paid.push(lesson.id);
                    upcoming.push(lesson.id);
                }
                (LessonStatus::Completed | LessonStatus::NoShow, LessonPaymentStatus::Paid) => {
                    paid.push(lesson.id);
                    owed += lesson.price;
                }
                // Cancelled earlier with its price returned to the balance.
                (LessonStatus::Cancelled, LessonPaymentStatus::Refunded) => owed += lesson.price,
                _ => {}
            }
        }

        let charged = payment.credited + owed;
        self.apply(&Account::Learner(payment.learner_id), -charged)
            .await?;

        Ok(Reversal {
            charged,
            paid,
            upcoming,
        })
    }

    /// Credits a positive delta, charges a negative one.
    async fn apply(&self, account: &Account, delta: i64) -> Result<i64, AppError> {
        if delta >= 0 {
            self.ledger.credit(account, delta).await
        } else {
            self.ledger.charge(account, -delta).await
        }
    }

    async fn lesson(&self, id: &Uuid) -> Result<Lesson, AppError> {
        self.lessons
            .find_lesson(id)
            .await?
            .ok_or_else(|| AppError::not_found("lesson", id))
    }

    async fn slot_still_free(&self, lesson: &Lesson) -> Result<bool, AppError> {
        match self
            .guard
            .ensure_free(lesson.instructor_id, lesson.learner_id, lesson.interval())
            .await
        {
            Ok(()) => Ok(true),
            Err(AppError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Best-effort system cancellation of a lesson still in `from`.
    async fn release(&self, id: &Uuid, from: LessonStatus, why: &str, now: i64) {
        match self
            .lessons
            .transition(
                id,
                from,
                LessonStatus::Cancelled,
                Some(&system_cancellation(why, now)),
                now,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(lesson_id = %id, "lesson already moved; not released"),
            Err(e) => warn!(error = %e, lesson_id = %id, "lesson not released"),
        }
    }

    async fn propagate_success(&self, payment: &Payment, settled: &[Uuid], now: i64) {
        if settled.is_empty() {
            return;
        }

        if let Err(e) = self
            .lessons
            .set_payment_status(settled, LessonPaymentStatus::Paid, now)
            .await
        {
            warn!(error = %e, "lessons not marked paid");
        }

        if payment.kind != PaymentKind::PublicBooking {
            return;
        }

        match self.lessons.promote_awaiting(settled, now).await {
            Ok(n) => debug!(promoted = n, "awaiting lessons scheduled"),
            Err(e) => warn!(error = %e, "awaiting lessons not promoted"),
        }

        if let Some(instructor_id) = payment.instructor_id {
            let count = settled.len() as u32;
            if let Err(e) = self
                .relationships
                .record_booking(&payment.learner_id, &instructor_id, count, now)
                .await
            {
                warn!(error = %e, "relationship statistics not recorded");
            }
        }
    }

    async fn after_abandon(
        &self,
        payment_id: &Uuid,
        applied: bool,
        what: &'static str,
    ) -> Result<Reconciled, AppError> {
        let payment = self.payment(payment_id).await?;
        annotate_span(Some(&payment.learner_id), Some(payment_id));

        if !applied {
            debug!(status = %payment.status, "{what}: not pending, ignored");
            return Ok(Reconciled {
                payment,
                applied: false,
            });
        }

        // An abandoned pay-before-confirm booking releases its lesson.
        if payment.kind == PaymentKind::PublicBooking {
            let now = now_ms();
            for id in &payment.lesson_ids {
                self.release(id, LessonStatus::PendingConfirmation, what, now)
                    .await;
            }
        }

        info!(status = %payment.status, "{what}");
        Ok(Reconciled {
            payment,
            applied: true,
        })
    }

    async fn send_receipt(&self, payment: &Payment) {
        match self.learners.find_learner(&payment.learner_id).await {
            Ok(Some(learner)) => {
                dispatch_receipt(self.notifier.clone(), learner.email, Receipt::from(payment))
            }
            Ok(None) => warn!("receipt skipped: learner missing"),
            Err(e) => warn!(error = %e, "receipt skipped: learner unreadable"),
        }
    }
}

struct Settlement {
    credited: i64,
    /// Lessons this payment now pays for.
    lesson_ids: Vec<Uuid>,
}

struct Reversal {
    charged: i64,
    paid: Vec<Uuid>,
    upcoming: Vec<Uuid>,
}

fn system_cancellation(reason: &str, now: i64) -> Cancellation {
    Cancellation {
        cancelled_by: CancelledBy::System,
        reason: Some(reason.to_string()),
        cancelled_ms: now,
    }
}
