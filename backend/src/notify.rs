//! Outbound learner notifications.
//!
//! Delivery is fire-and-forget: dispatch spawns a detached task, failures
//! are logged, and nothing here can fail a booking or a payment.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{Instrument, Span, info, warn};
use uuid::Uuid;

use crate::model::{Lesson, Payment, PaymentKind};
use crate::money::format_minor;

#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub payment_id: Uuid,
    pub kind: PaymentKind,
    pub amount: i64,
    pub currency: String,
    pub paid_ms: Option<i64>,
}

impl From<&Payment> for Receipt {
    fn from(p: &Payment) -> Self {
        Self {
            payment_id: p.id,
            kind: p.kind,
            amount: p.amount,
            currency: p.currency.clone(),
            paid_ms: p.paid_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingConfirmation {
    pub learner_id: Uuid,
    pub instructor_id: Uuid,
    pub lesson_ids: Vec<Uuid>,
    /// Start of the first scheduled lesson; `None` for unscheduled packages.
    pub first_start_ms: Option<i64>,
    pub total_price: i64,
}

impl BookingConfirmation {
    pub fn for_lessons(lessons: &[Lesson], total_price: i64) -> Option<Self> {
        let first = lessons.first()?;
        Some(Self {
            learner_id: first.learner_id,
            instructor_id: first.instructor_id,
            lesson_ids: lessons.iter().map(|l| l.id).collect(),
            first_start_ms: lessons
                .iter()
                .filter(|l| !l.is_placeholder())
                .map(|l| l.start_ms)
                .min(),
            total_price,
        })
    }
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send_receipt(&self, to: &str, receipt: &Receipt) -> anyhow::Result<()>;

    async fn send_booking_confirmation(
        &self,
        to: &str,
        booking: &BookingConfirmation,
    ) -> anyhow::Result<()>;
}

/// Writes notifications to the log. Used when no mail transport is wired.
pub struct TracingNotifier;

#[async_trait]
impl NotificationGateway for TracingNotifier {
    async fn send_receipt(&self, to: &str, receipt: &Receipt) -> anyhow::Result<()> {
        info!(
            target: "notify",
            to,
            payment_id = %receipt.payment_id,
            amount = %format_minor(receipt.amount),
            currency = %receipt.currency,
            "receipt"
        );
        Ok(())
    }

    async fn send_booking_confirmation(
        &self,
        to: &str,
        booking: &BookingConfirmation,
    ) -> anyhow::Result<()> {
        info!(
            target: "notify",
            to,
            lessons = booking.lesson_ids.len(),
            total = %format_minor(booking.total_price),
            "booking confirmation"
        );
        Ok(())
    }
}

pub fn dispatch_receipt(notifier: Arc<dyn NotificationGateway>, to: String, receipt: Receipt) {
    tokio::spawn(
        async move {
            if let Err(e) = notifier.send_receipt(&to, &receipt).await {
                warn!(error = %e, payment_id = %receipt.payment_id, "receipt delivery failed");
            }
        }
        .instrument(Span::current()),
    );
}

pub fn dispatch_confirmation(
    notifier: Arc<dyn NotificationGateway>,
    to: String,
    booking: BookingConfirmation,
) {
    tokio::spawn(
        async move {
            if let Err(e) = notifier.send_booking_confirmation(&to, &booking).await {
                warn!(error = %e, learner_id = %booking.learner_id, "booking confirmation failed");
            }
        }
        .instrument(Span::current()),
    );
}
