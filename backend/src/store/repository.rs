//! Narrow persistence seams consumed by the booking engine.
//!
//! Every mutation that coordinates concurrent requests is a conditional
//! write: it returns whether (or what) it changed, and callers treat "no row
//! matched" as a lost race, never as an error.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::model::{
    Account, AvailabilityOverride, Cancellation, Instructor, Interval, Learner, Lesson,
    LessonPaymentStatus, LessonStatus, Package, Party, Payment, Relationship, WeeklyAvailability,
};

#[async_trait]
pub trait LearnerDirectory: Send + Sync {
    async fn find_learner(&self, id: &Uuid) -> Result<Option<Learner>>;

    async fn assign_primary_instructor(&self, learner_id: &Uuid, instructor_id: &Uuid)
    -> Result<()>;
}

#[async_trait]
pub trait InstructorDirectory: Send + Sync {
    async fn find_instructor(&self, id: &Uuid) -> Result<Option<Instructor>>;
}

#[async_trait]
pub trait PackageCatalog: Send + Sync {
    async fn find_package(&self, id: &Uuid) -> Result<Option<Package>>;
}

#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    /// All seven days, creating defaults for missing days on first read.
    async fn weekly(&self, instructor_id: &Uuid) -> Result<Vec<WeeklyAvailability>>;

    /// Returns false when a record for that day already exists.
    async fn insert_weekly_day(&self, day: &WeeklyAvailability) -> Result<bool>;

    async fn replace_weekly_day(&self, day: &WeeklyAvailability) -> Result<()>;

    /// Overrides with `from <= date <= to`.
    async fn overrides_between(
        &self,
        instructor_id: &Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityOverride>>;

    async fn upsert_override(&self, o: &AvailabilityOverride) -> Result<()>;

    async fn delete_override(&self, instructor_id: &Uuid, date: NaiveDate) -> Result<bool>;
}

#[async_trait]
pub trait LessonRepository: Send + Sync {
    async fn insert_lesson(&self, lesson: &Lesson) -> Result<()>;

    /// All-or-nothing insert of a package's placeholders.
    async fn insert_lessons(&self, lessons: &[Lesson]) -> Result<()>;

    async fn find_lesson(&self, id: &Uuid) -> Result<Option<Lesson>>;

    /// Intervals of occupying lessons for `party` that overlap `window`.
    async fn occupying_between(&self, party: Party, window: Interval) -> Result<Vec<Interval>>;

    /// `from -> to` if and only if the lesson is still in `from`.
    async fn transition(
        &self,
        id: &Uuid,
        from: LessonStatus,
        to: LessonStatus,
        cancellation: Option<&Cancellation>,
        now_ms: i64,
    ) -> Result<bool>;

    async fn set_payment_status(
        &self,
        ids: &[Uuid],
        status: LessonPaymentStatus,
        now_ms: i64,
    ) -> Result<u64>;

    /// Pending-confirmation lessons outside a package become scheduled.
    async fn promote_awaiting(&self, ids: &[Uuid], now_ms: i64) -> Result<u64>;

    /// Claims a time for a package placeholder still pending confirmation.
    async fn schedule_placeholder(&self, id: &Uuid, at: Interval, now_ms: i64) -> Result<bool>;

    async fn lessons_for_learner(
        &self,
        learner_id: &Uuid,
        status: Option<LessonStatus>,
    ) -> Result<Vec<Lesson>>;

    async fn lessons_for_package(&self, package_id: &Uuid) -> Result<Vec<Lesson>>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Adds `amount`. `None` if the account does not exist.
    async fn credit(&self, account: &Account, amount: i64, now_ms: i64) -> Result<Option<i64>>;

    /// Subtracts `amount` only while `balance >= amount` at write time.
    /// `None` when the predicate failed or the account does not exist.
    async fn debit_if_sufficient(
        &self,
        account: &Account,
        amount: i64,
        now_ms: i64,
    ) -> Result<Option<i64>>;

    /// Subtracts unconditionally; the balance may go negative.
    async fn charge(&self, account: &Account, amount: i64, now_ms: i64) -> Result<Option<i64>>;

    async fn balance(&self, account: &Account) -> Result<Option<i64>>;
}

#[async_trait]
pub trait RelationshipRepository: Send + Sync {
    /// Bumps booking statistics; never touches the relationship balance.
    async fn record_booking(
        &self,
        learner_id: &Uuid,
        instructor_id: &Uuid,
        lessons: u32,
        now_ms: i64,
    ) -> Result<()>;

    async fn find_relationship(
        &self,
        learner_id: &Uuid,
        instructor_id: &Uuid,
    ) -> Result<Option<Relationship>>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    async fn find_payment(&self, id: &Uuid) -> Result<Option<Payment>>;

    async fn find_by_gateway_ref(&self, gateway_ref: &str) -> Result<Option<Payment>>;

    async fn attach_gateway_ref(&self, id: &Uuid, gateway_ref: &str) -> Result<bool>;

    /// `pending -> succeeded`, stamping `paid_ms`. True only for the winner.
    async fn claim_success(&self, id: &Uuid, now_ms: i64) -> Result<bool>;

    /// Stores the net balance effect of a claimed success. False when the
    /// payment is no longer `succeeded`.
    async fn record_credit(&self, id: &Uuid, credited: i64, now_ms: i64) -> Result<bool>;

    /// `succeeded -> pending`, clearing `paid_ms` and `credited`.
    async fn revert_claim(&self, id: &Uuid, now_ms: i64) -> Result<bool>;

    async fn mark_failed(&self, id: &Uuid, now_ms: i64) -> Result<bool>;

    async fn mark_cancelled(&self, id: &Uuid, now_ms: i64) -> Result<bool>;

    /// `succeeded -> refunded`, stamping `refunded_ms`.
    async fn claim_refund(&self, id: &Uuid, now_ms: i64) -> Result<bool>;

    /// `refunded -> succeeded`, clearing `refunded_ms`.
    async fn revert_refund(&self, id: &Uuid, now_ms: i64) -> Result<bool>;

    async fn payments_for_learner(&self, learner_id: &Uuid) -> Result<Vec<Payment>>;
}
