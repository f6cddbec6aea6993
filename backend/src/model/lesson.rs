use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lesson lifecycle.
///
/// `PendingConfirmation -> Scheduled -> {Completed | Cancelled | NoShow}`.
/// A pending-confirmation lesson may also be cancelled when its payment
/// fails. Completed, cancelled and no-show are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LessonStatus {
    PendingConfirmation,
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::PendingConfirmation => "pending-confirmation",
            LessonStatus::Scheduled => "scheduled",
            LessonStatus::Completed => "completed",
            LessonStatus::Cancelled => "cancelled",
            LessonStatus::NoShow => "no-show",
        }
    }

    /// Occupying lessons reserve their interval for both parties.
    pub fn is_occupying(&self) -> bool {
        matches!(self, LessonStatus::Scheduled | LessonStatus::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LessonStatus::Completed | LessonStatus::Cancelled | LessonStatus::NoShow
        )
    }

    pub fn can_transition_to(&self, next: LessonStatus) -> bool {
        use LessonStatus::*;
        matches!(
            (self, next),
            (PendingConfirmation, Scheduled)
                | (PendingConfirmation, Cancelled)
                | (Scheduled, Completed)
                | (Scheduled, Cancelled)
                | (Scheduled, NoShow)
        )
    }
}

/// Statuses stored in SQL predicates for "occupying".
pub const OCCUPYING: [LessonStatus; 2] = [LessonStatus::Scheduled, LessonStatus::Completed];

impl fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LessonStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending-confirmation" => Ok(LessonStatus::PendingConfirmation),
            "scheduled" => Ok(LessonStatus::Scheduled),
            "completed" => Ok(LessonStatus::Completed),
            "cancelled" => Ok(LessonStatus::Cancelled),
            "no-show" => Ok(LessonStatus::NoShow),
            other => Err(anyhow::anyhow!("Invalid LessonStatus value: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonPaymentStatus {
    Pending,
    Paid,
    Refunded,
}

impl LessonPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonPaymentStatus::Pending => "pending",
            LessonPaymentStatus::Paid => "paid",
            LessonPaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for LessonPaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LessonPaymentStatus::Pending),
            "paid" => Ok(LessonPaymentStatus::Paid),
            "refunded" => Ok(LessonPaymentStatus::Refunded),
            other => Err(anyhow::anyhow!("Invalid LessonPaymentStatus value: {}", other)),
        }
    }
}

/// Which ledger paid for a lesson. Exactly one is debited per booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Funding {
    /// Learner's global balance (self-service bookings).
    #[default]
    LearnerBalance,
    /// Per learner-instructor balance (instructor-initiated bookings).
    RelationshipBalance,
}

impl Funding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Funding::LearnerBalance => "learner_balance",
            Funding::RelationshipBalance => "relationship_balance",
        }
    }
}

impl FromStr for Funding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learner_balance" => Ok(Funding::LearnerBalance),
            "relationship_balance" => Ok(Funding::RelationshipBalance),
            other => Err(anyhow::anyhow!("Invalid Funding value: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Learner,
    Instructor,
    System,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::Learner => "learner",
            CancelledBy::Instructor => "instructor",
            CancelledBy::System => "system",
        }
    }
}

impl FromStr for CancelledBy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learner" => Ok(CancelledBy::Learner),
            "instructor" => Ok(CancelledBy::Instructor),
            "system" => Ok(CancelledBy::System),
            other => Err(anyhow::anyhow!("Invalid CancelledBy value: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub cancelled_by: CancelledBy,
    pub reason: Option<String>,
    pub cancelled_ms: i64,
}

/// Position of a lesson inside a purchased package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSlot {
    pub package_id: Uuid,
    pub ordinal: u32,
    pub total: u32,
}

/// Half-open `[start_ms, end_ms)` interval in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Interval {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// `[s1,e1)` and `[s2,e2)` conflict iff `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start_ms < other.end_ms && other.start_ms < self.end_ms
    }
}

/// A scheduled unit of teaching time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub learner_id: Uuid,

    /// Epoch 0 for package placeholders not yet scheduled.
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_minutes: u32,
    pub lesson_type: String,

    pub status: LessonStatus,
    pub payment_status: LessonPaymentStatus,
    pub price: i64,
    pub funding: Funding,

    pub package: Option<PackageSlot>,
    pub pickup: Option<String>,
    pub notes: Option<String>,
    pub cancellation: Option<Cancellation>,

    pub created_ms: i64,
    pub updated_ms: i64,
}

impl Lesson {
    pub fn interval(&self) -> Interval {
        Interval::new(self.start_ms, self.end_ms)
    }

    pub fn is_placeholder(&self) -> bool {
        self.package.is_some() && self.status == LessonStatus::PendingConfirmation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for s in [
            LessonStatus::PendingConfirmation,
            LessonStatus::Scheduled,
            LessonStatus::Completed,
            LessonStatus::Cancelled,
            LessonStatus::NoShow,
        ] {
            assert_eq!(s.as_str().parse::<LessonStatus>().unwrap(), s);
        }
        assert!("booked".parse::<LessonStatus>().is_err());
    }

    #[test]
    fn only_scheduled_and_completed_occupy() {
        assert!(LessonStatus::Scheduled.is_occupying());
        assert!(LessonStatus::Completed.is_occupying());
        assert!(!LessonStatus::PendingConfirmation.is_occupying());
        assert!(!LessonStatus::Cancelled.is_occupying());
        assert!(!LessonStatus::NoShow.is_occupying());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use LessonStatus::*;
        let all = [PendingConfirmation, Scheduled, Completed, Cancelled, NoShow];
        for from in [Completed, Cancelled, NoShow] {
            assert!(from.is_terminal());
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn scheduled_moves_forward_only() {
        use LessonStatus::*;
        assert!(Scheduled.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Scheduled.can_transition_to(NoShow));
        assert!(!Scheduled.can_transition_to(PendingConfirmation));
        assert!(PendingConfirmation.can_transition_to(Scheduled));
        assert!(!PendingConfirmation.can_transition_to(Completed));
    }

    #[test]
    fn half_open_intervals_touching_do_not_overlap() {
        let a = Interval::new(0, 60);
        let b = Interval::new(60, 120);
        let c = Interval::new(30, 90);

        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
        assert!(a.overlaps(&a));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]
        #[test]
        fn overlap_is_symmetric_and_matches_pointwise_definition(
            s1 in 0i64..200, l1 in 1i64..100,
            s2 in 0i64..200, l2 in 1i64..100,
        ) {
            let a = Interval::new(s1, s1 + l1);
            let b = Interval::new(s2, s2 + l2);

            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));

            let shares_point = (a.start_ms..a.end_ms).any(|t| t >= b.start_ms && t < b.end_ms);
            prop_assert_eq!(a.overlaps(&b), shares_point);
        }
    }
}
