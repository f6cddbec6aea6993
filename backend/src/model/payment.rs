use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `Pending -> {Succeeded | Failed | Cancelled}`, `Succeeded -> Refunded`.
///
/// Reconciliation may also put a claimed `Succeeded` back to `Pending` when
/// the ledger credit fails; that revert is a store operation, not a
/// lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Succeeded) | (Pending, Failed) | (Pending, Cancelled) | (Succeeded, Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(anyhow::anyhow!("Invalid PaymentStatus value: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// Prepaid credit bought through the gateway.
    TopUp,
    /// Audit record of a lesson paid from a balance.
    LessonBooking,
    /// Audit record of a package paid from a balance.
    PackageBooking,
    /// Pay-before-confirm booking settled by the gateway.
    PublicBooking,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::TopUp => "top_up",
            PaymentKind::LessonBooking => "lesson_booking",
            PaymentKind::PackageBooking => "package_booking",
            PaymentKind::PublicBooking => "public_booking",
        }
    }
}

impl FromStr for PaymentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_up" => Ok(PaymentKind::TopUp),
            "lesson_booking" => Ok(PaymentKind::LessonBooking),
            "package_booking" => Ok(PaymentKind::PackageBooking),
            "public_booking" => Ok(PaymentKind::PublicBooking),
            other => Err(anyhow::anyhow!("Invalid PaymentKind value: {}", other)),
        }
    }
}

/// One record per gateway intent (or per balance-funded booking, for audit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub instructor_id: Option<Uuid>,
    pub lesson_ids: Vec<Uuid>,
    pub package_id: Option<Uuid>,
    pub kind: PaymentKind,
    pub amount: i64,
    /// Net balance effect of the success transition; what a refund reverses.
    pub credited: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_ref: Option<String>,
    pub created_ms: i64,
    pub paid_ms: Option<i64>,
    pub refunded_ms: Option<i64>,
}

impl Payment {
    pub fn pending(learner_id: Uuid, kind: PaymentKind, amount: i64, currency: &str, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            learner_id,
            instructor_id: None,
            lesson_ids: Vec::new(),
            package_id: None,
            kind,
            amount,
            credited: 0,
            currency: currency.to_string(),
            status: PaymentStatus::Pending,
            gateway_ref: None,
            created_ms: now_ms,
            paid_ms: None,
            refunded_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_documented_transitions_are_legal() {
        use PaymentStatus::*;
        let all = [Pending, Succeeded, Failed, Cancelled, Refunded];
        let legal = [
            (Pending, Succeeded),
            (Pending, Failed),
            (Pending, Cancelled),
            (Succeeded, Refunded),
        ];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn kind_and_status_parse_their_own_strings() {
        for k in [
            PaymentKind::TopUp,
            PaymentKind::LessonBooking,
            PaymentKind::PackageBooking,
            PaymentKind::PublicBooking,
        ] {
            assert_eq!(k.as_str().parse::<PaymentKind>().unwrap(), k);
        }
        assert_eq!("refunded".parse::<PaymentStatus>().unwrap(), PaymentStatus::Refunded);
        assert!("paid".parse::<PaymentStatus>().is_err());
    }
}
