use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named lesson-type price/duration pair from an instructor's price table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonType {
    pub name: String,
    /// Price for `duration_minutes`, in minor units.
    pub price: i64,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructor {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Fallback price per hour when a lesson type is not in the table.
    pub hourly_rate: i64,
    pub currency: String,
    pub lesson_types: Vec<LessonType>,
}

impl Instructor {
    pub fn lesson_type(&self, name: &str) -> Option<&LessonType> {
        self.lesson_types.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Learner {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Positive = prepaid credit, negative = owed. Mutated only by the ledger.
    pub balance: i64,
    pub primary_instructor_id: Option<Uuid>,
}

/// Per (learner, instructor) statistics plus an independent balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub learner_id: Uuid,
    pub instructor_id: Uuid,
    pub lesson_count: u32,
    pub balance: i64,
    pub first_booked_ms: Option<i64>,
    pub last_booked_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub name: String,
    pub lesson_count: u32,
    pub price: i64,
    pub lesson_duration_minutes: u32,
    pub lesson_type: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Instructor,
    Learner,
}

/// Someone whose calendar a lesson occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Party {
    pub id: Uuid,
    pub role: PartyRole,
}

impl Party {
    pub fn instructor(id: Uuid) -> Self {
        Self {
            id,
            role: PartyRole::Instructor,
        }
    }

    pub fn learner(id: Uuid) -> Self {
        Self {
            id,
            role: PartyRole::Learner,
        }
    }
}

/// A balance the ledger can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Account {
    Learner(Uuid),
    Relationship { learner_id: Uuid, instructor_id: Uuid },
}

impl Account {
    pub fn learner_id(&self) -> Uuid {
        match self {
            Account::Learner(id) => *id,
            Account::Relationship { learner_id, .. } => *learner_id,
        }
    }
}
