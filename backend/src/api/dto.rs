use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::model::{CancelledBy, LessonStatus};

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default = "default_duration")]
    pub duration: u32,
}

fn default_duration() -> u32 {
    60
}

#[derive(Debug, Deserialize)]
pub struct LessonListQuery {
    #[serde(default)]
    pub status: Option<LessonStatus>,
}

#[derive(Debug, Deserialize)]
pub struct TopUpBody {
    pub learner_id: uuid::Uuid,
    /// Minor units.
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub cancelled_by: CancelledBy,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub start: NaiveDateTime,
}
