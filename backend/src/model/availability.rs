use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Half-open time-of-day interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parses `"09:00"`/`"17:30"` pairs.
    pub fn parse(start: &str, end: &str) -> anyhow::Result<Self> {
        Ok(Self {
            start: hhmm::parse(start)?,
            end: hhmm::parse(end)?,
        })
    }
}

/// Recurring pattern for one weekday. At most one per (instructor, day).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeeklyAvailability {
    pub instructor_id: Uuid,
    pub day: Weekday,
    pub ranges: Vec<TimeRange>,
    pub available: bool,
}

impl WeeklyAvailability {
    /// Default pattern created lazily on first read:
    /// weekdays 09:00-17:00, weekends closed.
    pub fn default_for(instructor_id: Uuid, day: Weekday) -> Self {
        let working = !matches!(day, Weekday::Sat | Weekday::Sun);
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN);
        let five = NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN);

        Self {
            instructor_id,
            day,
            ranges: if working {
                vec![TimeRange::new(nine, five)]
            } else {
                Vec::new()
            },
            available: working,
        }
    }
}

/// Date-specific replacement for the weekly pattern. When present it fully
/// supersedes that weekday, including the "day off" case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityOverride {
    pub instructor_id: Uuid,
    pub date: NaiveDate,
    pub ranges: Vec<TimeRange>,
    pub available: bool,
    pub reason: Option<String>,
}

pub const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn weekday_from_index(i: i64) -> anyhow::Result<Weekday> {
    usize::try_from(i)
        .ok()
        .and_then(|i| WEEK.get(i).copied())
        .ok_or_else(|| anyhow::anyhow!("day_of_week out of range: {i}"))
}

pub fn weekday_index(day: Weekday) -> i64 {
    day.num_days_from_monday() as i64
}

/// `HH:MM` wire format for times of day.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> anyhow::Result<NaiveTime> {
        NaiveTime::parse_from_str(s, "%H:%M")
            .map_err(|e| anyhow::anyhow!("invalid time of day '{s}': {e}"))
    }

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}
