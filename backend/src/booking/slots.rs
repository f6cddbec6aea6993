//! Bookable slot resolution.
//!
//! `SlotResolver` is a pure view over already-loaded availability and
//! commitments; it yields a lazy, restartable sequence. `SlotFinder` loads
//! that state from the store for one instructor and date range.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::AppError;
use crate::logger::warn_if_slow;
use crate::model::availability::hhmm;
use crate::model::{AvailabilityOverride, Interval, Party, TimeRange, WeeklyAvailability};
use crate::store::{AvailabilityRepository, InstructorDirectory, LessonRepository, Stores};
use crate::time::to_ms;

/// Longest date range a single query may cover.
pub const MAX_RANGE_DAYS: i64 = 92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl Slot {
    pub fn interval(&self) -> Interval {
        Interval::new(
            to_ms(self.date.and_time(self.start)),
            to_ms(self.date.and_time(self.end)),
        )
    }
}

/// Inclusive date range plus lesson length and candidate cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotQuery {
    from: NaiveDate,
    to: NaiveDate,
    duration_minutes: u32,
    step_minutes: u32,
}

impl SlotQuery {
    pub fn new(
        from: NaiveDate,
        to: NaiveDate,
        duration_minutes: u32,
        step_minutes: u32,
    ) -> Result<Self, AppError> {
        if duration_minutes == 0 {
            return Err(AppError::BadRequest("duration must be positive".into()));
        }
        if step_minutes == 0 {
            return Err(AppError::BadRequest("slot step must be positive".into()));
        }
        if to < from {
            return Err(AppError::BadRequest(format!("range end {to} precedes start {from}")));
        }
        if (to - from).num_days() >= MAX_RANGE_DAYS {
            return Err(AppError::BadRequest(format!(
                "range may span at most {MAX_RANGE_DAYS} days"
            )));
        }
        Ok(Self {
            from,
            to,
            duration_minutes,
            step_minutes,
        })
    }

    /// `[from 00:00, to + 1 day 00:00)` in epoch ms.
    pub fn window(&self) -> Interval {
        let start = self.from.and_time(NaiveTime::MIN);
        let end = self.to.and_time(NaiveTime::MIN) + Duration::days(1);
        Interval::new(to_ms(start), to_ms(end))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SlotResolver<'a> {
    weekly: &'a [WeeklyAvailability],
    overrides: &'a [AvailabilityOverride],
    busy: &'a [Interval],
}

impl<'a> SlotResolver<'a> {
    pub fn new(
        weekly: &'a [WeeklyAvailability],
        overrides: &'a [AvailabilityOverride],
        busy: &'a [Interval],
    ) -> Self {
        Self {
            weekly,
            overrides,
            busy,
        }
    }

    /// Open intervals for `date`. An override replaces the weekly pattern
    /// outright, including when it closes the day.
    pub fn effective_ranges(&self, date: NaiveDate) -> &'a [TimeRange] {
        if let Some(o) = self.overrides.iter().find(|o| o.date == date) {
            return if o.available { o.ranges.as_slice() } else { &[] };
        }

        match self.weekly.iter().find(|w| w.day == date.weekday()) {
            Some(w) if w.available => w.ranges.as_slice(),
            _ => &[],
        }
    }

    pub fn slots(self, query: SlotQuery) -> impl Iterator<Item = Slot> + 'a {
        let step = Duration::minutes(query.step_minutes as i64);
        let length = Duration::minutes(query.duration_minutes as i64);
        let until = query.to.and_time(NaiveTime::MIN) + Duration::days(1);

        query
            .from
            .iter_days()
            .take_while(move |d| *d <= query.to)
            .flat_map(move |date| {
                self.effective_ranges(date)
                    .iter()
                    .flat_map(move |range| candidates(date, *range, step, length))
            })
            .filter(move |slot| slot.date.and_time(slot.end) <= until)
            .filter(move |slot| {
                let proposed = slot.interval();
                !self.busy.iter().any(|b| b.overlaps(&proposed))
            })
    }
}

/// Start times at `step` cadence whose `[start, start + length)` fits inside `range`.
fn candidates(
    date: NaiveDate,
    range: TimeRange,
    step: Duration,
    length: Duration,
) -> impl Iterator<Item = Slot> {
    let open: NaiveDateTime = date.and_time(range.start);
    let close: NaiveDateTime = date.and_time(range.end);

    std::iter::successors(Some(open), move |s| Some(*s + step))
        .take_while(move |s| *s + length <= close)
        .map(move |s| Slot {
            date,
            start: s.time(),
            end: (s + length).time(),
        })
}

/// Loads availability and commitments, then resolves slots for one instructor.
pub struct SlotFinder {
    instructors: Arc<dyn InstructorDirectory>,
    availability: Arc<dyn AvailabilityRepository>,
    lessons: Arc<dyn LessonRepository>,
    step_minutes: u32,
}

impl SlotFinder {
    pub fn new(stores: &Stores, step_minutes: u32) -> Self {
        Self {
            instructors: stores.instructors.clone(),
            availability: stores.availability.clone(),
            lessons: stores.lessons.clone(),
            step_minutes,
        }
    }

    #[instrument(skip(self), target = "slots", fields(instructor_id = %instructor_id))]
    pub async fn resolve_slots(
        &self,
        instructor_id: &Uuid,
        from: NaiveDate,
        to: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<Slot>, AppError> {
        let query = SlotQuery::new(from, to, duration_minutes, self.step_minutes)?;

        self.instructors
            .find_instructor(instructor_id)
            .await?
            .ok_or_else(|| AppError::not_found("instructor", instructor_id))?;

        let (weekly, overrides, busy) = futures::try_join!(
            self.availability.weekly(instructor_id),
            self.availability.overrides_between(instructor_id, from, to),
            warn_if_slow(
                "occupying_between",
                StdDuration::from_millis(100),
                self.lessons
                    .occupying_between(Party::instructor(*instructor_id), query.window()),
            ),
        )?;

        let slots: Vec<Slot> = SlotResolver::new(&weekly, &overrides, &busy)
            .slots(query)
            .collect();

        debug!(
            slots = slots.len(),
            busy = busy.len(),
            overrides = overrides.len(),
            "resolved slots"
        );
        Ok(slots)
    }
}
