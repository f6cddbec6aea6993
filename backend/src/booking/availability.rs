use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{AvailabilityOverride, TimeRange, WeeklyAvailability};
use crate::store::{AvailabilityRepository, InstructorDirectory, Stores};

/// Writes the records `SlotResolver` reads: weekly days and date overrides.
pub struct AvailabilityBook {
    instructors: Arc<dyn InstructorDirectory>,
    availability: Arc<dyn AvailabilityRepository>,
}

impl AvailabilityBook {
    pub fn new(stores: &Stores) -> Self {
        Self {
            instructors: stores.instructors.clone(),
            availability: stores.availability.clone(),
        }
    }

    /// The full week, with defaults filled in for days never written.
    pub async fn week(&self, instructor_id: &Uuid) -> Result<Vec<WeeklyAvailability>, AppError> {
        self.instructor(instructor_id).await?;
        Ok(self.availability.weekly(instructor_id).await?)
    }

    /// Adds a weekday record; a second record for the same day is a conflict.
    #[instrument(skip(self, day), target = "availability", fields(instructor_id = %day.instructor_id, day = %day.day))]
    pub async fn add_weekly_day(&self, day: &WeeklyAvailability) -> Result<(), AppError> {
        self.instructor(&day.instructor_id).await?;
        validate_ranges(&day.ranges)?;

        if !self.availability.insert_weekly_day(day).await? {
            return Err(AppError::Conflict(format!(
                "instructor {} already has a {} record",
                day.instructor_id, day.day
            )));
        }
        info!("weekly day added");
        Ok(())
    }

    #[instrument(skip(self, day), target = "availability", fields(instructor_id = %day.instructor_id, day = %day.day))]
    pub async fn replace_weekly_day(&self, day: &WeeklyAvailability) -> Result<(), AppError> {
        self.instructor(&day.instructor_id).await?;
        validate_ranges(&day.ranges)?;
        self.availability.replace_weekly_day(day).await?;
        Ok(())
    }

    #[instrument(skip(self, o), target = "availability", fields(instructor_id = %o.instructor_id, date = %o.date))]
    pub async fn set_override(&self, o: &AvailabilityOverride) -> Result<(), AppError> {
        self.instructor(&o.instructor_id).await?;
        validate_ranges(&o.ranges)?;
        self.availability.upsert_override(o).await?;
        Ok(())
    }

    #[instrument(skip(self), target = "availability", fields(instructor_id = %instructor_id))]
    pub async fn clear_override(
        &self,
        instructor_id: &Uuid,
        date: NaiveDate,
    ) -> Result<(), AppError> {
        if !self.availability.delete_override(instructor_id, date).await? {
            return Err(AppError::NotFound(format!(
                "override for instructor {instructor_id} on {date}"
            )));
        }
        Ok(())
    }

    async fn instructor(&self, id: &Uuid) -> Result<(), AppError> {
        self.instructors
            .find_instructor(id)
            .await?
            .ok_or_else(|| AppError::not_found("instructor", id))?;
        Ok(())
    }
}

/// Each range must be non-empty; ranges may not overlap each other.
fn validate_ranges(ranges: &[TimeRange]) -> Result<(), AppError> {
    if let Some(bad) = ranges.iter().find(|r| r.start >= r.end) {
        return Err(AppError::BadRequest(format!(
            "range {}-{} ends before it starts",
            bad.start.format("%H:%M"),
            bad.end.format("%H:%M")
        )));
    }

    let mut sorted: Vec<&TimeRange> = ranges.iter().collect();
    sorted.sort_by_key(|r| r.start);
    if sorted.windows(2).any(|w| w[1].start < w[0].end) {
        return Err(AppError::BadRequest("availability ranges overlap".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(a: &str, b: &str) -> TimeRange {
        TimeRange::parse(a, b).unwrap()
    }

    #[test]
    fn accepts_disjoint_and_touching_ranges() {
        assert!(validate_ranges(&[]).is_ok());
        assert!(validate_ranges(&[range("13:00", "17:00"), range("09:00", "13:00")]).is_ok());
    }

    #[test]
    fn rejects_inverted_or_overlapping_ranges() {
        assert!(matches!(
            validate_ranges(&[range("12:00", "09:00")]),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            validate_ranges(&[range("09:00", "12:00"), range("11:00", "14:00")]),
            Err(AppError::BadRequest(_))
        ));
    }
}
