use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{SqliteStore, parse_uuid};
use crate::model::{
    AvailabilityOverride, TimeRange, WEEK, WeeklyAvailability, weekday_from_index, weekday_index,
};
use crate::store::repository::AvailabilityRepository;
use crate::time::now_ms;

const DATE_FMT: &str = "%Y-%m-%d";

#[async_trait]
impl AvailabilityRepository for SqliteStore {
    async fn weekly(&self, instructor_id: &Uuid) -> Result<Vec<WeeklyAvailability>> {
        // Missing days get the default pattern; existing rows are untouched.
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        for day in WEEK {
            let default = WeeklyAvailability::default_for(*instructor_id, day);
            sqlx::query(
                r#"
INSERT INTO weekly_availability (instructor_id, day_of_week, ranges_json, available, updated_ms)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT (instructor_id, day_of_week) DO NOTHING;
"#,
            )
            .bind(instructor_id.to_string())
            .bind(weekday_index(day))
            .bind(serde_json::to_string(&default.ranges)?)
            .bind(default.available as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let rows = sqlx::query(
            r#"
SELECT instructor_id, day_of_week, ranges_json, available
FROM weekly_availability
WHERE instructor_id = ?
ORDER BY day_of_week;
"#,
        )
        .bind(instructor_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_weekly).collect()
    }

    async fn insert_weekly_day(&self, day: &WeeklyAvailability) -> Result<bool> {
        let res = sqlx::query(
            r#"
INSERT INTO weekly_availability (instructor_id, day_of_week, ranges_json, available, updated_ms)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT (instructor_id, day_of_week) DO NOTHING;
"#,
        )
        .bind(day.instructor_id.to_string())
        .bind(weekday_index(day.day))
        .bind(serde_json::to_string(&day.ranges)?)
        .bind(day.available as i64)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn replace_weekly_day(&self, day: &WeeklyAvailability) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO weekly_availability (instructor_id, day_of_week, ranges_json, available, updated_ms)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT (instructor_id, day_of_week) DO UPDATE SET
  ranges_json = excluded.ranges_json,
  available = excluded.available,
  updated_ms = excluded.updated_ms;
"#,
        )
        .bind(day.instructor_id.to_string())
        .bind(weekday_index(day.day))
        .bind(serde_json::to_string(&day.ranges)?)
        .bind(day.available as i64)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn overrides_between(
        &self,
        instructor_id: &Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailabilityOverride>> {
        // ISO dates compare lexicographically in date order.
        let rows = sqlx::query(
            r#"
SELECT instructor_id, date, ranges_json, available, reason
FROM availability_overrides
WHERE instructor_id = ? AND date >= ? AND date <= ?
ORDER BY date;
"#,
        )
        .bind(instructor_id.to_string())
        .bind(from.format(DATE_FMT).to_string())
        .bind(to.format(DATE_FMT).to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_override).collect()
    }

    async fn upsert_override(&self, o: &AvailabilityOverride) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO availability_overrides (instructor_id, date, ranges_json, available, reason, updated_ms)
VALUES (?, ?, ?, ?, ?, ?)
ON CONFLICT (instructor_id, date) DO UPDATE SET
  ranges_json = excluded.ranges_json,
  available = excluded.available,
  reason = excluded.reason,
  updated_ms = excluded.updated_ms;
"#,
        )
        .bind(o.instructor_id.to_string())
        .bind(o.date.format(DATE_FMT).to_string())
        .bind(serde_json::to_string(&o.ranges)?)
        .bind(o.available as i64)
        .bind(o.reason.as_deref())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_override(&self, instructor_id: &Uuid, date: NaiveDate) -> Result<bool> {
        let res = sqlx::query(
            r#"
DELETE FROM availability_overrides
WHERE instructor_id = ? AND date = ?;
"#,
        )
        .bind(instructor_id.to_string())
        .bind(date.format(DATE_FMT).to_string())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}

fn parse_ranges(raw: &str) -> Result<Vec<TimeRange>> {
    serde_json::from_str(raw).with_context(|| format!("invalid ranges_json: {raw}"))
}

fn row_to_weekly(r: &SqliteRow) -> Result<WeeklyAvailability> {
    Ok(WeeklyAvailability {
        instructor_id: parse_uuid(&r.try_get::<String, _>("instructor_id")?, "instructor_id")?,
        day: weekday_from_index(r.try_get("day_of_week")?)?,
        ranges: parse_ranges(&r.try_get::<String, _>("ranges_json")?)?,
        available: r.try_get::<i64, _>("available")? == 1,
    })
}

fn row_to_override(r: &SqliteRow) -> Result<AvailabilityOverride> {
    let raw_date: String = r.try_get("date")?;
    Ok(AvailabilityOverride {
        instructor_id: parse_uuid(&r.try_get::<String, _>("instructor_id")?, "instructor_id")?,
        date: NaiveDate::parse_from_str(&raw_date, DATE_FMT)
            .with_context(|| format!("invalid override date: {raw_date}"))?,
        ranges: parse_ranges(&r.try_get::<String, _>("ranges_json")?)?,
        available: r.try_get::<i64, _>("available")? == 1,
        reason: r.try_get("reason")?,
    })
}
