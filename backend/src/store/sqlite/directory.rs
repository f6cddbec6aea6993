use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{SqliteStore, i64_to_u32, parse_opt_uuid, parse_uuid};
use crate::model::{Instructor, Learner, LessonType, Package, Relationship};
use crate::store::repository::{
    InstructorDirectory, LearnerDirectory, PackageCatalog, RelationshipRepository,
};

#[async_trait]
impl LearnerDirectory for SqliteStore {
    async fn find_learner(&self, id: &Uuid) -> Result<Option<Learner>> {
        let row = sqlx::query(
            r#"
SELECT id, name, email, balance, primary_instructor_id
FROM learners
WHERE id = ?;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_learner).transpose()
    }

    async fn assign_primary_instructor(
        &self,
        learner_id: &Uuid,
        instructor_id: &Uuid,
    ) -> Result<()> {
        // Only fills an empty slot; an existing primary instructor is kept.
        sqlx::query(
            r#"
UPDATE learners
SET primary_instructor_id = ?, updated_ms = ?
WHERE id = ? AND primary_instructor_id IS NULL;
"#,
        )
        .bind(instructor_id.to_string())
        .bind(crate::time::now_ms())
        .bind(learner_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl InstructorDirectory for SqliteStore {
    async fn find_instructor(&self, id: &Uuid) -> Result<Option<Instructor>> {
        let Some(row) = sqlx::query(
            r#"
SELECT id, name, email, hourly_rate, currency
FROM instructors
WHERE id = ?;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let type_rows = sqlx::query(
            r#"
SELECT name, price, duration_minutes
FROM lesson_types
WHERE instructor_id = ?
ORDER BY name;
"#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let lesson_types = type_rows
            .iter()
            .map(|r| -> Result<LessonType> {
                Ok(LessonType {
                    name: r.try_get("name")?,
                    price: r.try_get("price")?,
                    duration_minutes: i64_to_u32(r.try_get("duration_minutes")?, "duration_minutes")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Instructor {
            id: parse_uuid(&row.try_get::<String, _>("id")?, "instructor id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            hourly_rate: row.try_get("hourly_rate")?,
            currency: row.try_get("currency")?,
            lesson_types,
        }))
    }
}

#[async_trait]
impl PackageCatalog for SqliteStore {
    async fn find_package(&self, id: &Uuid) -> Result<Option<Package>> {
        let row = sqlx::query(
            r#"
SELECT id, instructor_id, name, lesson_count, price,
       lesson_duration_minutes, lesson_type, active
FROM packages
WHERE id = ?;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_package).transpose()
    }
}

#[async_trait]
impl RelationshipRepository for SqliteStore {
    async fn record_booking(
        &self,
        learner_id: &Uuid,
        instructor_id: &Uuid,
        lessons: u32,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO learner_instructors
  (learner_id, instructor_id, lesson_count, balance, first_booked_ms, last_booked_ms)
VALUES (?, ?, ?, 0, ?, ?)
ON CONFLICT (learner_id, instructor_id) DO UPDATE SET
  lesson_count = lesson_count + excluded.lesson_count,
  first_booked_ms = COALESCE(first_booked_ms, excluded.first_booked_ms),
  last_booked_ms = excluded.last_booked_ms;
"#,
        )
        .bind(learner_id.to_string())
        .bind(instructor_id.to_string())
        .bind(lessons as i64)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_relationship(
        &self,
        learner_id: &Uuid,
        instructor_id: &Uuid,
    ) -> Result<Option<Relationship>> {
        let row = sqlx::query(
            r#"
SELECT learner_id, instructor_id, lesson_count, balance, first_booked_ms, last_booked_ms
FROM learner_instructors
WHERE learner_id = ? AND instructor_id = ?;
"#,
        )
        .bind(learner_id.to_string())
        .bind(instructor_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<Relationship> {
            Ok(Relationship {
                learner_id: parse_uuid(&r.try_get::<String, _>("learner_id")?, "learner_id")?,
                instructor_id: parse_uuid(
                    &r.try_get::<String, _>("instructor_id")?,
                    "instructor_id",
                )?,
                lesson_count: i64_to_u32(r.try_get("lesson_count")?, "lesson_count")?,
                balance: r.try_get("balance")?,
                first_booked_ms: r.try_get("first_booked_ms")?,
                last_booked_ms: r.try_get("last_booked_ms")?,
            })
        })
        .transpose()
    }
}

fn row_to_learner(r: &SqliteRow) -> Result<Learner> {
    Ok(Learner {
        id: parse_uuid(&r.try_get::<String, _>("id")?, "learner id")?,
        name: r.try_get("name")?,
        email: r.try_get("email")?,
        balance: r.try_get("balance")?,
        primary_instructor_id: parse_opt_uuid(
            r.try_get("primary_instructor_id")?,
            "primary_instructor_id",
        )?,
    })
}

fn row_to_package(r: &SqliteRow) -> Result<Package> {
    Ok(Package {
        id: parse_uuid(&r.try_get::<String, _>("id")?, "package id")?,
        instructor_id: parse_uuid(&r.try_get::<String, _>("instructor_id")?, "instructor_id")?,
        name: r.try_get("name")?,
        lesson_count: i64_to_u32(r.try_get("lesson_count")?, "lesson_count")?,
        price: r.try_get("price")?,
        lesson_duration_minutes: i64_to_u32(
            r.try_get("lesson_duration_minutes")?,
            "lesson_duration_minutes",
        )?,
        lesson_type: r.try_get("lesson_type")?,
        active: r.try_get::<i64, _>("active")? == 1,
    })
}
