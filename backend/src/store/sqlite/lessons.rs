use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection};
use uuid::Uuid;

use super::{SqliteStore, i64_to_u32, parse_opt_uuid, parse_uuid, placeholders};
use crate::model::{
    Cancellation, Interval, Lesson, LessonPaymentStatus, LessonStatus, OCCUPYING, PackageSlot,
    Party, PartyRole,
};
use crate::store::repository::LessonRepository;

const LESSON_COLUMNS: &str = r#"
  id, instructor_id, learner_id, start_ms, end_ms, duration_minutes, lesson_type,
  status, payment_status, price, funding,
  package_id, package_ordinal, package_total,
  pickup, notes, cancelled_by, cancel_reason, cancelled_ms,
  created_ms, updated_ms
"#;

#[async_trait]
impl LessonRepository for SqliteStore {
    async fn insert_lesson(&self, lesson: &Lesson) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_one(&mut conn, lesson).await
    }

    async fn insert_lessons(&self, lessons: &[Lesson]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for lesson in lessons {
            insert_one(&mut tx, lesson).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_lesson(&self, id: &Uuid) -> Result<Option<Lesson>> {
        let sql = format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ?;");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_lesson).transpose()
    }

    async fn occupying_between(&self, party: Party, window: Interval) -> Result<Vec<Interval>> {
        let column = match party.role {
            PartyRole::Instructor => "instructor_id",
            PartyRole::Learner => "learner_id",
        };
        let sql = format!(
            r#"
SELECT start_ms, end_ms
FROM lessons
WHERE {column} = ?
  AND status IN (?, ?)
  AND start_ms < ? AND end_ms > ?
ORDER BY start_ms;
"#
        );

        let rows = sqlx::query(&sql)
            .bind(party.id.to_string())
            .bind(OCCUPYING[0].as_str())
            .bind(OCCUPYING[1].as_str())
            .bind(window.end_ms)
            .bind(window.start_ms)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| -> Result<Interval> {
                Ok(Interval::new(r.try_get("start_ms")?, r.try_get("end_ms")?))
            })
            .collect()
    }

    async fn transition(
        &self,
        id: &Uuid,
        from: LessonStatus,
        to: LessonStatus,
        cancellation: Option<&Cancellation>,
        now_ms: i64,
    ) -> Result<bool> {
        // Cancellation columns always follow the new state, so moving a lesson
        // back out of `cancelled` clears them.
        let res = sqlx::query(
            r#"
UPDATE lessons
SET status = ?, cancelled_by = ?, cancel_reason = ?, cancelled_ms = ?, updated_ms = ?
WHERE id = ? AND status = ?;
"#,
        )
        .bind(to.as_str())
        .bind(cancellation.map(|c| c.cancelled_by.as_str()))
        .bind(cancellation.and_then(|c| c.reason.as_deref()))
        .bind(cancellation.map(|c| c.cancelled_ms))
        .bind(now_ms)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn set_payment_status(
        &self,
        ids: &[Uuid],
        status: LessonPaymentStatus,
        now_ms: i64,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE lessons SET payment_status = ?, updated_ms = ? WHERE id IN ({});",
            placeholders(ids.len())
        );

        let mut q = sqlx::query(&sql).bind(status.as_str()).bind(now_ms);
        for id in ids {
            q = q.bind(id.to_string());
        }
        Ok(q.execute(&self.pool).await?.rows_affected())
    }

    async fn promote_awaiting(&self, ids: &[Uuid], now_ms: i64) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            r#"
UPDATE lessons
SET status = ?, updated_ms = ?
WHERE id IN ({}) AND status = ? AND package_id IS NULL;
"#,
            placeholders(ids.len())
        );

        let mut q = sqlx::query(&sql)
            .bind(LessonStatus::Scheduled.as_str())
            .bind(now_ms);
        for id in ids {
            q = q.bind(id.to_string());
        }
        let res = q
            .bind(LessonStatus::PendingConfirmation.as_str())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn schedule_placeholder(&self, id: &Uuid, at: Interval, now_ms: i64) -> Result<bool> {
        let res = sqlx::query(
            r#"
UPDATE lessons
SET status = ?, start_ms = ?, end_ms = ?, updated_ms = ?
WHERE id = ? AND status = ? AND package_id IS NOT NULL;
"#,
        )
        .bind(LessonStatus::Scheduled.as_str())
        .bind(at.start_ms)
        .bind(at.end_ms)
        .bind(now_ms)
        .bind(id.to_string())
        .bind(LessonStatus::PendingConfirmation.as_str())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn lessons_for_learner(
        &self,
        learner_id: &Uuid,
        status: Option<LessonStatus>,
    ) -> Result<Vec<Lesson>> {
        let sql = format!(
            r#"
SELECT {LESSON_COLUMNS}
FROM lessons
WHERE learner_id = ? AND (? IS NULL OR status = ?)
ORDER BY start_ms, package_ordinal;
"#
        );
        let status = status.map(|s| s.as_str());

        let rows = sqlx::query(&sql)
            .bind(learner_id.to_string())
            .bind(status)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        collect_lessons(&rows)
    }

    async fn lessons_for_package(&self, package_id: &Uuid) -> Result<Vec<Lesson>> {
        let sql = format!(
            r#"
SELECT {LESSON_COLUMNS}
FROM lessons
WHERE package_id = ?
ORDER BY learner_id, package_ordinal;
"#
        );
        let rows = sqlx::query(&sql)
            .bind(package_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        collect_lessons(&rows)
    }
}

async fn insert_one(conn: &mut SqliteConnection, lesson: &Lesson) -> Result<()> {
    let sql = format!(
        "INSERT INTO lessons ({LESSON_COLUMNS}) VALUES ({});",
        placeholders(21)
    );
    let cancellation = lesson.cancellation.as_ref();

    sqlx::query::<Sqlite>(&sql)
        .bind(lesson.id.to_string())
        .bind(lesson.instructor_id.to_string())
        .bind(lesson.learner_id.to_string())
        .bind(lesson.start_ms)
        .bind(lesson.end_ms)
        .bind(lesson.duration_minutes as i64)
        .bind(&lesson.lesson_type)
        .bind(lesson.status.as_str())
        .bind(lesson.payment_status.as_str())
        .bind(lesson.price)
        .bind(lesson.funding.as_str())
        .bind(lesson.package.map(|p| p.package_id.to_string()))
        .bind(lesson.package.map(|p| p.ordinal as i64))
        .bind(lesson.package.map(|p| p.total as i64))
        .bind(lesson.pickup.as_deref())
        .bind(lesson.notes.as_deref())
        .bind(cancellation.map(|c| c.cancelled_by.as_str()))
        .bind(cancellation.and_then(|c| c.reason.as_deref()))
        .bind(cancellation.map(|c| c.cancelled_ms))
        .bind(lesson.created_ms)
        .bind(lesson.updated_ms)
        .execute(conn)
        .await?;
    Ok(())
}

fn collect_lessons(rows: &[SqliteRow]) -> Result<Vec<Lesson>> {
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        match row_to_lesson(r) {
            Ok(l) => out.push(l),
            Err(e) => {
                // poison-row resilience: skip but don't fail the listing
                tracing::warn!(error = %e, "skipping malformed lesson row");
            }
        }
    }
    Ok(out)
}

fn row_to_lesson(r: &SqliteRow) -> Result<Lesson> {
    let package_id = parse_opt_uuid(r.try_get("package_id")?, "package_id")?;
    let package = match package_id {
        Some(package_id) => Some(PackageSlot {
            package_id,
            ordinal: i64_to_u32(r.try_get("package_ordinal")?, "package_ordinal")?,
            total: i64_to_u32(r.try_get("package_total")?, "package_total")?,
        }),
        None => None,
    };

    let cancelled_by: Option<String> = r.try_get("cancelled_by")?;
    let cancellation = match cancelled_by {
        Some(by) => Some(Cancellation {
            cancelled_by: by.parse()?,
            reason: r.try_get("cancel_reason")?,
            cancelled_ms: r.try_get::<Option<i64>, _>("cancelled_ms")?.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Lesson {
        id: parse_uuid(&r.try_get::<String, _>("id")?, "lesson id")?,
        instructor_id: parse_uuid(&r.try_get::<String, _>("instructor_id")?, "instructor_id")?,
        learner_id: parse_uuid(&r.try_get::<String, _>("learner_id")?, "learner_id")?,
        start_ms: r.try_get("start_ms")?,
        end_ms: r.try_get("end_ms")?,
        duration_minutes: i64_to_u32(r.try_get("duration_minutes")?, "duration_minutes")?,
        lesson_type: r.try_get("lesson_type")?,
        status: r.try_get::<String, _>("status")?.parse()?,
        payment_status: r.try_get::<String, _>("payment_status")?.parse()?,
        price: r.try_get("price")?,
        funding: r.try_get::<String, _>("funding")?.parse()?,
        package,
        pickup: r.try_get("pickup")?,
        notes: r.try_get("notes")?,
        cancellation,
        created_ms: r.try_get("created_ms")?,
        updated_ms: r.try_get("updated_ms")?,
    })
}
