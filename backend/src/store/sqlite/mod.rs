//! SQLite-backed implementation of the repository seams.
//!
//! One struct implements every trait; each concern lives in its own file.
//! Row mapping and conversions stay next to the queries that need them.

mod availability;
mod directory;
mod ledger;
mod lessons;
mod payments;

use anyhow::Context;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::model::{Instructor, Learner, Package};
use crate::time::now_ms;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts an instructor with its lesson-type price table.
    pub async fn register_instructor(&self, instructor: &Instructor) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO instructors (id, name, email, hourly_rate, currency, created_ms)
VALUES (?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(instructor.id.to_string())
        .bind(&instructor.name)
        .bind(&instructor.email)
        .bind(instructor.hourly_rate)
        .bind(&instructor.currency)
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;

        for t in &instructor.lesson_types {
            sqlx::query(
                r#"
INSERT INTO lesson_types (instructor_id, name, price, duration_minutes)
VALUES (?, ?, ?, ?);
"#,
            )
            .bind(instructor.id.to_string())
            .bind(&t.name)
            .bind(t.price)
            .bind(t.duration_minutes as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn register_learner(&self, learner: &Learner) -> anyhow::Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"
INSERT INTO learners (id, name, email, balance, primary_instructor_id, created_ms, updated_ms)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(learner.id.to_string())
        .bind(&learner.name)
        .bind(&learner.email)
        .bind(learner.balance)
        .bind(learner.primary_instructor_id.map(|id| id.to_string()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn register_package(&self, package: &Package) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO packages
  (id, instructor_id, name, lesson_count, price, lesson_duration_minutes, lesson_type, active)
VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(package.id.to_string())
        .bind(package.instructor_id.to_string())
        .bind(&package.name)
        .bind(package.lesson_count as i64)
        .bind(package.price)
        .bind(package.lesson_duration_minutes as i64)
        .bind(&package.lesson_type)
        .bind(package.active as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/* =========================
Row conversions
========================= */

fn parse_uuid(raw: &str, column: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid {column}: {raw}"))
}

fn parse_opt_uuid(raw: Option<String>, column: &str) -> anyhow::Result<Option<Uuid>> {
    raw.map(|s| parse_uuid(&s, column)).transpose()
}

fn i64_to_u32(v: i64, column: &str) -> anyhow::Result<u32> {
    u32::try_from(v).with_context(|| format!("{column} out of range: {v}"))
}

/// `IN (?, ?, ...)` placeholder list for `n` binds.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_list_matches_bind_count() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn conversions_reject_garbage() {
        assert!(parse_uuid("nope", "id").is_err());
        assert!(i64_to_u32(-1, "lesson_count").is_err());
        assert_eq!(parse_opt_uuid(None, "id").unwrap(), None);
    }
}
