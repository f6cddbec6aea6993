//! Balance writes. Each is a single statement so the predicate and the
//! update are evaluated atomically by SQLite; `RETURNING` hands back the
//! post-write balance without a second read.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

use super::SqliteStore;
use crate::model::Account;
use crate::store::repository::LedgerRepository;

#[async_trait]
impl LedgerRepository for SqliteStore {
    async fn credit(&self, account: &Account, amount: i64, now_ms: i64) -> Result<Option<i64>> {
        self.apply_delta(account, amount, now_ms).await
    }

    async fn debit_if_sufficient(
        &self,
        account: &Account,
        amount: i64,
        now_ms: i64,
    ) -> Result<Option<i64>> {
        let row = match account {
            Account::Learner(id) => {
                sqlx::query(
                    r#"
UPDATE learners
SET balance = balance - ?, updated_ms = ?
WHERE id = ? AND balance >= ?
RETURNING balance;
"#,
                )
                .bind(amount)
                .bind(now_ms)
                .bind(id.to_string())
                .bind(amount)
                .fetch_optional(&self.pool)
                .await?
            }
            Account::Relationship {
                learner_id,
                instructor_id,
            } => {
                sqlx::query(
                    r#"
UPDATE learner_instructors
SET balance = balance - ?
WHERE learner_id = ? AND instructor_id = ? AND balance >= ?
RETURNING balance;
"#,
                )
                .bind(amount)
                .bind(learner_id.to_string())
                .bind(instructor_id.to_string())
                .bind(amount)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(row.map(|r| r.try_get("balance")).transpose()?)
    }

    async fn charge(&self, account: &Account, amount: i64, now_ms: i64) -> Result<Option<i64>> {
        self.apply_delta(account, -amount, now_ms).await
    }

    async fn balance(&self, account: &Account) -> Result<Option<i64>> {
        let row = match account {
            Account::Learner(id) => {
                sqlx::query("SELECT balance FROM learners WHERE id = ?;")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await?
            }
            Account::Relationship {
                learner_id,
                instructor_id,
            } => {
                sqlx::query(
                    "SELECT balance FROM learner_instructors WHERE learner_id = ? AND instructor_id = ?;",
                )
                .bind(learner_id.to_string())
                .bind(instructor_id.to_string())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(row.map(|r| r.try_get("balance")).transpose()?)
    }
}

impl SqliteStore {
    /// Unconditional `balance += delta`. Relationship rows are created on
    /// first write; learner rows must already exist.
    async fn apply_delta(&self, account: &Account, delta: i64, now_ms: i64) -> Result<Option<i64>> {
        let row = match account {
            Account::Learner(id) => {
                sqlx::query(
                    r#"
UPDATE learners
SET balance = balance + ?, updated_ms = ?
WHERE id = ?
RETURNING balance;
"#,
                )
                .bind(delta)
                .bind(now_ms)
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?
            }
            Account::Relationship {
                learner_id,
                instructor_id,
            } => {
                sqlx::query(
                    r#"
INSERT INTO learner_instructors (learner_id, instructor_id, lesson_count, balance)
VALUES (?, ?, 0, ?)
ON CONFLICT (learner_id, instructor_id) DO UPDATE SET
  balance = balance + excluded.balance
RETURNING balance;
"#,
                )
                .bind(learner_id.to_string())
                .bind(instructor_id.to_string())
                .bind(delta)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(row.map(|r| r.try_get("balance")).transpose()?)
    }
}
