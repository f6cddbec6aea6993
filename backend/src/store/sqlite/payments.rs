use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{SqliteStore, parse_opt_uuid, parse_uuid};
use crate::model::{Payment, PaymentStatus};
use crate::store::repository::PaymentRepository;

const PAYMENT_SELECT: &str = r#"
SELECT
  id, learner_id, instructor_id, package_id, kind, amount, credited, currency, status,
  gateway_ref, created_ms, paid_ms, refunded_ms,
  (SELECT GROUP_CONCAT(pl.lesson_id) FROM payment_lessons pl WHERE pl.payment_id = payments.id)
    AS lesson_ids
FROM payments
"#;

#[async_trait]
impl PaymentRepository for SqliteStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO payments
  (id, learner_id, instructor_id, package_id, kind, amount, credited, currency, status,
   gateway_ref, created_ms, paid_ms, refunded_ms, updated_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(payment.id.to_string())
        .bind(payment.learner_id.to_string())
        .bind(payment.instructor_id.map(|id| id.to_string()))
        .bind(payment.package_id.map(|id| id.to_string()))
        .bind(payment.kind.as_str())
        .bind(payment.amount)
        .bind(payment.credited)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.gateway_ref.as_deref())
        .bind(payment.created_ms)
        .bind(payment.paid_ms)
        .bind(payment.refunded_ms)
        .bind(payment.created_ms)
        .execute(&mut *tx)
        .await?;

        for lesson_id in &payment.lesson_ids {
            sqlx::query("INSERT INTO payment_lessons (payment_id, lesson_id) VALUES (?, ?);")
                .bind(payment.id.to_string())
                .bind(lesson_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_payment(&self, id: &Uuid) -> Result<Option<Payment>> {
        let sql = format!("{PAYMENT_SELECT} WHERE id = ?;");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn find_by_gateway_ref(&self, gateway_ref: &str) -> Result<Option<Payment>> {
        let sql = format!("{PAYMENT_SELECT} WHERE gateway_ref = ?;");
        let row = sqlx::query(&sql)
            .bind(gateway_ref)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn attach_gateway_ref(&self, id: &Uuid, gateway_ref: &str) -> Result<bool> {
        let res = sqlx::query(
            r#"
UPDATE payments
SET gateway_ref = ?, updated_ms = ?
WHERE id = ? AND gateway_ref IS NULL;
"#,
        )
        .bind(gateway_ref)
        .bind(crate::time::now_ms())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn claim_success(&self, id: &Uuid, now_ms: i64) -> Result<bool> {
        self.swap_status(
            id,
            PaymentStatus::Pending,
            PaymentStatus::Succeeded,
            Stamp::Set("paid_ms"),
            now_ms,
        )
        .await
    }

    async fn record_credit(&self, id: &Uuid, credited: i64, now_ms: i64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE payments SET credited = ?, updated_ms = ? WHERE id = ? AND status = ?;",
        )
        .bind(credited)
        .bind(now_ms)
        .bind(id.to_string())
        .bind(PaymentStatus::Succeeded.as_str())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn revert_claim(&self, id: &Uuid, now_ms: i64) -> Result<bool> {
        let res = sqlx::query(
            r#"
UPDATE payments
SET status = ?, paid_ms = NULL, credited = 0, updated_ms = ?
WHERE id = ? AND status = ?;
"#,
        )
        .bind(PaymentStatus::Pending.as_str())
        .bind(now_ms)
        .bind(id.to_string())
        .bind(PaymentStatus::Succeeded.as_str())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: &Uuid, now_ms: i64) -> Result<bool> {
        self.swap_status(
            id,
            PaymentStatus::Pending,
            PaymentStatus::Failed,
            Stamp::None,
            now_ms,
        )
        .await
    }

    async fn mark_cancelled(&self, id: &Uuid, now_ms: i64) -> Result<bool> {
        self.swap_status(
            id,
            PaymentStatus::Pending,
            PaymentStatus::Cancelled,
            Stamp::None,
            now_ms,
        )
        .await
    }

    async fn claim_refund(&self, id: &Uuid, now_ms: i64) -> Result<bool> {
        self.swap_status(
            id,
            PaymentStatus::Succeeded,
            PaymentStatus::Refunded,
            Stamp::Set("refunded_ms"),
            now_ms,
        )
        .await
    }

    async fn revert_refund(&self, id: &Uuid, now_ms: i64) -> Result<bool> {
        self.swap_status(
            id,
            PaymentStatus::Refunded,
            PaymentStatus::Succeeded,
            Stamp::Clear("refunded_ms"),
            now_ms,
        )
        .await
    }

    async fn payments_for_learner(&self, learner_id: &Uuid) -> Result<Vec<Payment>> {
        let sql = format!("{PAYMENT_SELECT} WHERE learner_id = ? ORDER BY created_ms DESC;");
        let rows = sqlx::query(&sql)
            .bind(learner_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            match row_to_payment(r) {
                Ok(p) => out.push(p),
                Err(e) => tracing::warn!(error = %e, "skipping malformed payment row"),
            }
        }
        Ok(out)
    }
}

/// Timestamp column touched alongside a status swap.
#[derive(Clone, Copy)]
enum Stamp {
    None,
    Set(&'static str),
    Clear(&'static str),
}

impl SqliteStore {
    /// `from -> to` compare-and-swap; `updated_ms` is always refreshed.
    async fn swap_status(
        &self,
        id: &Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        stamp: Stamp,
        now_ms: i64,
    ) -> Result<bool> {
        let extra = match stamp {
            Stamp::None => String::new(),
            Stamp::Set(column) => format!(", {column} = ?"),
            Stamp::Clear(column) => format!(", {column} = NULL"),
        };
        let sql =
            format!("UPDATE payments SET status = ?, updated_ms = ?{extra} WHERE id = ? AND status = ?;");

        let mut q = sqlx::query(&sql).bind(to.as_str()).bind(now_ms);
        if matches!(stamp, Stamp::Set(_)) {
            q = q.bind(now_ms);
        }
        let res = q
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() == 1)
    }
}

fn row_to_payment(r: &SqliteRow) -> Result<Payment> {
    let lesson_ids = r
        .try_get::<Option<String>, _>("lesson_ids")?
        .map(|joined| {
            joined
                .split(',')
                .map(|id| parse_uuid(id, "lesson_id"))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    Ok(Payment {
        id: parse_uuid(&r.try_get::<String, _>("id")?, "payment id")?,
        learner_id: parse_uuid(&r.try_get::<String, _>("learner_id")?, "learner_id")?,
        instructor_id: parse_opt_uuid(r.try_get("instructor_id")?, "instructor_id")?,
        lesson_ids,
        package_id: parse_opt_uuid(r.try_get("package_id")?, "package_id")?,
        kind: r.try_get::<String, _>("kind")?.parse()?,
        amount: r.try_get("amount")?,
        credited: r.try_get("credited")?,
        currency: r.try_get("currency")?,
        status: r.try_get::<String, _>("status")?.parse()?,
        gateway_ref: r.try_get("gateway_ref")?,
        created_ms: r.try_get("created_ms")?,
        paid_ms: r.try_get("paid_ms")?,
        refunded_ms: r.try_get("refunded_ms")?,
    })
}
