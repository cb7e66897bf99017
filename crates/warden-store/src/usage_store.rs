//! Durable usage ledger over the `usage_ledger` table.
//!
//! Append-only: rows are inserted once per completed call attempt and
//! never updated or deleted by this engine. The admission path depends
//! on `sum_cost`, so that query is an indexed single-aggregate read.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use warden_types::{OrgId, TaskCategory, UsageRecord, UsageRecordId};

use crate::error::StoreError;
use crate::postgres::PostgresPool;
use crate::UsageLedger;

/// Usage ledger operations backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgUsageLedger {
    pool: PgPool,
}

impl PgUsageLedger {
    /// Create a ledger bound to a connection pool.
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }
}

impl UsageLedger for PgUsageLedger {
    async fn append(&self, record: &UsageRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO usage_ledger (id, org_id, provider, model, task_category, input_tokens, output_tokens, estimated_cost, latency_ms, success, error_message, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(record.id.into_inner())
        .bind(record.org_id.into_inner())
        .bind(&record.provider)
        .bind(&record.model)
        .bind(record.task_category.as_db_str())
        .bind(i64::try_from(record.input_tokens).unwrap_or(i64::MAX))
        .bind(i64::try_from(record.output_tokens).unwrap_or(i64::MAX))
        .bind(record.estimated_cost)
        .bind(i64::try_from(record.latency_ms).unwrap_or(i64::MAX))
        .bind(record.success)
        .bind(&record.error_message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            org_id = %record.org_id,
            provider = %record.provider,
            model = %record.model,
            cost = %record.estimated_cost,
            "Appended usage record"
        );
        Ok(())
    }

    async fn sum_cost(&self, org_id: OrgId, day: NaiveDate) -> Result<Decimal, StoreError> {
        let (start, end) = day_bounds(day);
        let total = sqlx::query_scalar::<_, Decimal>(
            r"SELECT COALESCE(SUM(estimated_cost), 0)
              FROM usage_ledger
              WHERE org_id = $1 AND created_at >= $2 AND created_at < $3",
        )
        .bind(org_id.into_inner())
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn query(
        &self,
        org_id: OrgId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        let rows = sqlx::query_as::<_, UsageRow>(
            r"SELECT id, org_id, provider, model, task_category, input_tokens, output_tokens, estimated_cost, latency_ms, success, error_message, created_at
              FROM usage_ledger
              WHERE org_id = $1 AND created_at >= $2 AND created_at < $3
              ORDER BY created_at",
        )
        .bind(org_id.into_inner())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UsageRow::into_record).collect())
    }

    async fn query_all(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        let rows = sqlx::query_as::<_, UsageRow>(
            r"SELECT id, org_id, provider, model, task_category, input_tokens, output_tokens, estimated_cost, latency_ms, success, error_message, created_at
              FROM usage_ledger
              WHERE created_at >= $1 AND created_at < $2
              ORDER BY created_at",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UsageRow::into_record).collect())
    }
}

/// UTC day bounds `[00:00 of day, 00:00 of next day)`.
fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    let end = start.checked_add_days(Days::new(1)).unwrap_or(start);
    (start, end)
}

/// A row from the `usage_ledger` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct UsageRow {
    id: Uuid,
    org_id: Uuid,
    provider: String,
    model: String,
    task_category: String,
    input_tokens: i64,
    output_tokens: i64,
    estimated_cost: Decimal,
    latency_ms: i64,
    success: bool,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl UsageRow {
    /// Decode the row into the validated in-memory model.
    fn into_record(self) -> UsageRecord {
        UsageRecord {
            id: UsageRecordId::from(self.id),
            org_id: OrgId::from(self.org_id),
            provider: self.provider,
            model: self.model,
            task_category: TaskCategory::from_db_str(&self.task_category),
            input_tokens: u64::try_from(self.input_tokens).unwrap_or(0),
            output_tokens: u64::try_from(self.output_tokens).unwrap_or(0),
            estimated_cost: self.estimated_cost,
            latency_ms: u64::try_from(self.latency_ms).unwrap_or(0),
            success: self.success,
            error_message: self.error_message,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_bounds_cover_exactly_one_day() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap_or_default();
        let (start, end) = day_bounds(day);
        assert_eq!(start.to_rfc3339(), "2026-03-14T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2026-03-15T00:00:00+00:00");
    }
}
