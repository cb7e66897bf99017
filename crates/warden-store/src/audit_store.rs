//! Adaptation run audit records over the `adaptation_runs` table.
//!
//! Each nightly run writes exactly one immutable row per organization.
//! The payload is the full [`AdaptationResult`] as JSONB so operators
//! and alerting can inspect adjustments without a schema migration per
//! field.

use sqlx::PgPool;

use warden_types::AdaptationResult;

use crate::error::StoreError;
use crate::postgres::PostgresPool;
use crate::AdaptationAudit;

/// Audit record operations backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgAdaptationAudit {
    pool: PgPool,
}

impl PgAdaptationAudit {
    /// Create an audit sink bound to a connection pool.
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }
}

impl AdaptationAudit for PgAdaptationAudit {
    async fn record(&self, result: &AdaptationResult) -> Result<(), StoreError> {
        let payload = serde_json::to_value(result)?;

        sqlx::query(
            r"INSERT INTO adaptation_runs (run_id, org_id, payload, completed_at)
              VALUES ($1, $2, $3, $4)",
        )
        .bind(result.run_id.into_inner())
        .bind(result.org_id.into_inner())
        .bind(payload)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            run_id = %result.run_id,
            org_id = %result.org_id,
            adjustments = result.alpha_adjustments.len(),
            disablements = result.disablements.len(),
            enablements = result.enablements.len(),
            "Recorded adaptation run"
        );
        Ok(())
    }
}
