//! Organization policy persistence over the `org_policies` table.
//!
//! Provider sets and smoothing bounds are stored as JSONB so the schema
//! does not need to change when a provider joins or leaves the platform.
//! Writes are upserts with last-writer-wins semantics: the adaptation
//! loop and administrative edits do not coordinate, per the concurrency
//! model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use warden_types::{OrgId, Policy, SmoothingBounds};

use crate::error::StoreError;
use crate::postgres::PostgresPool;
use crate::PolicyStore;

/// Policy operations backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgPolicyStore {
    pool: PgPool,
}

impl PgPolicyStore {
    /// Create a policy store bound to a connection pool.
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }
}

impl PolicyStore for PgPolicyStore {
    async fn load(&self, org_id: OrgId) -> Result<Option<Policy>, StoreError> {
        let row = sqlx::query_as::<_, PolicyRow>(
            r"SELECT org_id, max_request_cost, max_daily_cost, allowed_providers, disabled_providers, smoothing, updated_at
              FROM org_policies
              WHERE org_id = $1",
        )
        .bind(org_id.into_inner())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PolicyRow::into_policy).transpose()
    }

    async fn save(&self, policy: &Policy) -> Result<(), StoreError> {
        let allowed = serde_json::to_value(&policy.allowed_providers)?;
        let disabled = serde_json::to_value(&policy.disabled_providers)?;
        let smoothing = serde_json::to_value(policy.smoothing)?;

        sqlx::query(
            r"INSERT INTO org_policies (org_id, max_request_cost, max_daily_cost, allowed_providers, disabled_providers, smoothing, updated_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7)
              ON CONFLICT (org_id) DO UPDATE SET
                  max_request_cost = EXCLUDED.max_request_cost,
                  max_daily_cost = EXCLUDED.max_daily_cost,
                  allowed_providers = EXCLUDED.allowed_providers,
                  disabled_providers = EXCLUDED.disabled_providers,
                  smoothing = EXCLUDED.smoothing,
                  updated_at = EXCLUDED.updated_at",
        )
        .bind(policy.org_id.into_inner())
        .bind(policy.max_request_cost)
        .bind(policy.max_daily_cost)
        .bind(allowed)
        .bind(disabled)
        .bind(smoothing)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(org_id = %policy.org_id, "Saved organization policy");
        Ok(())
    }
}

/// A row from the `org_policies` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct PolicyRow {
    org_id: Uuid,
    max_request_cost: Decimal,
    max_daily_cost: Decimal,
    allowed_providers: serde_json::Value,
    disabled_providers: serde_json::Value,
    smoothing: serde_json::Value,
    updated_at: DateTime<Utc>,
}

impl PolicyRow {
    /// Decode the row into the validated in-memory model.
    fn into_policy(self) -> Result<Policy, StoreError> {
        let allowed: BTreeSet<String> = serde_json::from_value(self.allowed_providers)?;
        let disabled: BTreeSet<String> = serde_json::from_value(self.disabled_providers)?;
        let smoothing: SmoothingBounds = serde_json::from_value(self.smoothing)?;

        Ok(Policy {
            org_id: OrgId::from(self.org_id),
            max_request_cost: self.max_request_cost,
            max_daily_cost: self.max_daily_cost,
            allowed_providers: allowed,
            disabled_providers: disabled,
            smoothing,
            updated_at: self.updated_at,
        })
    }
}
