//! Persistence layer for the Warden governance engine.
//!
//! `PostgreSQL` is the durable store for the usage ledger, organization
//! policies, and adaptation run audit records. In-memory implementations
//! of the same traits exist for tests and for embedding the engine
//! without a database.
//!
//! # Architecture
//!
//! ```text
//! Admission path                 Nightly adaptation
//!     |                               |
//!     +-- sum_cost / load ----+       +-- query / load / save
//!                             |       |
//!                         UsageLedger / PolicyStore / AdaptationAudit
//!                             |       |
//!                  PgUsageLedger etc. | MemoryLedger etc.
//!                      (PostgresPool) |   (RwLock, tests)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`usage_store`] -- durable usage ledger (append, sum, range query)
//! - [`policy_store`] -- organization policy persistence
//! - [`audit_store`] -- adaptation run audit records
//! - [`memory`] -- in-memory trait implementations
//! - [`error`] -- shared error types

pub mod audit_store;
pub mod error;
pub mod memory;
pub mod policy_store;
pub mod postgres;
pub mod usage_store;

// Re-export primary types for convenience.
pub use audit_store::PgAdaptationAudit;
pub use error::StoreError;
pub use memory::{MemoryAdaptationAudit, MemoryLedger, MemoryPolicyStore};
pub use policy_store::PgPolicyStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use usage_store::PgUsageLedger;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use warden_types::{AdaptationResult, OrgId, Policy, UsageRecord};

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// The append-only usage ledger consumed by the governance engine.
///
/// `sum_cost` must reflect every record committed before the query began;
/// records committed concurrently may or may not be included
/// (read-committed semantics are sufficient).
pub trait UsageLedger: Send + Sync {
    /// Append one completed-call record to the ledger.
    fn append(
        &self,
        record: &UsageRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Sum of estimated costs for an organization over one UTC day.
    fn sum_cost(
        &self,
        org_id: OrgId,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Decimal, StoreError>> + Send;

    /// All records for an organization in `[from, to)`, time ascending.
    fn query(
        &self,
        org_id: OrgId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<UsageRecord>, StoreError>> + Send;

    /// All records across organizations in `[from, to)`, time ascending.
    ///
    /// Used for baseline computation, which spans tenants: a provider's
    /// health is a platform-level property, not a per-org one.
    fn query_all(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<UsageRecord>, StoreError>> + Send;
}

/// Persistence for per-organization governance policies.
pub trait PolicyStore: Send + Sync {
    /// Load the policy for an organization.
    ///
    /// `Ok(None)` means no policy exists yet; callers treat that as
    /// system defaults, never as a failure.
    fn load(
        &self,
        org_id: OrgId,
    ) -> impl Future<Output = Result<Option<Policy>, StoreError>> + Send;

    /// Write (upsert) a policy. Last writer wins.
    fn save(
        &self,
        policy: &Policy,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Sink for immutable adaptation run audit records.
pub trait AdaptationAudit: Send + Sync {
    /// Record one completed adaptation run.
    fn record(
        &self,
        result: &AdaptationResult,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
