//! In-memory implementations of the store traits.
//!
//! Used by unit and integration tests, and for embedding the engine
//! without a database. Each store can be switched into a failing mode to
//! exercise the engine's fail-open (admission) and log-and-skip
//! (adaptation) error paths without a real outage.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;

use warden_types::{AdaptationResult, OrgId, Policy, UsageRecord};

use crate::error::StoreError;
use crate::{AdaptationAudit, PolicyStore, UsageLedger};

/// Build the error returned by a store in failing mode.
fn unavailable(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} store is in failing mode"))
}

// ---------------------------------------------------------------------------
// Usage ledger
// ---------------------------------------------------------------------------

/// An in-memory, append-only usage ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<Vec<UsageRecord>>,
    failing: AtomicBool,
}

impl MemoryLedger {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle failing mode: every operation returns
    /// [`StoreError::Unavailable`] while enabled.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the ledger holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(&self, what: &str) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable(what));
        }
        Ok(())
    }
}

impl UsageLedger for MemoryLedger {
    async fn append(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.guard("usage ledger")?;
        let mut records = self
            .records
            .write()
            .map_err(|_| unavailable("usage ledger"))?;
        records.push(record.clone());
        Ok(())
    }

    async fn sum_cost(&self, org_id: OrgId, day: NaiveDate) -> Result<Decimal, StoreError> {
        self.guard("usage ledger")?;
        let start = day.and_time(NaiveTime::MIN).and_utc();
        let end = start.checked_add_days(Days::new(1)).unwrap_or(start);

        let records = self
            .records
            .read()
            .map_err(|_| unavailable("usage ledger"))?;
        let total = records
            .iter()
            .filter(|r| r.org_id == org_id && r.created_at >= start && r.created_at < end)
            .fold(Decimal::ZERO, |acc, r| {
                acc.checked_add(r.estimated_cost).unwrap_or(acc)
            });
        Ok(total)
    }

    async fn query(
        &self,
        org_id: OrgId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        self.guard("usage ledger")?;
        let records = self
            .records
            .read()
            .map_err(|_| unavailable("usage ledger"))?;
        let mut matched: Vec<UsageRecord> = records
            .iter()
            .filter(|r| r.org_id == org_id && r.created_at >= from && r.created_at < to)
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);
        Ok(matched)
    }

    async fn query_all(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        self.guard("usage ledger")?;
        let records = self
            .records
            .read()
            .map_err(|_| unavailable("usage ledger"))?;
        let mut matched: Vec<UsageRecord> = records
            .iter()
            .filter(|r| r.created_at >= from && r.created_at < to)
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);
        Ok(matched)
    }
}

// ---------------------------------------------------------------------------
// Policy store
// ---------------------------------------------------------------------------

/// An in-memory policy store keyed by organization.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    policies: RwLock<BTreeMap<OrgId, Policy>>,
    failing: AtomicBool,
    save_failing: AtomicBool,
}

impl MemoryPolicyStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle failing mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Toggle a write-only outage: `load` keeps working while `save`
    /// returns [`StoreError::Unavailable`]. Models a store that is
    /// reachable but cannot commit.
    pub fn set_save_failing(&self, failing: bool) {
        self.save_failing.store(failing, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable("policy"));
        }
        Ok(())
    }
}

impl PolicyStore for MemoryPolicyStore {
    async fn load(&self, org_id: OrgId) -> Result<Option<Policy>, StoreError> {
        self.guard()?;
        let policies = self.policies.read().map_err(|_| unavailable("policy"))?;
        Ok(policies.get(&org_id).cloned())
    }

    async fn save(&self, policy: &Policy) -> Result<(), StoreError> {
        self.guard()?;
        if self.save_failing.load(Ordering::SeqCst) {
            return Err(unavailable("policy"));
        }
        let mut policies = self.policies.write().map_err(|_| unavailable("policy"))?;
        policies.insert(policy.org_id, policy.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Adaptation audit
// ---------------------------------------------------------------------------

/// An in-memory adaptation audit sink.
#[derive(Debug, Default)]
pub struct MemoryAdaptationAudit {
    runs: RwLock<Vec<AdaptationResult>>,
    failing: AtomicBool,
}

impl MemoryAdaptationAudit {
    /// Create a new empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle failing mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of all recorded runs, oldest first.
    pub fn runs(&self) -> Vec<AdaptationResult> {
        self.runs.read().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AdaptationAudit for MemoryAdaptationAudit {
    async fn record(&self, result: &AdaptationResult) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable("adaptation audit"));
        }
        let mut runs = self
            .runs
            .write()
            .map_err(|_| unavailable("adaptation audit"))?;
        runs.push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use warden_types::{TaskCategory, UsageRecordId};

    fn record(org_id: OrgId, cost: Decimal) -> UsageRecord {
        UsageRecord {
            id: UsageRecordId::new(),
            org_id,
            provider: "acme".to_owned(),
            model: "acme-large".to_owned(),
            task_category: TaskCategory::Completion,
            input_tokens: 100,
            output_tokens: 50,
            estimated_cost: cost,
            latency_ms: 400,
            success: true,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sum_cost_counts_only_today_and_org() {
        let ledger = MemoryLedger::new();
        let org = OrgId::new();
        let other = OrgId::new();

        ledger.append(&record(org, Decimal::new(100, 2))).await.ok();
        ledger.append(&record(org, Decimal::new(250, 2))).await.ok();
        ledger.append(&record(other, Decimal::new(900, 2))).await.ok();

        let today = Utc::now().date_naive();
        let total = ledger.sum_cost(org, today).await.unwrap_or(Decimal::ZERO);
        assert_eq!(total, Decimal::new(350, 2));
    }

    #[tokio::test]
    async fn query_is_time_ascending() {
        let ledger = MemoryLedger::new();
        let org = OrgId::new();
        for cents in [10, 20, 30] {
            ledger.append(&record(org, Decimal::new(cents, 2))).await.ok();
        }

        let now = Utc::now();
        let from = now.checked_sub_signed(chrono::Duration::hours(1)).unwrap_or(now);
        let to = now.checked_add_signed(chrono::Duration::hours(1)).unwrap_or(now);
        let rows = ledger.query(org, from, to).await.unwrap_or_default();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| match w {
            [a, b] => a.created_at <= b.created_at,
            _ => true,
        }));
    }

    #[tokio::test]
    async fn failing_mode_returns_unavailable() {
        let ledger = MemoryLedger::new();
        ledger.set_failing(true);
        let result = ledger.sum_cost(OrgId::new(), Utc::now().date_naive()).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn policy_store_roundtrip() {
        let store = MemoryPolicyStore::new();
        let org = OrgId::new();
        assert!(store.load(org).await.unwrap_or(None).is_none());

        let policy = Policy::with_defaults(org);
        store.save(&policy).await.ok();
        let loaded = store.load(org).await.unwrap_or(None);
        assert_eq!(loaded.as_ref().map(|p| p.org_id), Some(org));
    }

    #[tokio::test]
    async fn save_failing_mode_leaves_load_working() {
        let store = MemoryPolicyStore::new();
        let org = OrgId::new();
        store.save(&Policy::with_defaults(org)).await.ok();
        store.set_save_failing(true);

        let result = store.save(&Policy::with_defaults(org)).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.load(org).await.unwrap_or(None).is_some());
    }

    #[tokio::test]
    async fn audit_records_accumulate() {
        let audit = MemoryAdaptationAudit::new();
        let result = AdaptationResult::begin(OrgId::new()).finalize();
        audit.record(&result).await.ok();
        assert_eq!(audit.runs().len(), 1);
    }
}
