//! The immutable usage ledger entry: one record per completed LLM call.
//!
//! A [`UsageRecord`] is created once per completed (or failed) call
//! attempt, appended to the durable ledger, and never mutated or deleted
//! by this engine (retention is an external concern). Records are
//! constructed through a validating constructor so invalid rows -- a
//! negative cost, an empty provider name -- are rejected at the call
//! boundary rather than silently coerced.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{OrgId, UsageRecordId};

// ---------------------------------------------------------------------------
// Task category
// ---------------------------------------------------------------------------

/// The kind of work a usage record represents.
///
/// A closed enum rather than a free-form string so the store schema and
/// the in-memory model cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Free-form text completion or chat.
    Completion,
    /// Vector embedding generation.
    Embedding,
    /// Label/category assignment.
    Classification,
    /// Document or thread summarization.
    Summarization,
    /// Structured data extraction.
    Extraction,
    /// Anything that does not fit the categories above.
    Other,
}

impl TaskCategory {
    /// Return the database string representation of this category.
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Embedding => "embedding",
            Self::Classification => "classification",
            Self::Summarization => "summarization",
            Self::Extraction => "extraction",
            Self::Other => "other",
        }
    }

    /// Parse a database string back into a category.
    ///
    /// Unknown strings map to [`TaskCategory::Other`] so historical rows
    /// written by a newer schema still decode.
    pub fn from_db_str(value: &str) -> Self {
        match value {
            "completion" => Self::Completion,
            "embedding" => Self::Embedding,
            "classification" => Self::Classification,
            "summarization" => Self::Summarization,
            "extraction" => Self::Extraction,
            _ => Self::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Errors that can occur when constructing a [`UsageRecord`].
#[derive(Debug, thiserror::Error)]
pub enum UsageRecordError {
    /// Estimated cost must not be negative.
    #[error("usage record cost must not be negative, got {cost}")]
    NegativeCost {
        /// The invalid cost value.
        cost: Decimal,
    },

    /// Provider name must be non-empty.
    #[error("usage record provider must be non-empty")]
    EmptyProvider,

    /// Model name must be non-empty.
    #[error("usage record model must be non-empty")]
    EmptyModel,
}

// ---------------------------------------------------------------------------
// Usage record
// ---------------------------------------------------------------------------

/// Parameters for constructing a [`UsageRecord`].
///
/// Packs the many arguments of a record into a single struct to satisfy
/// clippy's argument count limit and improve call-site readability.
#[derive(Debug, Clone)]
pub struct UsageRecordParams {
    /// The organization that issued the call.
    pub org_id: OrgId,
    /// LLM provider name (e.g. "openai", "anthropic").
    pub provider: String,
    /// Model identifier within the provider.
    pub model: String,
    /// The kind of work performed.
    pub task_category: TaskCategory,
    /// Input (prompt) token count.
    pub input_tokens: u64,
    /// Output (completion) token count.
    pub output_tokens: u64,
    /// Estimated cost of the call in currency units.
    pub estimated_cost: Decimal,
    /// Wall-clock latency of the call in milliseconds.
    pub latency_ms: u64,
    /// Whether the call succeeded.
    pub success: bool,
    /// Error message for failed calls.
    pub error_message: Option<String>,
}

/// An immutable ledger entry for one completed LLM call attempt.
///
/// Created once, appended to the ledger, never mutated. The `success`
/// flag and `latency_ms` feed the telemetry tracker; `estimated_cost`
/// feeds the budget admission controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique record identifier.
    pub id: UsageRecordId,
    /// The organization that issued the call.
    pub org_id: OrgId,
    /// LLM provider name.
    pub provider: String,
    /// Model identifier within the provider.
    pub model: String,
    /// The kind of work performed.
    pub task_category: TaskCategory,
    /// Input (prompt) token count.
    pub input_tokens: u64,
    /// Output (completion) token count.
    pub output_tokens: u64,
    /// Estimated cost of the call in currency units.
    pub estimated_cost: Decimal,
    /// Wall-clock latency of the call in milliseconds.
    pub latency_ms: u64,
    /// Whether the call succeeded.
    pub success: bool,
    /// Error message for failed calls.
    pub error_message: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Build a validated usage record with a fresh ID and timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`UsageRecordError`] if the cost is negative or the
    /// provider/model name is empty.
    pub fn new(params: UsageRecordParams) -> Result<Self, UsageRecordError> {
        if params.estimated_cost < Decimal::ZERO {
            return Err(UsageRecordError::NegativeCost {
                cost: params.estimated_cost,
            });
        }
        if params.provider.trim().is_empty() {
            return Err(UsageRecordError::EmptyProvider);
        }
        if params.model.trim().is_empty() {
            return Err(UsageRecordError::EmptyModel);
        }

        Ok(Self {
            id: UsageRecordId::new(),
            org_id: params.org_id,
            provider: params.provider,
            model: params.model,
            task_category: params.task_category,
            input_tokens: params.input_tokens,
            output_tokens: params.output_tokens,
            estimated_cost: params.estimated_cost,
            latency_ms: params.latency_ms,
            success: params.success,
            error_message: params.error_message,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> UsageRecordParams {
        UsageRecordParams {
            org_id: OrgId::new(),
            provider: "acme".to_owned(),
            model: "acme-large".to_owned(),
            task_category: TaskCategory::Completion,
            input_tokens: 1200,
            output_tokens: 340,
            estimated_cost: Decimal::new(42, 3), // $0.042
            latency_ms: 850,
            success: true,
            error_message: None,
        }
    }

    #[test]
    fn valid_record_is_accepted() {
        let record = UsageRecord::new(params());
        assert!(record.is_ok());
    }

    #[test]
    fn negative_cost_is_rejected() {
        let mut p = params();
        p.estimated_cost = Decimal::new(-1, 2);
        let record = UsageRecord::new(p);
        assert!(matches!(
            record,
            Err(UsageRecordError::NegativeCost { .. })
        ));
    }

    #[test]
    fn empty_provider_is_rejected() {
        let mut p = params();
        p.provider = "  ".to_owned();
        assert!(matches!(
            UsageRecord::new(p),
            Err(UsageRecordError::EmptyProvider)
        ));
    }

    #[test]
    fn empty_model_is_rejected() {
        let mut p = params();
        p.model = String::new();
        assert!(matches!(
            UsageRecord::new(p),
            Err(UsageRecordError::EmptyModel)
        ));
    }

    #[test]
    fn task_category_db_roundtrip() {
        for category in [
            TaskCategory::Completion,
            TaskCategory::Embedding,
            TaskCategory::Classification,
            TaskCategory::Summarization,
            TaskCategory::Extraction,
            TaskCategory::Other,
        ] {
            assert_eq!(TaskCategory::from_db_str(category.as_db_str()), category);
        }
    }

    #[test]
    fn unknown_category_decodes_as_other() {
        assert_eq!(
            TaskCategory::from_db_str("adversarial_probing"),
            TaskCategory::Other
        );
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = UsageRecord::new(params()).ok();
        assert!(record.is_some());
        let json = record
            .as_ref()
            .and_then(|r| serde_json::to_string(r).ok())
            .unwrap_or_default();
        let restored: Result<UsageRecord, _> = serde_json::from_str(&json);
        assert!(restored.is_ok());
    }
}
