//! Billing error model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the engine.
pub type BillingResult<T> = Result<T, BillingError>;

/// Point-in-time view of one quota, attached to entitlement results and
/// carried verbatim by `QuotaExceeded` errors.
///
/// `limit_units = None` means the quota is unlimited for the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub consumed_units: u64,
    pub limit_units: Option<u64>,
    pub remaining_units: Option<u64>,
    pub resets_at: DateTime<Utc>,
}

impl UsageSnapshot {
    /// Snapshot for a rejected track call: remaining is pinned to zero.
    pub fn exhausted(consumed_units: u64, limit_units: u64, resets_at: DateTime<Utc>) -> Self {
        Self {
            consumed_units,
            limit_units: Some(limit_units),
            remaining_units: Some(0),
            resets_at,
        }
    }
}

/// Engine-level error.
///
/// Quota and usage-tracking failures must reach the caller verbatim (they
/// govern billing accuracy), so `QuotaExceeded` carries the full usage
/// snapshot rather than a message. Processor mirroring failures are recorded
/// as sync events and normally never surface through this enum.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BillingError {
    /// A value or change set failed validation (e.g. unknown feature id).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A requested entity was not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A conflict occurred (e.g. concurrent fork on the same lineage).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Business-rule rejection: the tracked units would overshoot the limit.
    #[error("quota exceeded: {} of {:?} units consumed", .0.consumed_units, .0.limit_units)]
    QuotaExceeded(UsageSnapshot),

    /// Processor mirroring failed. Mirroring runs after the local commit
    /// and its failures become sync events rather than returned errors, so
    /// the engine never constructs this variant itself; it is held for
    /// callers that drive the processor adapter directly (reconciliation
    /// tooling, backfills) and need the failure in the billing taxonomy.
    #[error("external sync failed: {0}")]
    ExternalSync(String),

    /// The catalog store itself failed (lock poisoned, backend down).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl BillingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound(entity.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
