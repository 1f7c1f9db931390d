//! Atomic quota consumption.
//!
//! `consumed_units` is only ever advanced through a compare-and-set on the
//! open usage record, so concurrent tracks serialize cleanly: a period
//! never ends up past its limit, no matter how many writers race.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use tollgate_catalog::{CatalogStore, FeatureType, UsageRecord};
use tollgate_core::{BillingError, BillingResult, CustomerId, UsageSnapshot};

/// Upper bound on compare-and-set attempts per track call. Each failed
/// attempt implies another track succeeded in between, so hitting the bound
/// under realistic contention means the quota is being consumed out from
/// under us anyway.
pub const MAX_CAS_ATTEMPTS: u32 = 16;

/// Result of a successful track call. Cached verbatim under the caller's
/// idempotency key and replayed for retransmissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackReceipt {
    pub consumed_units: u64,
    pub limit_units: Option<u64>,
    pub remaining_units: Option<u64>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Consumes units against the current billing period of a quota feature.
#[derive(Debug)]
pub struct UsageQuotaTracker<S> {
    store: S,
}

impl<S: CatalogStore> UsageQuotaTracker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume `units` of `feature_key` for `customer_id`.
    ///
    /// With an idempotency key, a retransmission within the retention
    /// window replays the original receipt without consuming again. A track
    /// that would overshoot the limit fails with `QuotaExceeded` and leaves
    /// the record untouched.
    pub fn track(
        &self,
        customer_id: CustomerId,
        feature_key: &str,
        units: u64,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> BillingResult<TrackReceipt> {
        if let Some(key) = idempotency_key {
            if let Some(cached) = self.store.idempotency_get(key, now)? {
                let receipt: TrackReceipt = serde_json::from_value(cached).map_err(|e| {
                    BillingError::storage(format!("corrupt idempotency payload for '{key}': {e}"))
                })?;
                return Ok(receipt);
            }
        }

        let record = self.resolve_record(customer_id, feature_key, now)?;
        let receipt = self.consume(record, units)?;

        if let Some(key) = idempotency_key {
            // Best-effort cache: the units are already consumed, so a cache
            // write failure must not turn the call into an error.
            match serde_json::to_value(&receipt) {
                Ok(payload) => {
                    if let Err(err) = self.store.idempotency_put(key, payload, now) {
                        warn!(key, error = %err, "failed to cache track receipt");
                    }
                }
                Err(err) => warn!(key, error = %err, "failed to serialize track receipt"),
            }
        }
        Ok(receipt)
    }

    /// Walk grant -> feature -> subscription -> open usage record.
    fn resolve_record(
        &self,
        customer_id: CustomerId,
        feature_key: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<UsageRecord> {
        for grant in self.store.grants_for_customer(customer_id)? {
            if grant.is_revoked() {
                continue;
            }
            let feature = self
                .store
                .feature(grant.feature_id)?
                .ok_or_else(|| {
                    BillingError::not_found(format!("feature {}", grant.feature_id))
                })?;
            if feature.name != feature_key {
                continue;
            }
            if feature.kind != FeatureType::UsageQuota {
                return Err(BillingError::validation(format!(
                    "feature '{feature_key}' is not a usage quota"
                )));
            }
            let subscription = self
                .store
                .subscription(grant.subscription_id)?
                .ok_or_else(|| {
                    BillingError::not_found(format!("subscription {}", grant.subscription_id))
                })?;
            if !subscription.is_active() {
                continue;
            }
            return self
                .store
                .current_usage(customer_id, feature.id, subscription.id, now)?
                .ok_or_else(|| {
                    BillingError::not_found(format!(
                        "open usage period for feature '{feature_key}'"
                    ))
                });
        }
        Err(BillingError::not_found(format!(
            "active grant for feature '{feature_key}'"
        )))
    }

    fn consume(&self, mut record: UsageRecord, units: u64) -> BillingResult<TrackReceipt> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let new_total = record.consumed_units.checked_add(units).ok_or_else(|| {
                BillingError::validation("usage increment overflows the counter")
            })?;
            if let Some(limit) = record.limit_units {
                if new_total > limit {
                    return Err(BillingError::QuotaExceeded(UsageSnapshot::exhausted(
                        record.consumed_units,
                        limit,
                        record.period_end,
                    )));
                }
            }

            if self
                .store
                .compare_and_set_consumed(record.id, record.consumed_units, new_total)?
            {
                return Ok(TrackReceipt {
                    consumed_units: new_total,
                    limit_units: record.limit_units,
                    remaining_units: record.limit_units.map(|l| l - new_total),
                    period_start: record.period_start,
                    period_end: record.period_end,
                });
            }

            // Lost the race; reload and re-check against the fresh total.
            record = self
                .store
                .usage_record(record.id)?
                .ok_or_else(|| BillingError::not_found("usage record"))?;
        }

        // Fail closed rather than consume on stale numbers.
        warn!(
            record = %record.id,
            attempts = MAX_CAS_ATTEMPTS,
            "usage CAS retry budget exhausted; rejecting track call"
        );
        match record.limit_units {
            Some(limit) => Err(BillingError::QuotaExceeded(UsageSnapshot::exhausted(
                record.consumed_units,
                limit,
                record.period_end,
            ))),
            None => Err(BillingError::conflict(
                "usage record contention exhausted retries",
            )),
        }
    }
}
