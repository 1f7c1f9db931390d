//! Read-only entitlement checks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use tollgate_catalog::{CatalogStore, Feature, FeatureGrant, FeatureType, Subscription};
use tollgate_core::{BillingError, BillingResult, CustomerId, UsageSnapshot};

/// Why access was granted or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    Granted,
    /// No grant links this customer to the feature at all.
    NoActiveSubscription,
    /// A grant exists but its subscription is not in an active state.
    SubscriptionNotActive,
    QuotaExceeded,
}

/// Outcome of one entitlement check. Denials are ordinary results, not
/// errors; errors are reserved for storage failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitlementResult {
    pub has_access: bool,
    pub reason: AccessReason,
    pub feature: Option<Feature>,
    /// Present for quota features when a usage record exists.
    pub usage: Option<UsageSnapshot>,
}

impl EntitlementResult {
    fn denied(reason: AccessReason) -> Self {
        Self {
            has_access: false,
            reason,
            feature: None,
            usage: None,
        }
    }
}

/// Answers entitlement questions from grants, subscriptions, and the
/// current usage period. Never writes.
#[derive(Debug)]
pub struct EntitlementResolver<S> {
    store: S,
}

impl<S: CatalogStore> EntitlementResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Does `customer_id` currently have `feature_key`?
    ///
    /// Resolution walks grant -> feature -> subscription, across every
    /// unrevoked grant for the feature: a customer who lapsed and
    /// resubscribed holds a stale grant alongside the live one, and access
    /// resolves through whichever grant has an active subscription. For
    /// quota features the current usage period is consulted: a consumed
    /// total at or past the limit denies access. A quota feature with no
    /// open usage record allows access; the gap is a provisioning defect
    /// and is logged, but customers are not locked out for it.
    pub fn check(
        &self,
        customer_id: CustomerId,
        feature_key: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<EntitlementResult> {
        let grants = self.matching_grants(customer_id, feature_key)?;
        if grants.is_empty() {
            return Ok(EntitlementResult::denied(AccessReason::NoActiveSubscription));
        }

        let mut live = None;
        for (grant, feature) in grants {
            if let Some(subscription) = self.active_subscription(&grant)? {
                live = Some((feature, subscription));
                break;
            }
        }
        let Some((feature, subscription)) = live else {
            return Ok(EntitlementResult::denied(AccessReason::SubscriptionNotActive));
        };

        if feature.kind != FeatureType::UsageQuota {
            return Ok(EntitlementResult {
                has_access: true,
                reason: AccessReason::Granted,
                feature: Some(feature),
                usage: None,
            });
        }

        let record = self.store.current_usage(
            customer_id,
            feature.id,
            subscription.id,
            now,
        )?;
        let Some(record) = record else {
            warn!(
                customer = %customer_id,
                feature = %feature_key,
                subscription = %subscription.id,
                "quota feature has no open usage period; allowing access"
            );
            return Ok(EntitlementResult {
                has_access: true,
                reason: AccessReason::Granted,
                feature: Some(feature),
                usage: None,
            });
        };

        let snapshot = UsageSnapshot {
            consumed_units: record.consumed_units,
            limit_units: record.limit_units,
            remaining_units: record.remaining_units(),
            resets_at: record.period_end,
        };
        let exhausted = record
            .limit_units
            .is_some_and(|limit| record.consumed_units >= limit);

        Ok(EntitlementResult {
            has_access: !exhausted,
            reason: if exhausted {
                AccessReason::QuotaExceeded
            } else {
                AccessReason::Granted
            },
            feature: Some(feature),
            usage: Some(snapshot),
        })
    }

    /// Every unrevoked grant whose feature matches `feature_key`, in grant
    /// order.
    fn matching_grants(
        &self,
        customer_id: CustomerId,
        feature_key: &str,
    ) -> BillingResult<Vec<(FeatureGrant, Feature)>> {
        let mut matches = Vec::new();
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
            if feature.name == feature_key {
                matches.push((grant, feature));
            }
        }
        Ok(matches)
    }

    fn active_subscription(&self, grant: &FeatureGrant) -> BillingResult<Option<Subscription>> {
        let subscription = self
            .store
            .subscription(grant.subscription_id)?
            .ok_or_else(|| {
                BillingError::not_found(format!("subscription {}", grant.subscription_id))
            })?;
        Ok(subscription.is_active().then_some(subscription))
    }
}
