//! Grant lifecycle at the subscription boundary.

use chrono::{DateTime, Utc};
use tracing::info;

use tollgate_catalog::{
    CatalogStore, FeatureConfig, FeatureGrant, Subscription, SubscriptionStatus, UsageRecord,
};
use tollgate_core::{
    BillingError, BillingResult, CustomerId, GrantId, ProductId, SubscriptionId, UsageRecordId,
};

/// Mints and revokes feature grants as subscriptions come and go, and opens
/// the per-period usage records quota tracking depends on.
#[derive(Debug)]
pub struct GrantProvisioner<S> {
    store: S,
}

impl<S: CatalogStore> GrantProvisioner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Activate a subscription on a product version: insert the
    /// subscription row, grant every linked feature, and open a usage
    /// record for each quota feature with the limit copied from the link
    /// config. New subscriptions only ever attach to the current version.
    pub fn activate(
        &self,
        customer_id: CustomerId,
        product_id: ProductId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> BillingResult<Subscription> {
        let product = self
            .store
            .product(product_id)?
            .ok_or_else(|| BillingError::not_found(format!("product {product_id}")))?;
        if !product.is_current() {
            return Err(BillingError::conflict(format!(
                "product {product_id} is a superseded version; subscribe to the current one"
            )));
        }

        let subscription = Subscription {
            id: SubscriptionId::new(),
            customer_id,
            product_id,
            status: SubscriptionStatus::Active,
            current_period_start: period_start,
            current_period_end: period_end,
        };
        self.store.insert_subscription(subscription.clone())?;

        for link in self.store.links_for_product(product_id)? {
            self.store.insert_grant(FeatureGrant {
                id: GrantId::new(),
                customer_id,
                feature_id: link.feature_id,
                subscription_id: subscription.id,
                granted_at: period_start,
                revoked_at: None,
            })?;
            if let FeatureConfig::UsageQuota { limit } = link.config {
                self.store.insert_usage_record(UsageRecord {
                    id: UsageRecordId::new(),
                    customer_id,
                    feature_id: link.feature_id,
                    subscription_id: subscription.id,
                    period_start,
                    period_end,
                    consumed_units: 0,
                    limit_units: limit,
                })?;
            }
        }

        info!(
            subscription = %subscription.id,
            customer = %customer_id,
            product = %product_id,
            "subscription activated"
        );
        Ok(subscription)
    }

    /// Roll the subscription into its next billing period: advance the
    /// period bounds and open fresh usage records. Counters never carry
    /// over; limits are re-read from the product's link config so that an
    /// in-place limit change (made while the product had no subscribers on
    /// a fork path) takes effect at rollover.
    pub fn open_period(
        &self,
        subscription_id: SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> BillingResult<()> {
        let mut subscription = self
            .store
            .subscription(subscription_id)?
            .ok_or_else(|| {
                BillingError::not_found(format!("subscription {subscription_id}"))
            })?;
        if !subscription.is_active() {
            return Err(BillingError::conflict(format!(
                "subscription {subscription_id} is not active"
            )));
        }

        subscription.current_period_start = period_start;
        subscription.current_period_end = period_end;
        self.store.update_subscription(subscription.clone())?;

        for link in self.store.links_for_product(subscription.product_id)? {
            let FeatureConfig::UsageQuota { limit } = link.config else {
                continue;
            };
            let granted = self
                .store
                .grants_for_customer(subscription.customer_id)?
                .iter()
                .any(|g| {
                    g.subscription_id == subscription_id
                        && g.feature_id == link.feature_id
                        && !g.is_revoked()
                });
            if !granted {
                continue;
            }
            self.store.insert_usage_record(UsageRecord {
                id: UsageRecordId::new(),
                customer_id: subscription.customer_id,
                feature_id: link.feature_id,
                subscription_id,
                period_start,
                period_end,
                consumed_units: 0,
                limit_units: limit,
            })?;
        }
        Ok(())
    }

    /// End a subscription: mark it ended and revoke its grants. Usage
    /// records are left in place as history.
    pub fn end(&self, subscription_id: SubscriptionId, now: DateTime<Utc>) -> BillingResult<()> {
        let mut subscription = self
            .store
            .subscription(subscription_id)?
            .ok_or_else(|| {
                BillingError::not_found(format!("subscription {subscription_id}"))
            })?;
        subscription.status = SubscriptionStatus::Ended;
        self.store.update_subscription(subscription.clone())?;

        for mut grant in self.store.grants_for_customer(subscription.customer_id)? {
            if grant.subscription_id != subscription_id || grant.is_revoked() {
                continue;
            }
            grant.revoked_at = Some(now);
            self.store.update_grant(grant)?;
        }

        info!(subscription = %subscription_id, "subscription ended, grants revoked");
        Ok(())
    }
}
