//! Catalog store boundary.
//!
//! The engine assumes a shared relational store is the only synchronization
//! point: no in-process locks are needed as long as the store provides
//! row-level atomicity. Two operations carry the concurrency-critical
//! semantics and must be atomic in every implementation:
//!
//! - [`CatalogStore::commit_fork`] — persists a whole fork in one
//!   transaction, guarded by the uniqueness of (organization, name, version).
//!   Two concurrent forks of the same lineage must not both commit the same
//!   version number.
//! - [`CatalogStore::compare_and_set_consumed`] — conditional write of a
//!   usage counter against the previously observed value, so concurrent
//!   trackers cannot double-count or overshoot a limit.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use std::sync::Arc;

use tollgate_core::{
    BillingError, CustomerId, FeatureId, OrganizationId, PriceId, ProductId, SubscriptionId,
    UsageRecordId,
};

use crate::model::{
    Feature, FeatureGrant, Price, Product, ProductFeatureLink, Subscription, SyncEvent,
    UsageRecord,
};

/// How long a previously seen idempotency key keeps returning its cached
/// track result. Entries older than this are pruned on insert.
pub const IDEMPOTENCY_RETENTION: Duration = Duration::hours(24);

/// Catalog store operation error.
///
/// These are storage/concurrency failures, as opposed to the business-rule
/// failures in [`BillingError`]. `Conflict` is the signal the versioning
/// layer retries on.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness or concurrency guard rejected the write.
    #[error("store conflict: {0}")]
    Conflict(String),

    /// A referenced row does not exist.
    #[error("store row not found: {0}")]
    NotFound(String),

    /// The backend itself failed (lock poisoned, connection lost).
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for BillingError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => BillingError::Conflict(msg),
            StoreError::NotFound(msg) => BillingError::NotFound(msg),
            StoreError::Backend(msg) => BillingError::Storage(msg),
        }
    }
}

/// Everything a fork writes, persisted as one transaction.
///
/// `new_product` must carry a version number strictly greater than any
/// committed version of the lineage; `superseded` is the predecessor row
/// updated to point at its successor. Prices and links reference the new
/// product. If the version guard rejects the write, nothing is persisted.
#[derive(Debug, Clone)]
pub struct ForkWrite {
    pub new_product: Product,
    pub superseded: Product,
    pub prices: Vec<Price>,
    pub links: Vec<ProductFeatureLink>,
}

/// Durable catalog storage consumed by the engine.
///
/// Implementations must provide at least read-committed isolation and
/// row-level atomicity for the two guarded operations described in the
/// module docs.
pub trait CatalogStore: Send + Sync {
    // Products ------------------------------------------------------------

    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Insert a product row; rejects a duplicate (organization, name,
    /// version) with `Conflict`.
    fn insert_product(&self, product: Product) -> Result<(), StoreError>;

    fn update_product(&self, product: Product) -> Result<(), StoreError>;

    /// All versions of a (organization, name) lineage, ascending by version.
    fn lineage(&self, organization_id: OrganizationId, name: &str)
    -> Result<Vec<Product>, StoreError>;

    /// Persist a fork atomically (see module docs).
    fn commit_fork(&self, fork: ForkWrite) -> Result<(), StoreError>;

    fn active_subscription_count(&self, product_id: ProductId) -> Result<u64, StoreError>;

    // Prices ---------------------------------------------------------------

    fn prices_for_product(&self, product_id: ProductId) -> Result<Vec<Price>, StoreError>;

    fn insert_price(&self, price: Price) -> Result<(), StoreError>;

    fn update_price(&self, price: Price) -> Result<(), StoreError>;

    // Features -------------------------------------------------------------

    fn feature(&self, id: FeatureId) -> Result<Option<Feature>, StoreError>;

    fn feature_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<Feature>, StoreError>;

    fn insert_feature(&self, feature: Feature) -> Result<(), StoreError>;

    fn update_feature(&self, feature: Feature) -> Result<(), StoreError>;

    fn links_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<ProductFeatureLink>, StoreError>;

    fn upsert_link(&self, link: ProductFeatureLink) -> Result<(), StoreError>;

    fn remove_link(&self, product_id: ProductId, feature_id: FeatureId)
    -> Result<(), StoreError>;

    // Subscriptions & grants ------------------------------------------------

    fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, StoreError>;

    fn insert_subscription(&self, subscription: Subscription) -> Result<(), StoreError>;

    fn update_subscription(&self, subscription: Subscription) -> Result<(), StoreError>;

    fn grants_for_customer(&self, customer_id: CustomerId)
    -> Result<Vec<FeatureGrant>, StoreError>;

    fn insert_grant(&self, grant: FeatureGrant) -> Result<(), StoreError>;

    fn update_grant(&self, grant: FeatureGrant) -> Result<(), StoreError>;

    // Usage ----------------------------------------------------------------

    fn usage_record(&self, id: UsageRecordId) -> Result<Option<UsageRecord>, StoreError>;

    /// The open-period record for (customer, feature, subscription), i.e.
    /// the one with `period_end >= now`. At most one such row may exist.
    fn current_usage(
        &self,
        customer_id: CustomerId,
        feature_id: FeatureId,
        subscription_id: SubscriptionId,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, StoreError>;

    /// Insert a usage record; rejects a second open-period row for the same
    /// (customer, feature, subscription) with `Conflict`.
    fn insert_usage_record(&self, record: UsageRecord) -> Result<(), StoreError>;

    /// Atomically set `consumed_units = new` iff it still equals `expected`.
    /// Returns `false` (without writing) when another writer got there first.
    fn compare_and_set_consumed(
        &self,
        id: UsageRecordId,
        expected: u64,
        new: u64,
    ) -> Result<bool, StoreError>;

    // Idempotency ----------------------------------------------------------

    /// Cached result for a previously seen idempotency key, if it is still
    /// within [`IDEMPOTENCY_RETENTION`].
    fn idempotency_get(&self, key: &str, now: DateTime<Utc>)
    -> Result<Option<JsonValue>, StoreError>;

    fn idempotency_put(
        &self,
        key: &str,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // Sync audit -----------------------------------------------------------

    /// Append one mirroring-attempt record. Sync events are never mutated.
    fn append_sync_event(&self, event: SyncEvent) -> Result<(), StoreError>;

    fn sync_events(&self) -> Result<Vec<SyncEvent>, StoreError>;
}

impl<S> CatalogStore for Arc<S>
where
    S: CatalogStore + ?Sized,
{
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).product(id)
    }

    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        (**self).insert_product(product)
    }

    fn update_product(&self, product: Product) -> Result<(), StoreError> {
        (**self).update_product(product)
    }

    fn lineage(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Vec<Product>, StoreError> {
        (**self).lineage(organization_id, name)
    }

    fn commit_fork(&self, fork: ForkWrite) -> Result<(), StoreError> {
        (**self).commit_fork(fork)
    }

    fn active_subscription_count(&self, product_id: ProductId) -> Result<u64, StoreError> {
        (**self).active_subscription_count(product_id)
    }

    fn prices_for_product(&self, product_id: ProductId) -> Result<Vec<Price>, StoreError> {
        (**self).prices_for_product(product_id)
    }

    fn insert_price(&self, price: Price) -> Result<(), StoreError> {
        (**self).insert_price(price)
    }

    fn update_price(&self, price: Price) -> Result<(), StoreError> {
        (**self).update_price(price)
    }

    fn feature(&self, id: FeatureId) -> Result<Option<Feature>, StoreError> {
        (**self).feature(id)
    }

    fn feature_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<Feature>, StoreError> {
        (**self).feature_by_name(organization_id, name)
    }

    fn insert_feature(&self, feature: Feature) -> Result<(), StoreError> {
        (**self).insert_feature(feature)
    }

    fn update_feature(&self, feature: Feature) -> Result<(), StoreError> {
        (**self).update_feature(feature)
    }

    fn links_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<ProductFeatureLink>, StoreError> {
        (**self).links_for_product(product_id)
    }

    fn upsert_link(&self, link: ProductFeatureLink) -> Result<(), StoreError> {
        (**self).upsert_link(link)
    }

    fn remove_link(
        &self,
        product_id: ProductId,
        feature_id: FeatureId,
    ) -> Result<(), StoreError> {
        (**self).remove_link(product_id, feature_id)
    }

    fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, StoreError> {
        (**self).subscription(id)
    }

    fn insert_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        (**self).insert_subscription(subscription)
    }

    fn update_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        (**self).update_subscription(subscription)
    }

    fn grants_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<FeatureGrant>, StoreError> {
        (**self).grants_for_customer(customer_id)
    }

    fn insert_grant(&self, grant: FeatureGrant) -> Result<(), StoreError> {
        (**self).insert_grant(grant)
    }

    fn update_grant(&self, grant: FeatureGrant) -> Result<(), StoreError> {
        (**self).update_grant(grant)
    }

    fn usage_record(&self, id: UsageRecordId) -> Result<Option<UsageRecord>, StoreError> {
        (**self).usage_record(id)
    }

    fn current_usage(
        &self,
        customer_id: CustomerId,
        feature_id: FeatureId,
        subscription_id: SubscriptionId,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, StoreError> {
        (**self).current_usage(customer_id, feature_id, subscription_id, now)
    }

    fn insert_usage_record(&self, record: UsageRecord) -> Result<(), StoreError> {
        (**self).insert_usage_record(record)
    }

    fn compare_and_set_consumed(
        &self,
        id: UsageRecordId,
        expected: u64,
        new: u64,
    ) -> Result<bool, StoreError> {
        (**self).compare_and_set_consumed(id, expected, new)
    }

    fn idempotency_get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JsonValue>, StoreError> {
        (**self).idempotency_get(key, now)
    }

    fn idempotency_put(
        &self,
        key: &str,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).idempotency_put(key, payload, now)
    }

    fn append_sync_event(&self, event: SyncEvent) -> Result<(), StoreError> {
        (**self).append_sync_event(event)
    }

    fn sync_events(&self) -> Result<Vec<SyncEvent>, StoreError> {
        (**self).sync_events()
    }
}
