//! One facade over the whole engine.
//!
//! [`BillingEngine`] wires the versioning manager, entitlement resolver,
//! quota tracker, and grant provisioner over a single store and processor
//! pair, and stamps the current time on every call so embedders do not
//! have to thread clocks around.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};

use tollgate_catalog::{CatalogStore, Product, Subscription};
use tollgate_core::{BillingResult, CustomerId, ProductId, SubscriptionId, UsageSnapshot};
use tollgate_entitlements::{
    EntitlementResolver, EntitlementResult, GrantProvisioner, TrackReceipt, UsageQuotaTracker,
};
use tollgate_sync::{ProcessorAdapter, SyncRetryWorker, WorkerHandle};
use tollgate_versioning::{ProductChangeSet, ProductVersionManager, VersioningPreview};

pub use tollgate_catalog::{InMemoryCatalogStore, SyncStatus};
pub use tollgate_core::{BillingError, FeatureId, OrganizationId};
pub use tollgate_entitlements::AccessReason;
pub use tollgate_sync::{ProcessorError, RecordingProcessor};
pub use tollgate_versioning::{FeatureAttachment, NewPrice, VersioningDecisionEngine};

/// Facade over product versioning, entitlements, and usage tracking.
#[derive(Debug)]
pub struct BillingEngine<S, P> {
    store: S,
    manager: ProductVersionManager<S, P>,
    resolver: EntitlementResolver<S>,
    tracker: UsageQuotaTracker<S>,
    provisioner: GrantProvisioner<S>,
}

impl<S, P> BillingEngine<S, P>
where
    S: CatalogStore + Clone,
    P: ProcessorAdapter,
{
    pub fn new(store: S, processor: P) -> Self {
        Self {
            manager: ProductVersionManager::new(store.clone(), processor),
            resolver: EntitlementResolver::new(store.clone()),
            tracker: UsageQuotaTracker::new(store.clone()),
            provisioner: GrantProvisioner::new(store.clone()),
            store,
        }
    }

    // Versioning -------------------------------------------------------------

    /// Preview what [`apply_update`](Self::apply_update) would do, without
    /// persisting or mirroring anything.
    pub fn check_versioning(
        &self,
        product_id: ProductId,
        change: &ProductChangeSet,
    ) -> BillingResult<VersioningPreview> {
        self.manager.check_versioning(product_id, change)
    }

    /// Apply a change set, forking a new version when the current one is
    /// commercially immutable. Returns the product the change landed on.
    pub fn apply_update(
        &self,
        product_id: ProductId,
        change: &ProductChangeSet,
    ) -> BillingResult<Product> {
        self.manager.apply_update(product_id, change)
    }

    // Entitlements -----------------------------------------------------------

    /// Does the customer currently have this feature?
    pub fn check_access(
        &self,
        customer_id: CustomerId,
        feature_key: &str,
    ) -> BillingResult<EntitlementResult> {
        self.resolver.check(customer_id, feature_key, Utc::now())
    }

    /// Consume quota units, idempotently when a key is supplied.
    pub fn track_usage(
        &self,
        customer_id: CustomerId,
        feature_key: &str,
        units: u64,
        idempotency_key: Option<&str>,
    ) -> BillingResult<TrackReceipt> {
        self.tracker
            .track(customer_id, feature_key, units, idempotency_key, Utc::now())
    }

    // Subscription lifecycle ---------------------------------------------------

    pub fn activate_subscription(
        &self,
        customer_id: CustomerId,
        product_id: ProductId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> BillingResult<Subscription> {
        self.provisioner
            .activate(customer_id, product_id, period_start, period_end)
    }

    pub fn open_usage_period(
        &self,
        subscription_id: SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> BillingResult<()> {
        self.provisioner
            .open_period(subscription_id, period_start, period_end)
    }

    pub fn end_subscription(&self, subscription_id: SubscriptionId) -> BillingResult<()> {
        self.provisioner.end(subscription_id, Utc::now())
    }

    // Sync -------------------------------------------------------------------

    /// Spawn the background worker that retries failed processor mirroring.
    /// The worker needs its own adapter handle since retries run off-thread.
    pub fn spawn_sync_worker<Q>(&self, adapter: Q, tick: Duration) -> WorkerHandle
    where
        S: Send + 'static,
        Q: ProcessorAdapter + Send + 'static,
    {
        SyncRetryWorker::spawn(self.store.clone(), adapter, tick)
    }
}

/// Canonical response body for a rejected track call, for embedders that
/// surface quota breaches over HTTP.
pub fn quota_exceeded_body(usage: &UsageSnapshot) -> JsonValue {
    json!({
        "error": "quota_exceeded",
        "usage": usage,
    })
}
