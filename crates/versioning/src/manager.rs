//! Fork execution and in-place updates.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use tollgate_catalog::{
    CatalogStore, ForkWrite, Price, Product, ProductFeatureLink, StoreError, SyncEntity,
    SyncOperation, VersionStatus,
};
use tollgate_core::{BillingError, BillingResult, PriceId, ProductId};
use tollgate_sync::{ProcessorAdapter, ProcessorError, SyncRecorder};

use crate::change::ProductChangeSet;
use crate::decision::{LinkedFeature, ProductSnapshot, VersioningDecisionEngine};

/// Result of the pure preview operation: what `apply_update` would do,
/// without persisting anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersioningPreview {
    pub will_version: bool,
    pub current_version: u32,
    pub new_version: u32,
    pub affected_subscriptions: u64,
    pub reasons: Vec<String>,
}

/// Executes product updates: decides fork-vs-mutate, runs the chosen path,
/// and mirrors the outcome to the payment processor best-effort.
///
/// Dependencies are constructor-passed handles; the manager holds no
/// ambient state and is constructed once per process.
#[derive(Debug)]
pub struct ProductVersionManager<S, P> {
    store: S,
    processor: P,
    recorder: SyncRecorder<S>,
}

impl<S, P> ProductVersionManager<S, P>
where
    S: CatalogStore + Clone,
    P: ProcessorAdapter,
{
    pub fn new(store: S, processor: P) -> Self {
        let recorder = SyncRecorder::new(store.clone());
        Self {
            store,
            processor,
            recorder,
        }
    }

    /// Pure preview: decide what `apply_update` would do. Never fails for a
    /// valid change set and never writes.
    pub fn check_versioning(
        &self,
        product_id: ProductId,
        change: &ProductChangeSet,
    ) -> BillingResult<VersioningPreview> {
        let snapshot = self.load_snapshot(product_id)?;
        validate_change(&snapshot, change, &self.store)?;

        let affected_subscriptions = self.store.active_subscription_count(product_id)?;
        let decision =
            VersioningDecisionEngine::analyze(&snapshot, change, affected_subscriptions);

        let current_version = snapshot.product.version;
        let new_version = if decision.requires_fork {
            self.next_lineage_version(&snapshot.product)?
        } else {
            current_version
        };

        Ok(VersioningPreview {
            will_version: decision.requires_fork,
            current_version,
            new_version,
            affected_subscriptions,
            reasons: decision.reasons,
        })
    }

    /// Apply a change set to a product: in place when safe, otherwise by
    /// forking a new immutable version. Returns the product the change
    /// ended up on (the mutated row, or the freshly forked one).
    pub fn apply_update(
        &self,
        product_id: ProductId,
        change: &ProductChangeSet,
    ) -> BillingResult<Product> {
        let snapshot = self.load_snapshot(product_id)?;
        if !snapshot.product.is_current() {
            return Err(BillingError::conflict(format!(
                "product {product_id} is a superseded version; update the current version"
            )));
        }
        validate_change(&snapshot, change, &self.store)?;

        let active_subscriptions = self.store.active_subscription_count(product_id)?;
        let decision =
            VersioningDecisionEngine::analyze(&snapshot, change, active_subscriptions);

        if decision.requires_fork {
            self.fork(&snapshot, change, &decision.reasons)
        } else {
            self.apply_in_place(snapshot, change)
        }
    }

    fn load_snapshot(&self, product_id: ProductId) -> BillingResult<ProductSnapshot> {
        let product = self
            .store
            .product(product_id)?
            .ok_or_else(|| BillingError::not_found(format!("product {product_id}")))?;
        let prices = self.store.prices_for_product(product_id)?;
        let mut links = Vec::new();
        for link in self.store.links_for_product(product_id)? {
            let feature = self
                .store
                .feature(link.feature_id)?
                .ok_or_else(|| BillingError::not_found(format!("feature {}", link.feature_id)))?;
            links.push(LinkedFeature { feature, link });
        }
        Ok(ProductSnapshot {
            product,
            prices,
            links,
        })
    }

    fn next_lineage_version(&self, product: &Product) -> BillingResult<u32> {
        let lineage = self
            .store
            .lineage(product.organization_id, &product.name)?;
        Ok(lineage.iter().map(|p| p.version).max().unwrap_or(0) + 1)
    }

    // ----- in-place path ---------------------------------------------------

    fn apply_in_place(
        &self,
        snapshot: ProductSnapshot,
        change: &ProductChangeSet,
    ) -> BillingResult<Product> {
        let mut product = snapshot.product.clone();
        if let Some(description) = &change.description {
            product.description = Some(description.clone());
        }
        if let Some(trial_days) = change.trial_days {
            product.trial_days = trial_days;
        }
        if let Some(metadata) = &change.metadata {
            product.metadata = Some(metadata.clone());
        }
        self.store.update_product(product.clone())?;
        self.mirror_product_update(&product);

        for price_id in &change.archive_prices {
            if let Some(price) = snapshot.prices.iter().find(|p| p.id == *price_id) {
                let mut archived = price.clone();
                archived.archived = true;
                self.store.update_price(archived.clone())?;
                self.mirror_price_archive(&archived);
            }
        }

        for new_price in &change.new_prices {
            let price = Price {
                id: PriceId::new(),
                product_id: product.id,
                amount: new_price.amount,
                currency: new_price.currency.clone(),
                recurring_interval: new_price.recurring_interval,
                recurring_interval_count: new_price.recurring_interval_count,
                archived: false,
                external_ref: None,
            };
            self.store.insert_price(price.clone())?;
            self.mirror_price_create(&product, price);
        }

        for update in &change.update_features {
            self.store.upsert_link(ProductFeatureLink {
                product_id: product.id,
                feature_id: update.feature_id,
                display_order: update.display_order,
                config: update.config,
            })?;
        }

        for attach in &change.attach_features {
            self.store.upsert_link(ProductFeatureLink {
                product_id: product.id,
                feature_id: attach.feature_id,
                display_order: attach.display_order,
                config: attach.config,
            })?;
            self.mirror_link(&product, attach.feature_id, SyncOperation::Attach);
        }

        for feature_id in &change.detach_features {
            self.store.remove_link(product.id, *feature_id)?;
            self.mirror_link(&product, *feature_id, SyncOperation::Detach);
        }

        Ok(product)
    }

    // ----- fork path -------------------------------------------------------

    fn fork(
        &self,
        snapshot: &ProductSnapshot,
        change: &ProductChangeSet,
        reasons: &[String],
    ) -> BillingResult<Product> {
        let mut version = self.next_lineage_version(&snapshot.product)?;
        let mut fork = build_fork(snapshot, change, version, reasons);

        // Optimistic: the (organization, name, version) guard serializes
        // concurrent forks of the same lineage. On conflict re-read and
        // retry once, then surface the conflict.
        if let Err(err) = self.store.commit_fork(fork.clone()) {
            match err {
                StoreError::Conflict(_) => {
                    let current = self
                        .store
                        .product(snapshot.product.id)?
                        .ok_or_else(|| BillingError::not_found("product"))?;
                    if !current.is_current() {
                        return Err(BillingError::conflict(format!(
                            "product {} was superseded by a concurrent fork",
                            snapshot.product.id
                        )));
                    }
                    version = self.next_lineage_version(&snapshot.product)?;
                    fork = build_fork(snapshot, change, version, reasons);
                    self.store.commit_fork(fork.clone()).map_err(|second| {
                        match second {
                            StoreError::Conflict(msg) => BillingError::conflict(format!(
                                "concurrent forks on lineage '{}': {msg}",
                                snapshot.product.name
                            )),
                            other => other.into(),
                        }
                    })?;
                }
                other => return Err(other.into()),
            }
        }

        info!(
            product = %fork.new_product.id,
            lineage = %fork.new_product.name,
            version = fork.new_product.version,
            reasons = reasons.join("; "),
            "forked new product version"
        );

        // Mirroring runs after the local commit; failures are recorded and
        // left for the retry worker, never rolled back into the fork.
        let mirrored = self.mirror_fork(&fork, snapshot);
        Ok(mirrored)
    }

    fn mirror_fork(&self, fork: &ForkWrite, snapshot: &ProductSnapshot) -> Product {
        let mut product = fork.new_product.clone();

        let outcome = self.processor.create_product(&product);
        self.recorder.record(
            SyncEntity::Product,
            *product.id.as_uuid(),
            None,
            SyncOperation::Create,
            &outcome,
        );
        if let Ok(external_ref) = outcome {
            product.external_ref = Some(external_ref);
            if let Err(err) = self.store.update_product(product.clone()) {
                warn!(product = %product.id, error = %err, "failed to persist product external_ref");
            }
        }

        for price in &fork.prices {
            self.mirror_price_create(&product, price.clone());
        }
        for link in &fork.links {
            self.mirror_fork_link(&product, snapshot, link);
        }
        product
    }

    fn mirror_fork_link(
        &self,
        product: &Product,
        snapshot: &ProductSnapshot,
        link: &ProductFeatureLink,
    ) {
        let feature_ref = snapshot
            .linked(link.feature_id)
            .and_then(|l| l.feature.external_ref.clone());
        let outcome = match (&product.external_ref, feature_ref) {
            (Some(product_ref), Some(feature_ref)) => {
                self.processor.attach_feature(product_ref, &feature_ref)
            }
            _ => Err(ProcessorError::Unavailable(
                "product or feature not mirrored yet".to_string(),
            )),
        };
        self.recorder.record(
            SyncEntity::Feature,
            *link.feature_id.as_uuid(),
            Some(product.id),
            SyncOperation::Attach,
            &outcome,
        );
    }

    fn mirror_product_update(&self, product: &Product) {
        let Some(external_ref) = &product.external_ref else {
            return; // never mirrored; nothing to update on the processor side
        };
        let outcome = self.processor.update_product(external_ref, product);
        self.recorder.record(
            SyncEntity::Product,
            *product.id.as_uuid(),
            None,
            SyncOperation::Update,
            &outcome,
        );
    }

    fn mirror_price_create(&self, product: &Product, mut price: Price) {
        let outcome = match &product.external_ref {
            Some(product_ref) => self.processor.create_price(product_ref, &price),
            None => Err(ProcessorError::Unavailable(
                "owning product not mirrored yet".to_string(),
            )),
        };
        self.recorder.record(
            SyncEntity::Price,
            *price.id.as_uuid(),
            Some(product.id),
            SyncOperation::Create,
            &outcome,
        );
        if let Ok(external_ref) = outcome {
            price.external_ref = Some(external_ref);
            if let Err(err) = self.store.update_price(price.clone()) {
                warn!(price = %price.id, error = %err, "failed to persist price external_ref");
            }
        }
    }

    fn mirror_price_archive(&self, price: &Price) {
        let outcome = match &price.external_ref {
            Some(external_ref) => self.processor.archive_price(external_ref),
            None => return, // never mirrored; nothing to archive
        };
        self.recorder.record(
            SyncEntity::Price,
            *price.id.as_uuid(),
            Some(price.product_id),
            SyncOperation::Archive,
            &outcome,
        );
    }

    fn mirror_link(&self, product: &Product, feature_id: tollgate_core::FeatureId, operation: SyncOperation) {
        let feature_ref = match self.store.feature(feature_id) {
            Ok(Some(feature)) => feature.external_ref,
            _ => None,
        };
        let outcome = match (&product.external_ref, feature_ref) {
            (Some(product_ref), Some(feature_ref)) => match operation {
                SyncOperation::Attach => self.processor.attach_feature(product_ref, &feature_ref),
                _ => self.processor.detach_feature(product_ref, &feature_ref),
            },
            _ => Err(ProcessorError::Unavailable(
                "product or feature not mirrored yet".to_string(),
            )),
        };
        self.recorder.record(
            SyncEntity::Feature,
            *feature_id.as_uuid(),
            Some(product.id),
            operation,
            &outcome,
        );
    }
}

/// Assemble every row a fork writes. Pure; ids for the new rows are minted
/// here so a retried build gets fresh ones.
fn build_fork(
    snapshot: &ProductSnapshot,
    change: &ProductChangeSet,
    version: u32,
    reasons: &[String],
) -> ForkWrite {
    let current = &snapshot.product;
    let new_product = Product {
        id: ProductId::new(),
        organization_id: current.organization_id,
        name: current.name.clone(),
        description: change
            .description
            .clone()
            .or_else(|| current.description.clone()),
        version,
        parent_product_id: Some(current.id),
        version_status: VersionStatus::Current,
        latest_version_id: None,
        version_created_reason: Some(reasons.join("; ")),
        recurring_interval: current.recurring_interval,
        recurring_interval_count: current.recurring_interval_count,
        trial_days: change.trial_days.unwrap_or(current.trial_days),
        metadata: change.metadata.clone().or_else(|| current.metadata.clone()),
        external_ref: None,
        archived: false,
        created_at: Utc::now(),
    };

    let mut superseded = current.clone();
    superseded.version_status = VersionStatus::Superseded;
    superseded.latest_version_id = Some(new_product.id);

    // Copy prices: non-archived, minus explicitly archived, minus any whose
    // billing slot a new price replaces. Copies get fresh ids; prices are
    // never moved between versions.
    let mut prices = Vec::new();
    for price in &snapshot.prices {
        if price.archived || change.archive_prices.contains(&price.id) {
            continue;
        }
        if change.replaces_slot(price.recurring_interval, &price.currency) {
            continue;
        }
        prices.push(Price {
            id: PriceId::new(),
            product_id: new_product.id,
            external_ref: None,
            ..price.clone()
        });
    }
    for new_price in &change.new_prices {
        prices.push(Price {
            id: PriceId::new(),
            product_id: new_product.id,
            amount: new_price.amount,
            currency: new_price.currency.clone(),
            recurring_interval: new_price.recurring_interval,
            recurring_interval_count: new_price.recurring_interval_count,
            archived: false,
            external_ref: None,
        });
    }

    // Copy feature links minus detached, with changeset overrides applied,
    // then append the newly attached ones.
    let mut links = Vec::new();
    for linked in &snapshot.links {
        let feature_id = linked.link.feature_id;
        if change.detach_features.contains(&feature_id) {
            continue;
        }
        let (config, display_order) = match change.override_for(feature_id) {
            Some(update) => (update.config, update.display_order),
            None => (linked.link.config, linked.link.display_order),
        };
        links.push(ProductFeatureLink {
            product_id: new_product.id,
            feature_id,
            display_order,
            config,
        });
    }
    for attach in &change.attach_features {
        links.push(ProductFeatureLink {
            product_id: new_product.id,
            feature_id: attach.feature_id,
            display_order: attach.display_order,
            config: attach.config,
        });
    }

    ForkWrite {
        new_product,
        superseded,
        prices,
        links,
    }
}

/// Reject malformed change sets before any decision is acted on.
fn validate_change<S: CatalogStore>(
    snapshot: &ProductSnapshot,
    change: &ProductChangeSet,
    store: &S,
) -> BillingResult<()> {
    for price_id in &change.archive_prices {
        let Some(price) = snapshot.prices.iter().find(|p| p.id == *price_id) else {
            return Err(BillingError::validation(format!(
                "price {price_id} is not attached to this product"
            )));
        };
        if price.archived {
            return Err(BillingError::validation(format!(
                "price {price_id} is already archived"
            )));
        }
    }

    for new_price in &change.new_prices {
        if new_price.currency.trim().is_empty() {
            return Err(BillingError::validation("price currency cannot be empty"));
        }
        if new_price.recurring_interval_count == 0 {
            return Err(BillingError::validation(
                "price interval count must be at least 1",
            ));
        }
    }

    for feature_id in &change.detach_features {
        if snapshot.linked(*feature_id).is_none() {
            return Err(BillingError::validation(format!(
                "feature {feature_id} is not linked to this product"
            )));
        }
    }

    for update in &change.update_features {
        let Some(linked) = snapshot.linked(update.feature_id) else {
            return Err(BillingError::validation(format!(
                "feature {} is not linked to this product",
                update.feature_id
            )));
        };
        if !update.config.matches(linked.feature.kind) {
            return Err(BillingError::validation(format!(
                "config type does not match feature '{}' type",
                linked.feature.name
            )));
        }
    }

    for attach in &change.attach_features {
        if snapshot.linked(attach.feature_id).is_some() {
            return Err(BillingError::validation(format!(
                "feature {} is already linked to this product",
                attach.feature_id
            )));
        }
        let feature = store
            .feature(attach.feature_id)?
            .ok_or_else(|| {
                BillingError::validation(format!("unknown feature {}", attach.feature_id))
            })?;
        if !attach.config.matches(feature.kind) {
            return Err(BillingError::validation(format!(
                "config type does not match feature '{}' type",
                feature.name
            )));
        }
    }

    Ok(())
}
