//! In-memory catalog store.
//!
//! Intended for tests/dev. One `RwLock` over all tables gives every write
//! the row-level atomicity the trait requires: `commit_fork` and
//! `compare_and_set_consumed` run under a single write guard.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use tollgate_core::{
    CustomerId, FeatureId, GrantId, OrganizationId, PriceId, ProductId, SubscriptionId,
    UsageRecordId,
};

use crate::model::{
    Feature, FeatureGrant, Price, Product, ProductFeatureLink, Subscription, SubscriptionStatus,
    SyncEvent, UsageRecord, VersionStatus,
};
use crate::store::{CatalogStore, ForkWrite, IDEMPOTENCY_RETENTION, StoreError};

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    prices: HashMap<PriceId, Price>,
    features: HashMap<FeatureId, Feature>,
    links: HashMap<(ProductId, FeatureId), ProductFeatureLink>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    grants: HashMap<GrantId, FeatureGrant>,
    usage: HashMap<UsageRecordId, UsageRecord>,
    idempotency: HashMap<String, (DateTime<Utc>, JsonValue)>,
    sync_events: Vec<SyncEvent>,
}

impl Tables {
    fn version_taken(&self, organization_id: OrganizationId, name: &str, version: u32) -> bool {
        self.products.values().any(|p| {
            p.organization_id == organization_id && p.name == name && p.version == version
        })
    }

    fn open_usage_row(
        &self,
        customer_id: CustomerId,
        feature_id: FeatureId,
        subscription_id: SubscriptionId,
        at: DateTime<Utc>,
    ) -> Option<&UsageRecord> {
        self.usage.values().find(|r| {
            r.customer_id == customer_id
                && r.feature_id == feature_id
                && r.subscription_id == subscription_id
                && r.period_end >= at
        })
    }
}

/// In-memory reference implementation of [`CatalogStore`].
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    tables: RwLock<Tables>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.version_taken(product.organization_id, &product.name, product.version) {
            return Err(StoreError::Conflict(format!(
                "product '{}' already has version {}",
                product.name, product.version
            )));
        }
        tables.products.insert(product.id, product);
        Ok(())
    }

    fn update_product(&self, product: Product) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.products.contains_key(&product.id) {
            return Err(StoreError::NotFound(format!("product {}", product.id)));
        }
        tables.products.insert(product.id, product);
        Ok(())
    }

    fn lineage(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Vec<Product>, StoreError> {
        let tables = self.read()?;
        let mut versions: Vec<Product> = tables
            .products
            .values()
            .filter(|p| p.organization_id == organization_id && p.name == name)
            .cloned()
            .collect();
        versions.sort_by_key(|p| p.version);
        Ok(versions)
    }

    fn commit_fork(&self, fork: ForkWrite) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        let new = &fork.new_product;
        if tables.version_taken(new.organization_id, &new.name, new.version) {
            return Err(StoreError::Conflict(format!(
                "lineage '{}' already committed version {}",
                new.name, new.version
            )));
        }

        // The predecessor must still be the current version; a concurrent
        // fork that won the race has already superseded it.
        match tables.products.get(&fork.superseded.id) {
            None => {
                return Err(StoreError::NotFound(format!(
                    "product {}",
                    fork.superseded.id
                )));
            }
            Some(stored) if stored.version_status != VersionStatus::Current => {
                return Err(StoreError::Conflict(format!(
                    "product {} is no longer the current version",
                    fork.superseded.id
                )));
            }
            Some(_) => {}
        }

        tables.products.insert(new.id, new.clone());
        tables
            .products
            .insert(fork.superseded.id, fork.superseded.clone());
        for price in fork.prices {
            tables.prices.insert(price.id, price);
        }
        for link in fork.links {
            tables.links.insert((link.product_id, link.feature_id), link);
        }
        Ok(())
    }

    fn active_subscription_count(&self, product_id: ProductId) -> Result<u64, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .subscriptions
            .values()
            .filter(|s| s.product_id == product_id && s.status == SubscriptionStatus::Active)
            .count() as u64)
    }

    fn prices_for_product(&self, product_id: ProductId) -> Result<Vec<Price>, StoreError> {
        let tables = self.read()?;
        let mut prices: Vec<Price> = tables
            .prices
            .values()
            .filter(|p| p.product_id == product_id)
            .cloned()
            .collect();
        prices.sort_by_key(|p| p.id.as_uuid().to_owned());
        Ok(prices)
    }

    fn insert_price(&self, price: Price) -> Result<(), StoreError> {
        self.write()?.prices.insert(price.id, price);
        Ok(())
    }

    fn update_price(&self, price: Price) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.prices.contains_key(&price.id) {
            return Err(StoreError::NotFound(format!("price {}", price.id)));
        }
        tables.prices.insert(price.id, price);
        Ok(())
    }

    fn feature(&self, id: FeatureId) -> Result<Option<Feature>, StoreError> {
        Ok(self.read()?.features.get(&id).cloned())
    }

    fn feature_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<Feature>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .features
            .values()
            .find(|f| f.organization_id == organization_id && f.name == name)
            .cloned())
    }

    fn insert_feature(&self, feature: Feature) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        // name is the per-organization lookup key
        if tables
            .features
            .values()
            .any(|f| f.organization_id == feature.organization_id && f.name == feature.name)
        {
            return Err(StoreError::Conflict(format!(
                "feature name '{}' already exists in organization",
                feature.name
            )));
        }
        tables.features.insert(feature.id, feature);
        Ok(())
    }

    fn update_feature(&self, feature: Feature) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.features.contains_key(&feature.id) {
            return Err(StoreError::NotFound(format!("feature {}", feature.id)));
        }
        tables.features.insert(feature.id, feature);
        Ok(())
    }

    fn links_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<ProductFeatureLink>, StoreError> {
        let tables = self.read()?;
        let mut links: Vec<ProductFeatureLink> = tables
            .links
            .values()
            .filter(|l| l.product_id == product_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.display_order);
        Ok(links)
    }

    fn upsert_link(&self, link: ProductFeatureLink) -> Result<(), StoreError> {
        self.write()?
            .links
            .insert((link.product_id, link.feature_id), link);
        Ok(())
    }

    fn remove_link(
        &self,
        product_id: ProductId,
        feature_id: FeatureId,
    ) -> Result<(), StoreError> {
        self.write()?.links.remove(&(product_id, feature_id));
        Ok(())
    }

    fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, StoreError> {
        Ok(self.read()?.subscriptions.get(&id).cloned())
    }

    fn insert_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        self.write()?
            .subscriptions
            .insert(subscription.id, subscription);
        Ok(())
    }

    fn update_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.subscriptions.contains_key(&subscription.id) {
            return Err(StoreError::NotFound(format!(
                "subscription {}",
                subscription.id
            )));
        }
        tables.subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    fn grants_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<FeatureGrant>, StoreError> {
        let tables = self.read()?;
        let mut grants: Vec<FeatureGrant> = tables
            .grants
            .values()
            .filter(|g| g.customer_id == customer_id)
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.granted_at);
        Ok(grants)
    }

    fn insert_grant(&self, grant: FeatureGrant) -> Result<(), StoreError> {
        self.write()?.grants.insert(grant.id, grant);
        Ok(())
    }

    fn update_grant(&self, grant: FeatureGrant) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.grants.contains_key(&grant.id) {
            return Err(StoreError::NotFound(format!("grant {}", grant.id)));
        }
        tables.grants.insert(grant.id, grant);
        Ok(())
    }

    fn usage_record(&self, id: UsageRecordId) -> Result<Option<UsageRecord>, StoreError> {
        Ok(self.read()?.usage.get(&id).cloned())
    }

    fn current_usage(
        &self,
        customer_id: CustomerId,
        feature_id: FeatureId,
        subscription_id: SubscriptionId,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .open_usage_row(customer_id, feature_id, subscription_id, now)
            .cloned())
    }

    fn insert_usage_record(&self, record: UsageRecord) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        // At most one open row per (customer, feature, subscription).
        if tables
            .open_usage_row(
                record.customer_id,
                record.feature_id,
                record.subscription_id,
                record.period_start,
            )
            .is_some()
        {
            return Err(StoreError::Conflict(
                "open usage record already exists for this grant".to_string(),
            ));
        }
        tables.usage.insert(record.id, record);
        Ok(())
    }

    fn compare_and_set_consumed(
        &self,
        id: UsageRecordId,
        expected: u64,
        new: u64,
    ) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let record = tables
            .usage
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("usage record {id}")))?;
        if record.consumed_units != expected {
            return Ok(false);
        }
        record.consumed_units = new;
        Ok(true)
    }

    fn idempotency_get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<JsonValue>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .idempotency
            .get(key)
            .filter(|(seen_at, _)| now - *seen_at <= IDEMPOTENCY_RETENTION)
            .map(|(_, payload)| payload.clone()))
    }

    fn idempotency_put(
        &self,
        key: &str,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables
            .idempotency
            .retain(|_, (seen_at, _)| now - *seen_at <= IDEMPOTENCY_RETENTION);
        tables.idempotency.insert(key.to_string(), (now, payload));
        Ok(())
    }

    fn append_sync_event(&self, event: SyncEvent) -> Result<(), StoreError> {
        self.write()?.sync_events.push(event);
        Ok(())
    }

    fn sync_events(&self) -> Result<Vec<SyncEvent>, StoreError> {
        Ok(self.read()?.sync_events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecurringInterval;
    use chrono::Duration;

    fn product(organization_id: OrganizationId, name: &str, version: u32) -> Product {
        Product {
            version,
            ..Product::initial(
                organization_id,
                name,
                RecurringInterval::Month,
                1,
                0,
                Utc::now(),
            )
        }
    }

    fn usage_record(limit: Option<u64>, consumed: u64) -> UsageRecord {
        let now = Utc::now();
        UsageRecord {
            id: UsageRecordId::new(),
            customer_id: CustomerId::new(),
            feature_id: FeatureId::new(),
            subscription_id: SubscriptionId::new(),
            period_start: now - Duration::days(1),
            period_end: now + Duration::days(29),
            consumed_units: consumed,
            limit_units: limit,
        }
    }

    #[test]
    fn insert_product_rejects_duplicate_lineage_version() {
        let store = InMemoryCatalogStore::new();
        let organization_id = OrganizationId::new();
        store.insert_product(product(organization_id, "pro", 1)).unwrap();

        let err = store
            .insert_product(product(organization_id, "pro", 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Same version under a different name is fine.
        store.insert_product(product(organization_id, "team", 1)).unwrap();
    }

    #[test]
    fn commit_fork_is_atomic_on_version_conflict() {
        let store = InMemoryCatalogStore::new();
        let organization_id = OrganizationId::new();
        let v1 = product(organization_id, "pro", 1);
        store.insert_product(v1.clone()).unwrap();

        let mut winner = product(organization_id, "pro", 2);
        winner.parent_product_id = Some(v1.id);
        let mut superseded = v1.clone();
        superseded.version_status = VersionStatus::Superseded;
        superseded.latest_version_id = Some(winner.id);
        store
            .commit_fork(ForkWrite {
                new_product: winner,
                superseded,
                prices: vec![],
                links: vec![],
            })
            .unwrap();

        // A second fork racing for version 2 must fail without writing rows.
        let mut loser = product(organization_id, "pro", 2);
        loser.parent_product_id = Some(v1.id);
        let loser_id = loser.id;
        let loser_price = Price {
            id: PriceId::new(),
            product_id: loser_id,
            amount: crate::model::PriceAmount::Free,
            currency: "USD".to_string(),
            recurring_interval: RecurringInterval::Month,
            recurring_interval_count: 1,
            archived: false,
            external_ref: None,
        };
        let err = store
            .commit_fork(ForkWrite {
                new_product: loser,
                superseded: v1.clone(),
                prices: vec![loser_price],
                links: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.product(loser_id).unwrap().is_none());
        assert_eq!(store.prices_for_product(loser_id).unwrap().len(), 0);
        assert_eq!(store.lineage(organization_id, "pro").unwrap().len(), 2);
    }

    #[test]
    fn commit_fork_rejects_superseded_predecessor() {
        let store = InMemoryCatalogStore::new();
        let organization_id = OrganizationId::new();
        let mut v1 = product(organization_id, "pro", 1);
        v1.version_status = VersionStatus::Superseded;
        store.insert_product(v1.clone()).unwrap();

        let err = store
            .commit_fork(ForkWrite {
                new_product: product(organization_id, "pro", 2),
                superseded: v1,
                prices: vec![],
                links: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn compare_and_set_consumed_rejects_stale_expectation() {
        let store = InMemoryCatalogStore::new();
        let record = usage_record(Some(1000), 995);
        let id = record.id;
        store.insert_usage_record(record).unwrap();

        assert!(store.compare_and_set_consumed(id, 995, 996).unwrap());
        // Stale expected value: no write.
        assert!(!store.compare_and_set_consumed(id, 995, 997).unwrap());
        assert_eq!(store.usage_record(id).unwrap().unwrap().consumed_units, 996);
    }

    #[test]
    fn insert_usage_record_rejects_second_open_period() {
        let store = InMemoryCatalogStore::new();
        let record = usage_record(Some(10), 0);
        let duplicate = UsageRecord {
            id: UsageRecordId::new(),
            ..record.clone()
        };
        store.insert_usage_record(record).unwrap();
        let err = store.insert_usage_record(duplicate).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn current_usage_ignores_closed_periods() {
        let store = InMemoryCatalogStore::new();
        let now = Utc::now();
        let mut record = usage_record(Some(10), 3);
        record.period_start = now - Duration::days(60);
        record.period_end = now - Duration::days(30);
        let (customer_id, feature_id, subscription_id) =
            (record.customer_id, record.feature_id, record.subscription_id);
        store.insert_usage_record(record).unwrap();

        let found = store
            .current_usage(customer_id, feature_id, subscription_id, now)
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn idempotency_entries_expire_after_retention() {
        let store = InMemoryCatalogStore::new();
        let now = Utc::now();
        store
            .idempotency_put("K", serde_json::json!({"consumed_units": 7}), now)
            .unwrap();

        assert!(store.idempotency_get("K", now).unwrap().is_some());
        let later = now + IDEMPOTENCY_RETENTION + Duration::seconds(1);
        assert!(store.idempotency_get("K", later).unwrap().is_none());
    }

    #[test]
    fn feature_name_unique_per_organization() {
        let store = InMemoryCatalogStore::new();
        let organization_id = OrganizationId::new();
        let feature = Feature {
            id: FeatureId::new(),
            organization_id,
            name: "api_calls".to_string(),
            title: "API calls".to_string(),
            kind: crate::model::FeatureType::UsageQuota,
            external_ref: None,
        };
        store.insert_feature(feature.clone()).unwrap();

        let duplicate = Feature {
            id: FeatureId::new(),
            ..feature.clone()
        };
        assert!(matches!(
            store.insert_feature(duplicate),
            Err(StoreError::Conflict(_))
        ));

        // Same name in another organization is allowed.
        let other_org = Feature {
            id: FeatureId::new(),
            organization_id: OrganizationId::new(),
            ..feature
        };
        store.insert_feature(other_org).unwrap();
    }
}
