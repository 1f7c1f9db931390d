//! End-to-end engine scenarios on the in-memory store.

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use chrono::{Duration, Utc};

use tollgate_catalog::{
    CatalogStore, Feature, FeatureConfig, FeatureType, InMemoryCatalogStore, Price, PriceAmount,
    Product, ProductFeatureLink, RecurringInterval, SyncStatus, VersionStatus,
};
use tollgate_core::{BillingError, CustomerId, FeatureId, OrganizationId, PriceId};
use tollgate_engine::{BillingEngine, quota_exceeded_body};
use tollgate_entitlements::AccessReason;
use tollgate_sync::{RecordingProcessor, drain_failed_once};
use tollgate_versioning::{NewPrice, ProductChangeSet};

type Engine = BillingEngine<Arc<InMemoryCatalogStore>, Arc<RecordingProcessor>>;

struct World {
    store: Arc<InMemoryCatalogStore>,
    processor: Arc<RecordingProcessor>,
    engine: Engine,
    product: Product,
    monthly: Price,
    yearly: Price,
    api_calls: Feature,
}

/// "Pro" with a $7.99 monthly and a $79.99 yearly price, plus a 1000-unit
/// api_calls quota and an sso flag.
fn world() -> World {
    tollgate_observability::init();
    let store = Arc::new(InMemoryCatalogStore::new());
    let processor = Arc::new(RecordingProcessor::new());
    let organization_id = OrganizationId::new();

    let mut product = Product::initial(
        organization_id,
        "Pro",
        RecurringInterval::Month,
        1,
        14,
        Utc::now(),
    );
    product.external_ref = Some("proc_product_pro".to_string());
    store.insert_product(product.clone()).unwrap();

    let monthly = Price {
        id: PriceId::new(),
        product_id: product.id,
        amount: PriceAmount::Fixed { amount: 799 },
        currency: "USD".to_string(),
        recurring_interval: RecurringInterval::Month,
        recurring_interval_count: 1,
        archived: false,
        external_ref: Some("proc_price_m".to_string()),
    };
    let yearly = Price {
        id: PriceId::new(),
        product_id: product.id,
        amount: PriceAmount::Fixed { amount: 7999 },
        currency: "USD".to_string(),
        recurring_interval: RecurringInterval::Year,
        recurring_interval_count: 1,
        archived: false,
        external_ref: Some("proc_price_y".to_string()),
    };
    store.insert_price(monthly.clone()).unwrap();
    store.insert_price(yearly.clone()).unwrap();

    let api_calls = Feature {
        id: FeatureId::new(),
        organization_id,
        name: "api_calls".to_string(),
        title: "API calls".to_string(),
        kind: FeatureType::UsageQuota,
        external_ref: Some("proc_feature_api".to_string()),
    };
    let sso = Feature {
        id: FeatureId::new(),
        organization_id,
        name: "sso".to_string(),
        title: "SSO".to_string(),
        kind: FeatureType::BooleanFlag,
        external_ref: Some("proc_feature_sso".to_string()),
    };
    store.insert_feature(api_calls.clone()).unwrap();
    store.insert_feature(sso.clone()).unwrap();
    store
        .upsert_link(ProductFeatureLink {
            product_id: product.id,
            feature_id: api_calls.id,
            display_order: 0,
            config: FeatureConfig::UsageQuota { limit: Some(1000) },
        })
        .unwrap();
    store
        .upsert_link(ProductFeatureLink {
            product_id: product.id,
            feature_id: sso.id,
            display_order: 1,
            config: FeatureConfig::BooleanFlag,
        })
        .unwrap();

    let engine = BillingEngine::new(store.clone(), processor.clone());
    World {
        store,
        processor,
        engine,
        product,
        monthly,
        yearly,
        api_calls,
    }
}

fn subscribe(world: &World) -> Result<(CustomerId, tollgate_catalog::Subscription)> {
    let customer_id = CustomerId::new();
    let subscription = world.engine.activate_subscription(
        customer_id,
        world.product.id,
        Utc::now(),
        Utc::now() + Duration::days(30),
    )?;
    Ok((customer_id, subscription))
}

fn raise_monthly_price() -> ProductChangeSet {
    ProductChangeSet {
        new_prices: vec![NewPrice {
            amount: PriceAmount::Fixed { amount: 899 },
            currency: "USD".to_string(),
            recurring_interval: RecurringInterval::Month,
            recurring_interval_count: 1,
        }],
        ..Default::default()
    }
}

#[test]
fn monthly_price_raise_forks_v2_and_carries_the_yearly_price() -> Result<()> {
    let world = world();
    let (_, subscription) = subscribe(&world)?;

    let preview = world
        .engine
        .check_versioning(world.product.id, &raise_monthly_price())?;
    assert!(preview.will_version);
    assert_eq!(preview.new_version, 2);
    assert_eq!(preview.affected_subscriptions, 1);

    let v2 = world
        .engine
        .apply_update(world.product.id, &raise_monthly_price())?;
    assert_eq!(v2.version, 2);
    assert_eq!(v2.parent_product_id, Some(world.product.id));
    assert!(v2.version_created_reason.as_deref().unwrap().contains("price added"));

    // v2 carries the raised monthly price and a copy of the yearly one.
    let v2_prices = world.store.prices_for_product(v2.id)?;
    assert_eq!(v2_prices.len(), 2);
    let monthly = v2_prices
        .iter()
        .find(|p| p.recurring_interval == RecurringInterval::Month)
        .unwrap();
    assert_eq!(monthly.amount, PriceAmount::Fixed { amount: 899 });
    let yearly = v2_prices
        .iter()
        .find(|p| p.recurring_interval == RecurringInterval::Year)
        .unwrap();
    assert_eq!(yearly.amount, PriceAmount::Fixed { amount: 7999 });
    assert_ne!(yearly.id, world.yearly.id);

    // The existing subscriber keeps version 1 and its original pricing.
    let v1 = world.store.product(world.product.id)?.unwrap();
    assert_eq!(v1.version_status, VersionStatus::Superseded);
    assert_eq!(v1.latest_version_id, Some(v2.id));
    let still_subscribed = world.store.subscription(subscription.id)?.unwrap();
    assert_eq!(still_subscribed.product_id, world.product.id);
    let v1_prices = world.store.prices_for_product(world.product.id)?;
    assert!(v1_prices.iter().any(|p| p.id == world.monthly.id && !p.archived));

    Ok(())
}

#[test]
fn a_product_without_subscribers_changes_in_place() -> Result<()> {
    let world = world();
    let updated = world
        .engine
        .apply_update(world.product.id, &raise_monthly_price())?;
    assert_eq!(updated.id, world.product.id);
    assert_eq!(updated.version, 1);
    assert_eq!(
        world
            .store
            .lineage(world.product.organization_id, "Pro")?
            .len(),
        1
    );
    Ok(())
}

#[test]
fn quota_lifecycle_grant_consume_exhaust_deny() -> Result<()> {
    let world = world();
    let (customer_id, _) = subscribe(&world)?;

    // Fresh subscription: full quota, boolean feature on too.
    let access = world.engine.check_access(customer_id, "api_calls")?;
    assert!(access.has_access);
    assert_eq!(access.usage.unwrap().remaining_units, Some(1000));
    assert!(world.engine.check_access(customer_id, "sso")?.has_access);

    // Consume the whole period in two calls.
    world.engine.track_usage(customer_id, "api_calls", 995, None)?;
    let receipt = world.engine.track_usage(customer_id, "api_calls", 5, None)?;
    assert_eq!(receipt.consumed_units, 1000);
    assert_eq!(receipt.remaining_units, Some(0));

    // One more unit is rejected without moving the counter.
    let err = world
        .engine
        .track_usage(customer_id, "api_calls", 1, None)
        .unwrap_err();
    let BillingError::QuotaExceeded(snapshot) = err else {
        panic!("expected QuotaExceeded, got {err:?}");
    };
    assert_eq!(snapshot.consumed_units, 1000);

    let body = quota_exceeded_body(&snapshot);
    assert_eq!(body["error"], "quota_exceeded");
    assert_eq!(body["usage"]["remaining_units"], 0);

    // Entitlement checks now deny the quota feature but not the flag.
    let access = world.engine.check_access(customer_id, "api_calls")?;
    assert!(!access.has_access);
    assert_eq!(access.reason, AccessReason::QuotaExceeded);
    assert!(world.engine.check_access(customer_id, "sso")?.has_access);

    Ok(())
}

#[test]
fn retransmitted_track_calls_consume_once() -> Result<()> {
    let world = world();
    let (customer_id, _) = subscribe(&world)?;

    let first = world
        .engine
        .track_usage(customer_id, "api_calls", 10, Some("req-42"))?;
    let second = world
        .engine
        .track_usage(customer_id, "api_calls", 10, Some("req-42"))?;
    assert_eq!(first, second);

    let access = world.engine.check_access(customer_id, "api_calls")?;
    assert_eq!(access.usage.unwrap().consumed_units, 10);
    Ok(())
}

#[test]
fn concurrent_tracking_stops_exactly_at_the_limit() -> Result<()> {
    let world = world();
    let (customer_id, _) = subscribe(&world)?;
    world.engine.track_usage(customer_id, "api_calls", 995, None)?;

    let engine = Arc::new(world.engine);
    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            engine.track_usage(customer_id, "api_calls", 1, None)
        }));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 5);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(BillingError::QuotaExceeded(_))))
            .count(),
        5
    );

    let access = engine.check_access(customer_id, "api_calls")?;
    assert_eq!(access.usage.unwrap().consumed_units, 1000);
    Ok(())
}

#[test]
fn ending_a_subscription_revokes_feature_access() -> Result<()> {
    let world = world();
    let (customer_id, subscription) = subscribe(&world)?;
    assert!(world.engine.check_access(customer_id, "api_calls")?.has_access);

    world.engine.end_subscription(subscription.id)?;

    let access = world.engine.check_access(customer_id, "api_calls")?;
    assert!(!access.has_access);
    assert_eq!(access.reason, AccessReason::NoActiveSubscription);
    Ok(())
}

#[test]
fn processor_outage_leaves_a_backlog_the_drain_clears() -> Result<()> {
    let world = world();
    subscribe(&world)?;
    world.processor.fail_on("create_product");

    // The fork commits locally even though mirroring is down.
    let v2 = world
        .engine
        .apply_update(world.product.id, &raise_monthly_price())?;
    assert_eq!(v2.version, 2);
    assert!(world.store.product(v2.id)?.unwrap().external_ref.is_none());
    let events = world.store.sync_events()?;
    assert!(events.iter().all(|e| e.status == SyncStatus::Failure));

    // Processor comes back; one drain pass reconciles product, prices,
    // and feature links in dependency order.
    world.processor.recover("create_product");
    let retried = drain_failed_once(&world.store, &world.processor)?;
    assert!(retried >= 3);
    assert_eq!(drain_failed_once(&world.store, &world.processor)?, 0);

    let mirrored = world.store.product(v2.id)?.unwrap();
    assert!(mirrored.external_ref.is_some());
    assert!(
        world
            .store
            .prices_for_product(v2.id)?
            .iter()
            .all(|p| p.external_ref.is_some())
    );
    Ok(())
}

#[test]
fn superseding_twice_builds_a_walkable_lineage() -> Result<()> {
    let world = world();
    subscribe(&world)?;

    let v2 = world
        .engine
        .apply_update(world.product.id, &raise_monthly_price())?;

    // Subscribe someone to v2 so the next change forks again.
    world.engine.activate_subscription(
        CustomerId::new(),
        v2.id,
        Utc::now(),
        Utc::now() + Duration::days(30),
    )?;
    let v3 = world.engine.apply_update(
        v2.id,
        &ProductChangeSet {
            detach_features: vec![world.api_calls.id],
            ..Default::default()
        },
    )?;
    assert_eq!(v3.version, 3);

    let lineage = world.store.lineage(world.product.organization_id, "Pro")?;
    assert_eq!(lineage.len(), 3);
    assert_eq!(
        lineage.iter().map(|p| p.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    // Exactly one current version, and every superseded row points forward.
    assert_eq!(
        lineage
            .iter()
            .filter(|p| p.version_status == VersionStatus::Current)
            .count(),
        1
    );
    assert_eq!(lineage[0].latest_version_id, Some(lineage[1].id));
    assert_eq!(lineage[1].latest_version_id, Some(lineage[2].id));
    assert_eq!(lineage[2].parent_product_id, Some(lineage[1].id));
    Ok(())
}
