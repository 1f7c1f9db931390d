use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::{Duration, Utc};
use tollgate_catalog::{
    CatalogStore, Feature, FeatureConfig, FeatureType, InMemoryCatalogStore, Price, PriceAmount,
    Product, ProductFeatureLink, RecurringInterval,
};
use tollgate_core::{CustomerId, FeatureId, OrganizationId, PriceId};
use tollgate_engine::{BillingEngine, RecordingProcessor};
use tollgate_versioning::{
    LinkedFeature, NewPrice, ProductChangeSet, ProductSnapshot, VersioningDecisionEngine,
};

type Engine = BillingEngine<Arc<InMemoryCatalogStore>, Arc<RecordingProcessor>>;

/// One product with an unlimited api_calls quota and an active subscriber,
/// so track calls never reject mid-benchmark.
fn setup_subscribed_engine() -> (Engine, CustomerId) {
    let store = Arc::new(InMemoryCatalogStore::new());
    let organization_id = OrganizationId::new();

    let product = Product::initial(
        organization_id,
        "pro",
        RecurringInterval::Month,
        1,
        0,
        Utc::now(),
    );
    store.insert_product(product.clone()).unwrap();

    let quota = Feature {
        id: FeatureId::new(),
        organization_id,
        name: "api_calls".to_string(),
        title: "API calls".to_string(),
        kind: FeatureType::UsageQuota,
        external_ref: None,
    };
    let flag = Feature {
        id: FeatureId::new(),
        organization_id,
        name: "sso".to_string(),
        title: "SSO".to_string(),
        kind: FeatureType::BooleanFlag,
        external_ref: None,
    };
    store.insert_feature(quota.clone()).unwrap();
    store.insert_feature(flag.clone()).unwrap();
    store
        .upsert_link(ProductFeatureLink {
            product_id: product.id,
            feature_id: quota.id,
            display_order: 0,
            config: FeatureConfig::UsageQuota { limit: None },
        })
        .unwrap();
    store
        .upsert_link(ProductFeatureLink {
            product_id: product.id,
            feature_id: flag.id,
            display_order: 1,
            config: FeatureConfig::BooleanFlag,
        })
        .unwrap();

    let engine = BillingEngine::new(store, Arc::new(RecordingProcessor::new()));
    let customer_id = CustomerId::new();
    engine
        .activate_subscription(
            customer_id,
            product.id,
            Utc::now(),
            Utc::now() + Duration::days(30),
        )
        .unwrap();
    (engine, customer_id)
}

fn bench_usage_tracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("usage_tracking");
    group.sample_size(1000);
    group.throughput(Throughput::Elements(1));

    group.bench_function("track_single_unit", |b| {
        let (engine, customer_id) = setup_subscribed_engine();
        b.iter(|| {
            engine
                .track_usage(customer_id, black_box("api_calls"), 1, None)
                .unwrap()
        });
    });

    group.bench_function("track_with_fresh_idempotency_key", |b| {
        let (engine, customer_id) = setup_subscribed_engine();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let key = format!("bench-{n}");
            engine
                .track_usage(customer_id, "api_calls", 1, Some(&key))
                .unwrap()
        });
    });

    group.bench_function("track_replayed_idempotency_key", |b| {
        let (engine, customer_id) = setup_subscribed_engine();
        engine
            .track_usage(customer_id, "api_calls", 1, Some("bench-replay"))
            .unwrap();
        b.iter(|| {
            engine
                .track_usage(customer_id, "api_calls", 1, Some(black_box("bench-replay")))
                .unwrap()
        });
    });

    group.finish();
}

fn bench_entitlement_checks(c: &mut Criterion) {
    let mut group = c.benchmark_group("entitlement_checks");
    group.sample_size(1000);

    group.bench_function("check_quota_feature", |b| {
        let (engine, customer_id) = setup_subscribed_engine();
        b.iter(|| {
            engine
                .check_access(customer_id, black_box("api_calls"))
                .unwrap()
        });
    });

    group.bench_function("check_boolean_feature", |b| {
        let (engine, customer_id) = setup_subscribed_engine();
        b.iter(|| engine.check_access(customer_id, black_box("sso")).unwrap());
    });

    group.finish();
}

fn snapshot_with_features(feature_count: usize) -> ProductSnapshot {
    let product = Product::initial(
        OrganizationId::new(),
        "pro",
        RecurringInterval::Month,
        1,
        14,
        Utc::now(),
    );
    let price = Price {
        id: PriceId::new(),
        product_id: product.id,
        amount: PriceAmount::Fixed { amount: 799 },
        currency: "USD".to_string(),
        recurring_interval: RecurringInterval::Month,
        recurring_interval_count: 1,
        archived: false,
        external_ref: None,
    };
    let links = (0..feature_count)
        .map(|i| {
            let feature = Feature {
                id: FeatureId::new(),
                organization_id: product.organization_id,
                name: format!("feature_{i}"),
                title: format!("Feature {i}"),
                kind: FeatureType::UsageQuota,
                external_ref: None,
            };
            let link = ProductFeatureLink {
                product_id: product.id,
                feature_id: feature.id,
                display_order: i as u32,
                config: FeatureConfig::UsageQuota {
                    limit: Some(1000),
                },
            };
            LinkedFeature { feature, link }
        })
        .collect();
    ProductSnapshot {
        product,
        prices: vec![price],
        links,
    }
}

fn bench_versioning_decision(c: &mut Criterion) {
    let mut group = c.benchmark_group("versioning_decision");

    for feature_count in [1usize, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::new("analyze_price_change", feature_count),
            feature_count,
            |b, &count| {
                let snapshot = snapshot_with_features(count);
                let change = ProductChangeSet {
                    new_prices: vec![NewPrice {
                        amount: PriceAmount::Fixed { amount: 899 },
                        currency: "USD".to_string(),
                        recurring_interval: RecurringInterval::Month,
                        recurring_interval_count: 1,
                    }],
                    ..Default::default()
                };
                b.iter(|| {
                    black_box(VersioningDecisionEngine::analyze(
                        black_box(&snapshot),
                        black_box(&change),
                        5,
                    ))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_usage_tracking,
    bench_entitlement_checks,
    bench_versioning_decision
);
criterion_main!(benches);
