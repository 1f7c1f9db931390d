//! Catalog domain model and store boundary.
//!
//! This crate defines the billing catalog entities (products and their
//! immutable versions, prices, features, grants, usage records, sync audit
//! events) plus the [`CatalogStore`] trait the engine is written against.
//! The store is the engine's only synchronization point; an in-memory
//! implementation with the required row-level atomicity ships here for
//! tests and development.

pub mod config;
pub mod memory;
pub mod model;
pub mod store;

pub use config::FeatureConfig;
pub use memory::InMemoryCatalogStore;
pub use model::{
    Feature, FeatureGrant, FeatureType, PriceAmount, Price, Product, ProductFeatureLink,
    RecurringInterval, Subscription, SubscriptionStatus, SyncEntity, SyncEvent, SyncOperation,
    SyncStatus, UsageRecord, VersionStatus,
};
pub use store::{CatalogStore, ForkWrite, StoreError, IDEMPOTENCY_RETENTION};
