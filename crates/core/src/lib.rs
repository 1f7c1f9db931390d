//! `tollgate-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly typed identifiers and the billing error taxonomy shared by the
//! versioning, entitlement, and usage-tracking layers.

pub mod error;
pub mod id;

pub use error::{BillingError, BillingResult, UsageSnapshot};
pub use id::{
    CustomerId, FeatureId, GrantId, OrganizationId, PriceId, ProductId, SubscriptionId,
    SyncEventId, UsageRecordId,
};
