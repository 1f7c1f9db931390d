//! Catalog entities.
//!
//! Product rows are immutable versions: once a version has active
//! subscribers, commercial changes fork a successor row instead of mutating
//! it. Prices belong to exactly one version and are copied, never moved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tollgate_core::{
    CustomerId, FeatureId, GrantId, OrganizationId, PriceId, ProductId, SubscriptionId,
    SyncEventId, UsageRecordId,
};

use crate::config::FeatureConfig;

/// Whether a product row is the live version of its lineage.
///
/// Invariant: within a (organization, name) lineage, exactly one row is
/// `Current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Current,
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurringInterval {
    Day,
    Week,
    Month,
    Year,
}

/// One version of a sellable product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    /// Version number within the (organization, name) lineage, starting at 1.
    pub version: u32,
    pub parent_product_id: Option<ProductId>,
    pub version_status: VersionStatus,
    /// Set on superseded rows: points at the version that replaced this one.
    pub latest_version_id: Option<ProductId>,
    /// Stamped on forked rows from the decision engine's reasons.
    pub version_created_reason: Option<String>,
    pub recurring_interval: RecurringInterval,
    pub recurring_interval_count: u32,
    pub trial_days: u32,
    pub metadata: Option<JsonValue>,
    /// Processor-side object id once mirrored.
    pub external_ref: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// First version of a new lineage.
    pub fn initial(
        organization_id: OrganizationId,
        name: impl Into<String>,
        recurring_interval: RecurringInterval,
        recurring_interval_count: u32,
        trial_days: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ProductId::new(),
            organization_id,
            name: name.into(),
            description: None,
            version: 1,
            parent_product_id: None,
            version_status: VersionStatus::Current,
            latest_version_id: None,
            version_created_reason: None,
            recurring_interval,
            recurring_interval_count,
            trial_days,
            metadata: None,
            external_ref: None,
            archived: false,
            created_at: now,
        }
    }

    pub fn is_current(&self) -> bool {
        self.version_status == VersionStatus::Current
    }
}

/// Price amount, tagged the way the wire format spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "amount_type", rename_all = "snake_case")]
pub enum PriceAmount {
    /// Amount in the smallest currency unit (e.g. cents).
    Fixed { amount: u64 },
    Free,
}

/// A price attached to exactly one product version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub id: PriceId,
    pub product_id: ProductId,
    pub amount: PriceAmount,
    /// ISO currency code (e.g. "USD").
    pub currency: String,
    pub recurring_interval: RecurringInterval,
    pub recurring_interval_count: u32,
    pub archived: bool,
    pub external_ref: Option<String>,
}

impl Price {
    /// Billing slot of this price: (interval, currency). A changeset price
    /// in the same slot replaces this one during a fork instead of being
    /// merged alongside it.
    pub fn slot(&self) -> (RecurringInterval, &str) {
        (self.recurring_interval, self.currency.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    BooleanFlag,
    UsageQuota,
    NumericLimit,
}

/// A feature definition, owned by the organization.
///
/// `name` is unique per organization and is the lookup key used by
/// entitlement checks and usage tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub title: String,
    pub kind: FeatureType,
    pub external_ref: Option<String>,
}

/// Link between one product version and a feature, with per-link config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFeatureLink {
    pub product_id: ProductId,
    pub feature_id: FeatureId,
    pub display_order: u32,
    pub config: FeatureConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Ended,
}

/// Minimal subscription record the engine needs: which product version a
/// customer is on, whether it is active, and the current billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// "Customer X currently has access to feature Y via subscription Z."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGrant {
    pub id: GrantId,
    pub customer_id: CustomerId,
    pub feature_id: FeatureId,
    pub subscription_id: SubscriptionId,
    pub granted_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl FeatureGrant {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Consumption of one quota feature over one billing period.
///
/// `limit_units` is copied from the link config at period start and is
/// immutable for the period; `None` means unlimited. Only `consumed_units`
/// ever changes, and never past the limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: UsageRecordId,
    pub customer_id: CustomerId,
    pub feature_id: FeatureId,
    pub subscription_id: SubscriptionId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub consumed_units: u64,
    pub limit_units: Option<u64>,
}

impl UsageRecord {
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.period_end >= now
    }

    /// Units left before the limit; `None` when unlimited.
    pub fn remaining_units(&self) -> Option<u64> {
        self.limit_units
            .map(|limit| limit.saturating_sub(self.consumed_units))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncEntity {
    Product,
    Price,
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Archive,
    Attach,
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failure,
    Partial,
}

/// Append-only audit record of one processor-mirroring attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: SyncEventId,
    pub entity: SyncEntity,
    pub entity_id: Uuid,
    /// Owning product version, when the entity is scoped to one (prices,
    /// feature attach/detach). Retries need it to resolve processor refs.
    pub product_id: Option<ProductId>,
    pub operation: SyncOperation,
    pub status: SyncStatus,
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
