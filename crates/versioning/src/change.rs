//! Proposed changes to a product version.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tollgate_catalog::{FeatureConfig, PriceAmount, RecurringInterval};
use tollgate_core::{FeatureId, PriceId};

/// A price to add. During a fork it *replaces* any existing price in the
/// same (interval, currency) slot rather than being merged alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrice {
    pub amount: PriceAmount,
    pub currency: String,
    pub recurring_interval: RecurringInterval,
    pub recurring_interval_count: u32,
}

/// A feature to link, or an override for an already linked feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAttachment {
    pub feature_id: FeatureId,
    pub config: FeatureConfig,
    pub display_order: u32,
}

/// Everything a caller may change about a product in one update.
///
/// Option fields are overrides: `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductChangeSet {
    pub description: Option<String>,
    pub trial_days: Option<u32>,
    pub metadata: Option<JsonValue>,
    pub new_prices: Vec<NewPrice>,
    pub archive_prices: Vec<PriceId>,
    pub attach_features: Vec<FeatureAttachment>,
    pub update_features: Vec<FeatureAttachment>,
    pub detach_features: Vec<FeatureId>,
}

impl ProductChangeSet {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.trial_days.is_none()
            && self.metadata.is_none()
            && self.new_prices.is_empty()
            && self.archive_prices.is_empty()
            && self.attach_features.is_empty()
            && self.update_features.is_empty()
            && self.detach_features.is_empty()
    }

    /// Does a new price occupy this billing slot (replacement semantics)?
    pub fn replaces_slot(&self, interval: RecurringInterval, currency: &str) -> bool {
        self.new_prices
            .iter()
            .any(|p| p.recurring_interval == interval && p.currency == currency)
    }

    pub fn override_for(&self, feature_id: FeatureId) -> Option<&FeatureAttachment> {
        self.update_features.iter().find(|u| u.feature_id == feature_id)
    }
}
