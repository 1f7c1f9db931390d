//! Per-link feature configuration.
//!
//! Each product/feature link carries a configuration whose shape depends on
//! the feature type. This is modeled as a tagged union so a boolean flag can
//! never carry a limit and a quota can never lose its one.

use serde::{Deserialize, Serialize};

use crate::model::FeatureType;

/// Configuration attached to a product/feature link.
///
/// For the limit-bearing variants, `limit = None` means "unlimited" — a
/// distinct value from any numeric limit, not an absent field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureConfig {
    BooleanFlag,
    UsageQuota { limit: Option<u64> },
    NumericLimit { limit: Option<u64> },
}

impl FeatureConfig {
    /// The feature type this configuration is valid for.
    pub fn kind(&self) -> FeatureType {
        match self {
            FeatureConfig::BooleanFlag => FeatureType::BooleanFlag,
            FeatureConfig::UsageQuota { .. } => FeatureType::UsageQuota,
            FeatureConfig::NumericLimit { .. } => FeatureType::NumericLimit,
        }
    }

    /// Extracted numeric limit; `None` for boolean flags and unlimited quotas.
    pub fn limit(&self) -> Option<u64> {
        match self {
            FeatureConfig::BooleanFlag => None,
            FeatureConfig::UsageQuota { limit } | FeatureConfig::NumericLimit { limit } => *limit,
        }
    }

    pub fn matches(&self, kind: FeatureType) -> bool {
        self.kind() == kind
    }
}
