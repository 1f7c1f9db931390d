//! Fork-vs-mutate decision logic.
//!
//! Pure and side-effect free: safe to call in preview mode without
//! persisting anything. The returned reasons are human-readable and are
//! stamped into `version_created_reason` when a fork is executed.

use tollgate_catalog::{Feature, Price, Product, ProductFeatureLink};

use crate::change::ProductChangeSet;

/// A product version with its prices and feature links, loaded once and
/// shared by the decision engine and the fork procedure.
#[derive(Debug, Clone)]
pub struct ProductSnapshot {
    pub product: Product,
    pub prices: Vec<Price>,
    pub links: Vec<LinkedFeature>,
}

/// One feature link joined with its feature definition (reasons and
/// entitlement lookups both want the feature name, not just the id).
#[derive(Debug, Clone)]
pub struct LinkedFeature {
    pub feature: Feature,
    pub link: ProductFeatureLink,
}

impl ProductSnapshot {
    pub fn linked(&self, feature_id: tollgate_core::FeatureId) -> Option<&LinkedFeature> {
        self.links.iter().find(|l| l.link.feature_id == feature_id)
    }
}

/// Outcome of analyzing a proposed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersioningDecision {
    pub requires_fork: bool,
    pub reasons: Vec<String>,
}

impl VersioningDecision {
    fn in_place() -> Self {
        Self {
            requires_fork: false,
            reasons: vec![],
        }
    }
}

/// Decides whether a change can be applied in place or must fork.
#[derive(Debug)]
pub struct VersioningDecisionEngine;

impl VersioningDecisionEngine {
    /// Analyze a proposed change against the current version.
    ///
    /// With no active subscriptions every change is applied in place: there
    /// is nobody whose billing terms the current version still has to
    /// protect. Otherwise any change that alters what existing subscribers
    /// are billed or entitled to forces a fork. Purely additive feature
    /// links never force one, and a trial extension never forces one (it
    /// only benefits existing subscribers).
    pub fn analyze(
        snapshot: &ProductSnapshot,
        change: &ProductChangeSet,
        active_subscriptions: u64,
    ) -> VersioningDecision {
        if active_subscriptions == 0 {
            return VersioningDecision::in_place();
        }

        let mut reasons = Vec::new();

        for new_price in &change.new_prices {
            reasons.push(format!(
                "price added: {} every {} {:?}",
                new_price.currency,
                new_price.recurring_interval_count,
                new_price.recurring_interval,
            ));
        }

        for price_id in &change.archive_prices {
            if let Some(price) = snapshot.prices.iter().find(|p| p.id == *price_id) {
                reasons.push(format!(
                    "price archived: {} every {} {:?}",
                    price.currency, price.recurring_interval_count, price.recurring_interval,
                ));
            }
        }

        for feature_id in &change.detach_features {
            if let Some(linked) = snapshot.linked(*feature_id) {
                reasons.push(format!("feature unlinked: {}", linked.feature.name));
            }
        }

        for update in &change.update_features {
            let Some(linked) = snapshot.linked(update.feature_id) else {
                continue; // validation rejects this before any decision is acted on
            };
            let name = &linked.feature.name;
            let current = linked.link.config;

            if current.kind() != update.config.kind() {
                reasons.push(format!("feature '{name}' configuration changed"));
            } else if current.limit() != update.config.limit() {
                reasons.push(format!(
                    "feature '{name}' limit changed: {} -> {}",
                    describe_limit(current.limit()),
                    describe_limit(update.config.limit()),
                ));
            }

            if update.display_order != linked.link.display_order {
                reasons.push(format!("feature '{name}' display order changed"));
            }
        }

        if let Some(trial_days) = change.trial_days {
            if trial_days < snapshot.product.trial_days {
                reasons.push(format!(
                    "trial period decreased: {} -> {} days",
                    snapshot.product.trial_days, trial_days,
                ));
            }
        }

        VersioningDecision {
            requires_fork: !reasons.is_empty(),
            reasons,
        }
    }
}

fn describe_limit(limit: Option<u64>) -> String {
    match limit {
        Some(n) => n.to_string(),
        None => "unlimited".to_string(),
    }
}
