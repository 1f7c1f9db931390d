//! Product versioning: fork-vs-mutate decisions and fork execution.
//!
//! A product version that already bills active subscribers is commercially
//! immutable. [`VersioningDecisionEngine`] decides whether a proposed change
//! can be applied in place or must fork a new version;
//! [`ProductVersionManager`] executes either path, keeping the lineage
//! invariants intact and mirroring the outcome to the payment processor
//! best-effort.

pub mod change;
pub mod decision;
pub mod manager;

pub use change::{FeatureAttachment, NewPrice, ProductChangeSet};
pub use decision::{ProductSnapshot, LinkedFeature, VersioningDecision, VersioningDecisionEngine};
pub use manager::{ProductVersionManager, VersioningPreview};
