//! Entitlement resolution and usage-quota tracking.
//!
//! [`EntitlementResolver`] answers "does customer X currently have feature
//! Y, and how much quota is left" without mutating anything.
//! [`UsageQuotaTracker`] consumes quota atomically and never lets a billing
//! period run past its limit. [`GrantProvisioner`] wires both up at the
//! subscription boundary: activation mints grants and opens usage periods,
//! ending a subscription revokes them.

pub mod provisioning;
pub mod resolver;
pub mod tracker;

pub use provisioning::GrantProvisioner;
pub use resolver::{AccessReason, EntitlementResolver, EntitlementResult};
pub use tracker::{TrackReceipt, UsageQuotaTracker, MAX_CAS_ATTEMPTS};
