//! Processor adapter boundary.

use std::sync::Arc;

use thiserror::Error;

use tollgate_catalog::{Feature, Price, Product};

/// Processor call failure.
///
/// These never abort a local commit; callers record them as sync events and
/// move on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Transient transport/availability failure; worth retrying.
    #[error("processor unavailable: {0}")]
    Unavailable(String),

    /// The processor rejected the request; retrying the same payload is
    /// pointless without reconciliation.
    #[error("processor rejected request: {0}")]
    Rejected(String),
}

/// Interface to the external payment processor.
///
/// All calls are best-effort from the engine's perspective and independently
/// retryable. `create_*` calls return the processor-side object id, stored
/// locally as `external_ref`; the remaining calls take that ref back.
pub trait ProcessorAdapter: Send + Sync {
    fn create_product(&self, product: &Product) -> Result<String, ProcessorError>;
    fn update_product(&self, external_ref: &str, product: &Product) -> Result<(), ProcessorError>;
    fn archive_product(&self, external_ref: &str) -> Result<(), ProcessorError>;

    fn create_price(&self, product_ref: &str, price: &Price) -> Result<String, ProcessorError>;
    fn archive_price(&self, external_ref: &str) -> Result<(), ProcessorError>;

    fn create_feature(&self, feature: &Feature) -> Result<String, ProcessorError>;
    fn update_feature(&self, external_ref: &str, feature: &Feature) -> Result<(), ProcessorError>;
    fn archive_feature(&self, external_ref: &str) -> Result<(), ProcessorError>;

    fn attach_feature(
        &self,
        product_ref: &str,
        feature_ref: &str,
    ) -> Result<(), ProcessorError>;
    fn detach_feature(
        &self,
        product_ref: &str,
        feature_ref: &str,
    ) -> Result<(), ProcessorError>;
}

impl<P> ProcessorAdapter for Arc<P>
where
    P: ProcessorAdapter + ?Sized,
{
    fn create_product(&self, product: &Product) -> Result<String, ProcessorError> {
        (**self).create_product(product)
    }

    fn update_product(&self, external_ref: &str, product: &Product) -> Result<(), ProcessorError> {
        (**self).update_product(external_ref, product)
    }

    fn archive_product(&self, external_ref: &str) -> Result<(), ProcessorError> {
        (**self).archive_product(external_ref)
    }

    fn create_price(&self, product_ref: &str, price: &Price) -> Result<String, ProcessorError> {
        (**self).create_price(product_ref, price)
    }

    fn archive_price(&self, external_ref: &str) -> Result<(), ProcessorError> {
        (**self).archive_price(external_ref)
    }

    fn create_feature(&self, feature: &Feature) -> Result<String, ProcessorError> {
        (**self).create_feature(feature)
    }

    fn update_feature(&self, external_ref: &str, feature: &Feature) -> Result<(), ProcessorError> {
        (**self).update_feature(external_ref, feature)
    }

    fn archive_feature(&self, external_ref: &str) -> Result<(), ProcessorError> {
        (**self).archive_feature(external_ref)
    }

    fn attach_feature(&self, product_ref: &str, feature_ref: &str) -> Result<(), ProcessorError> {
        (**self).attach_feature(product_ref, feature_ref)
    }

    fn detach_feature(&self, product_ref: &str, feature_ref: &str) -> Result<(), ProcessorError> {
        (**self).detach_feature(product_ref, feature_ref)
    }
}
