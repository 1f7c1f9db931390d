//! In-memory processor for tests/dev.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tollgate_catalog::{Feature, Price, Product};

use crate::adapter::{ProcessorAdapter, ProcessorError};

/// One observed adapter call: operation name plus the local entity rendered
/// as a string (enough for assertions without reifying every payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: &'static str,
    pub subject: String,
}

/// In-memory [`ProcessorAdapter`] that records every call and can be told to
/// fail specific operations.
///
/// Intended for tests/dev, mirrors are fabricated as `proc_<op>_<n>` ids.
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    calls: Mutex<Vec<RecordedCall>>,
    failing: Mutex<HashSet<&'static str>>,
    refs: AtomicU64,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call to `operation` fail as `Unavailable`.
    pub fn fail_on(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation);
        }
    }

    pub fn recover(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(operation);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, operation: &'static str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn observe(
        &self,
        operation: &'static str,
        subject: impl Into<String>,
    ) -> Result<(), ProcessorError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                operation,
                subject: subject.into(),
            });
        }
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(operation))
            .unwrap_or(false);
        if failing {
            return Err(ProcessorError::Unavailable(format!(
                "scripted failure for {operation}"
            )));
        }
        Ok(())
    }

    fn mint_ref(&self, operation: &'static str) -> String {
        let n = self.refs.fetch_add(1, Ordering::Relaxed) + 1;
        format!("proc_{operation}_{n}")
    }
}

impl ProcessorAdapter for RecordingProcessor {
    fn create_product(&self, product: &Product) -> Result<String, ProcessorError> {
        self.observe("create_product", product.id.to_string())?;
        Ok(self.mint_ref("product"))
    }

    fn update_product(&self, external_ref: &str, _product: &Product) -> Result<(), ProcessorError> {
        self.observe("update_product", external_ref)
    }

    fn archive_product(&self, external_ref: &str) -> Result<(), ProcessorError> {
        self.observe("archive_product", external_ref)
    }

    fn create_price(&self, product_ref: &str, price: &Price) -> Result<String, ProcessorError> {
        self.observe("create_price", format!("{product_ref}/{}", price.id))?;
        Ok(self.mint_ref("price"))
    }

    fn archive_price(&self, external_ref: &str) -> Result<(), ProcessorError> {
        self.observe("archive_price", external_ref)
    }

    fn create_feature(&self, feature: &Feature) -> Result<String, ProcessorError> {
        self.observe("create_feature", feature.name.clone())?;
        Ok(self.mint_ref("feature"))
    }

    fn update_feature(&self, external_ref: &str, _feature: &Feature) -> Result<(), ProcessorError> {
        self.observe("update_feature", external_ref)
    }

    fn archive_feature(&self, external_ref: &str) -> Result<(), ProcessorError> {
        self.observe("archive_feature", external_ref)
    }

    fn attach_feature(&self, product_ref: &str, feature_ref: &str) -> Result<(), ProcessorError> {
        self.observe("attach_feature", format!("{product_ref}/{feature_ref}"))
    }

    fn detach_feature(&self, product_ref: &str, feature_ref: &str) -> Result<(), ProcessorError> {
        self.observe("detach_feature", format!("{product_ref}/{feature_ref}"))
    }
}
