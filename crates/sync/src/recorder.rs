//! Sync-event bookkeeping.

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use tollgate_catalog::{
    CatalogStore, SyncEntity, SyncEvent, SyncOperation, SyncStatus,
};
use tollgate_core::{ProductId, SyncEventId};

use crate::adapter::ProcessorError;

/// Appends one audit record per mirroring attempt.
///
/// Recording is itself best-effort: a store failure here is logged and
/// swallowed, because the mirroring attempt already happened and the local
/// commit must not be disturbed by audit bookkeeping.
#[derive(Debug, Clone)]
pub struct SyncRecorder<S> {
    store: S,
}

impl<S: CatalogStore> SyncRecorder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Record the outcome of one processor call.
    pub fn record<T>(
        &self,
        entity: SyncEntity,
        entity_id: Uuid,
        product_id: Option<ProductId>,
        operation: SyncOperation,
        outcome: &Result<T, ProcessorError>,
    ) {
        let (status, error) = match outcome {
            Ok(_) => (SyncStatus::Success, None),
            Err(e) => (SyncStatus::Failure, Some(e.to_string())),
        };
        let event = SyncEvent {
            id: SyncEventId::new(),
            entity,
            entity_id,
            product_id,
            operation,
            status,
            error,
            occurred_at: Utc::now(),
        };
        if let Err(store_err) = self.store.append_sync_event(event) {
            warn!(
                ?entity,
                %entity_id,
                ?operation,
                error = %store_err,
                "failed to append sync event"
            );
        }
    }
}
