//! Background retry of failed processor mirroring.
//!
//! Failed sync events are independently retryable: the worker periodically
//! scans the audit log, finds every (entity, id, operation) whose most
//! recent attempt failed, and re-attempts it. Best-effort, no ordering
//! guarantee relative to any caller's response.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use tollgate_catalog::{
    CatalogStore, StoreError, SyncEntity, SyncEvent, SyncOperation, SyncStatus,
};
use tollgate_core::{FeatureId, PriceId, ProductId};

use crate::adapter::ProcessorAdapter;
use crate::recorder::SyncRecorder;

/// Handle to control and join the retry worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[derive(Debug)]
pub struct SyncRetryWorker;

impl SyncRetryWorker {
    /// Spawn a worker thread that drains the failed-sync backlog every `tick`.
    pub fn spawn<S, P>(store: S, adapter: P, tick: Duration) -> WorkerHandle
    where
        S: CatalogStore + Clone + Send + 'static,
        P: ProcessorAdapter + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("sync-retry".to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(tick) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            match drain_failed_once(&store, &adapter) {
                                Ok(0) => {}
                                Ok(n) => debug!(retried = n, "sync backlog drained"),
                                Err(e) => warn!(error = %e, "sync backlog scan failed"),
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn sync retry worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

/// Retry every sync target whose latest attempt failed. Returns the number
/// of retries that succeeded. Callable directly for deterministic tests and
/// for manual reconciliation tooling.
pub fn drain_failed_once<S, P>(store: &S, adapter: &P) -> Result<usize, StoreError>
where
    S: CatalogStore + Clone,
    P: ProcessorAdapter,
{
    let events = store.sync_events()?;

    // Latest attempt wins per (entity, id, operation); the log is append-only
    // and in attempt order.
    let mut latest: HashMap<(SyncEntity, Uuid, SyncOperation), SyncEvent> = HashMap::new();
    for event in events {
        latest.insert((event.entity, event.entity_id, event.operation), event);
    }

    let recorder = SyncRecorder::new(store.clone());
    let mut succeeded = 0;
    let mut pending: Vec<SyncEvent> = latest
        .into_values()
        .filter(|e| e.status == SyncStatus::Failure)
        .collect();
    // Products before their prices and links, so a freshly minted product
    // ref is visible to dependent retries in the same pass.
    pending.sort_by_key(|e| (e.entity != SyncEntity::Product, e.occurred_at));

    for event in pending {
        if retry_one(store, adapter, &recorder, &event)? {
            succeeded += 1;
        }
    }
    Ok(succeeded)
}

fn retry_one<S, P>(
    store: &S,
    adapter: &P,
    recorder: &SyncRecorder<S>,
    event: &SyncEvent,
) -> Result<bool, StoreError>
where
    S: CatalogStore + Clone,
    P: ProcessorAdapter,
{
    match (event.entity, event.operation) {
        (SyncEntity::Product, SyncOperation::Create) => {
            let id = ProductId::from_uuid(event.entity_id);
            let Some(mut product) = store.product(id)? else {
                return Ok(false);
            };
            if product.external_ref.is_some() {
                return Ok(false); // reconciled elsewhere
            }
            let outcome = adapter.create_product(&product);
            recorder.record(
                SyncEntity::Product,
                event.entity_id,
                None,
                SyncOperation::Create,
                &outcome,
            );
            match outcome {
                Ok(external_ref) => {
                    product.external_ref = Some(external_ref);
                    store.update_product(product)?;
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        }
        (SyncEntity::Product, SyncOperation::Update) => {
            let id = ProductId::from_uuid(event.entity_id);
            let Some(product) = store.product(id)? else {
                return Ok(false);
            };
            let Some(external_ref) = product.external_ref.clone() else {
                debug!(product = %id, "skipping update retry: product not mirrored yet");
                return Ok(false);
            };
            let outcome = adapter.update_product(&external_ref, &product);
            recorder.record(
                SyncEntity::Product,
                event.entity_id,
                None,
                SyncOperation::Update,
                &outcome,
            );
            Ok(outcome.is_ok())
        }
        (SyncEntity::Price, operation) => retry_price(store, adapter, recorder, event, operation),
        (SyncEntity::Feature, operation) => {
            retry_feature(store, adapter, recorder, event, operation)
        }
        (entity, operation) => {
            debug!(?entity, ?operation, "no retry strategy for sync target");
            Ok(false)
        }
    }
}

fn retry_price<S, P>(
    store: &S,
    adapter: &P,
    recorder: &SyncRecorder<S>,
    event: &SyncEvent,
    operation: SyncOperation,
) -> Result<bool, StoreError>
where
    S: CatalogStore + Clone,
    P: ProcessorAdapter,
{
    let Some(product_id) = event.product_id else {
        return Ok(false);
    };
    let price_id = PriceId::from_uuid(event.entity_id);
    let Some(mut price) = store
        .prices_for_product(product_id)?
        .into_iter()
        .find(|p| p.id == price_id)
    else {
        return Ok(false);
    };

    match operation {
        SyncOperation::Create => {
            if price.external_ref.is_some() {
                return Ok(false);
            }
            let Some(product) = store.product(product_id)? else {
                return Ok(false);
            };
            let Some(product_ref) = product.external_ref else {
                debug!(price = %price_id, "skipping price retry: owning product not mirrored");
                return Ok(false);
            };
            let outcome = adapter.create_price(&product_ref, &price);
            recorder.record(
                SyncEntity::Price,
                event.entity_id,
                Some(product_id),
                SyncOperation::Create,
                &outcome,
            );
            match outcome {
                Ok(external_ref) => {
                    price.external_ref = Some(external_ref);
                    store.update_price(price)?;
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        }
        SyncOperation::Archive => {
            let Some(external_ref) = price.external_ref.clone() else {
                return Ok(false);
            };
            let outcome = adapter.archive_price(&external_ref);
            recorder.record(
                SyncEntity::Price,
                event.entity_id,
                Some(product_id),
                SyncOperation::Archive,
                &outcome,
            );
            Ok(outcome.is_ok())
        }
        _ => Ok(false),
    }
}

fn retry_feature<S, P>(
    store: &S,
    adapter: &P,
    recorder: &SyncRecorder<S>,
    event: &SyncEvent,
    operation: SyncOperation,
) -> Result<bool, StoreError>
where
    S: CatalogStore + Clone,
    P: ProcessorAdapter,
{
    let feature_id = FeatureId::from_uuid(event.entity_id);
    let Some(mut feature) = store.feature(feature_id)? else {
        return Ok(false);
    };

    match operation {
        SyncOperation::Create => {
            if feature.external_ref.is_some() {
                return Ok(false);
            }
            let outcome = adapter.create_feature(&feature);
            recorder.record(
                SyncEntity::Feature,
                event.entity_id,
                None,
                SyncOperation::Create,
                &outcome,
            );
            match outcome {
                Ok(external_ref) => {
                    feature.external_ref = Some(external_ref);
                    store.update_feature(feature)?;
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        }
        SyncOperation::Attach | SyncOperation::Detach => {
            let Some(product_id) = event.product_id else {
                return Ok(false);
            };
            let Some(product) = store.product(product_id)? else {
                return Ok(false);
            };
            let (Some(product_ref), Some(feature_ref)) =
                (product.external_ref, feature.external_ref)
            else {
                debug!(feature = %feature_id, "skipping link retry: refs not mirrored yet");
                return Ok(false);
            };
            let outcome = if operation == SyncOperation::Attach {
                adapter.attach_feature(&product_ref, &feature_ref)
            } else {
                adapter.detach_feature(&product_ref, &feature_ref)
            };
            recorder.record(
                SyncEntity::Feature,
                event.entity_id,
                Some(product_id),
                operation,
                &outcome,
            );
            Ok(outcome.is_ok())
        }
        _ => Ok(false),
    }
}
