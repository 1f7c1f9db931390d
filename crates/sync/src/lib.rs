//! Payment-processor mirroring.
//!
//! Catalog objects are mirrored to the external payment processor on a
//! best-effort basis: mirroring runs outside the local transaction, every
//! attempt is recorded as an append-only [`tollgate_catalog::SyncEvent`],
//! and failures are left for the background retry worker instead of rolling
//! anything back.

pub mod adapter;
pub mod recorder;
pub mod recording;
pub mod worker;

pub use adapter::{ProcessorAdapter, ProcessorError};
pub use recorder::SyncRecorder;
pub use recording::RecordingProcessor;
pub use worker::{SyncRetryWorker, WorkerHandle, drain_failed_once};
