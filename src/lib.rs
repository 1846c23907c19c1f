//! Crowd Density Kernel
//!
//! This crate watches camera feeds, counts people per frame, turns the counts
//! into a crowd-density metric and streams annotated frames plus metrics to
//! subscribers, persisting a throttled subset of samples.
//!
//! # Architecture
//!
//! Each active camera gets one worker thread that owns its frame source and
//! runs the pipeline:
//!
//! 1. **Capture**: read a frame from a device, file or network source.
//! 2. **Detect**: find persons above a confidence floor.
//! 3. **Estimate**: derive person count and density, then the alert decision.
//! 4. **Annotate**: draw boxes and a metrics panel on a copy of the frame.
//! 5. **Publish**: JPEG + base64 encode and emit a `frame` event.
//! 6. **Persist**: append a density sample at most once per log interval.
//!
//! `StreamSupervisor` is the only cross-worker state. It guarantees at most one
//! worker per camera and stops workers cooperatively through a `StopSignal`.
//!
//! # Module Structure
//!
//! - `ingest`: source classification and frame sources
//! - `detect`, `density`, `annotate`: per-frame analysis
//! - `publish`, `storage`, `audit`: outbound events, metrics, lifecycle trail
//! - `stream`: worker, supervisor and control commands
//! - `api`: TCP control/event server

use rand::RngCore;

pub mod annotate;
pub mod api;
pub mod audit;
pub mod config;
pub mod density;
pub mod detect;
pub mod directory;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod publish;
pub mod storage;
pub mod stream;

pub use annotate::FrameAnnotator;
pub use audit::{AuditLog, InMemoryAuditLog, SqliteAuditLog};
pub use density::{check_threshold, DensityEngine, DensityEstimate, DensitySample};
pub use detect::{BoundingBox, Detection, DetectionAdapter, DetectorBackend, DetectorFactory};
pub use directory::{CameraDescriptor, CameraDirectory, StaticCameraDirectory};
pub use error::StreamError;
pub use frame::Frame;
pub use ingest::{
    DefaultSourceOpener, FrameSource, LocatorRules, SourceKind, SourceLocator, SourceOpener,
};
pub use publish::{EventHub, Publisher, StreamEvent};
pub use storage::{DensityRecord, InMemoryMetricStore, MetricStore, SqliteMetricStore};
pub use stream::{
    ControlCommand, PipelineSettings, StreamContext, StreamSupervisor, WorkerOutcome, WorkerState,
};

/// Unique shared-cache in-memory SQLite URI, so several connections (metrics
/// and audit) can see one database in tests and dry runs.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:crowd_kernel_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}
