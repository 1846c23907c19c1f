//! Error taxonomy for stream control and the per-camera pipeline.
//!
//! Backends, storage and config use `anyhow::Result` internally. Errors are
//! mapped onto `StreamError` where they cross into the supervisor or a worker,
//! because callers and subscribers have to tell the failure kinds apart.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The camera's source locator is empty or matches no known kind.
    #[error("invalid source locator '{locator}': {reason}")]
    InvalidSourceLocator { locator: String, reason: String },

    #[error("camera not found: {0}")]
    CameraNotFound(String),

    #[error("stream already active for camera {0}")]
    AlreadyActive(String),

    #[error("alert threshold must be a finite value in [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("video file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("could not open video source {locator}: {reason}")]
    SourceUnavailable { locator: String, reason: String },

    /// Raised after `failures` consecutive read failures on a live source.
    #[error("connection lost after {failures} consecutive read failures")]
    ConnectionLost { failures: u32 },

    #[error("failed to publish {event} event: {reason}")]
    PublishFailure { event: &'static str, reason: String },

    #[error("failed to persist density sample: {0}")]
    PersistFailure(String),

    #[error("failed to encode annotated frame: {0}")]
    EncodeFailure(String),

    #[error("failed to spawn stream worker for camera {camera_id}: {reason}")]
    WorkerSpawn { camera_id: String, reason: String },
}

impl StreamError {
    pub(crate) fn invalid_locator(locator: &str, reason: impl Into<String>) -> Self {
        StreamError::InvalidSourceLocator {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(locator: impl Into<String>, reason: impl ToString) -> Self {
        StreamError::SourceUnavailable {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}
