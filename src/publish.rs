//! Outbound events and their fan-out.
//!
//! Events serialise as `{"event": "<name>", "payload": {...}}`. The hub gives
//! each subscriber a bounded queue; a subscriber that falls behind misses
//! frames instead of stalling the worker that emits them.

use std::io::Cursor;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::density::DensityEstimate;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected {
        message: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        camera_id: Option<String>,
        message: String,
    },
    Frame(FramePayload),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub camera_id: String,
    /// Base64 JPEG.
    pub frame: String,
    pub density: DensityEstimate,
    pub alert: bool,
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Frame(_) => "frame",
        }
    }

    pub fn error(camera_id: Option<&str>, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            camera_id: camera_id.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn camera_id(&self) -> Option<&str> {
        match self {
            StreamEvent::Connected { .. } => None,
            StreamEvent::Error { camera_id, .. } => camera_id.as_deref(),
            StreamEvent::Frame(payload) => Some(&payload.camera_id),
        }
    }
}

/// Sink for stream events. Implementations may block on backpressure but
/// must return an error rather than hang forever on a dead transport.
pub trait Publisher: Send + Sync {
    fn emit(&self, event: &StreamEvent) -> Result<()>;
}

/// In-process fan-out to any number of subscribers.
pub struct EventHub {
    subscribers: Mutex<Vec<SyncSender<Arc<StreamEvent>>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber with room for `capacity` undelivered events.
    pub fn subscribe(&self, capacity: usize) -> Receiver<Arc<StreamEvent>> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Publisher for EventHub {
    fn emit(&self, event: &StreamEvent) -> Result<()> {
        let event = Arc::new(event.clone());
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| anyhow!("event hub lock poisoned"))?;
        subscribers.retain(|tx| match tx.try_send(Arc::clone(&event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("subscriber lagging; dropped {} event", event.name());
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        Ok(())
    }
}

/// JPEG-encode an RGB image and wrap it in standard base64.
pub fn encode_jpeg_base64(image: &RgbImage, quality: u8) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .context("jpeg encode")?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.into_inner()))
}
