use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, ObjectClass, RawDetection};
use crate::frame::Frame;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

/// Uniform `detect(frame) -> [Detection]` over any backend.
///
/// Only persons at or above the confidence threshold pass. Backend failures
/// are logged and yield an empty result, so a flaky model never stops a stream.
pub struct DetectionAdapter {
    backend: Option<Box<dyn DetectorBackend>>,
    confidence_threshold: f32,
}

impl DetectionAdapter {
    pub fn new(backend: Box<dyn DetectorBackend>, confidence_threshold: f32) -> Self {
        Self {
            backend: Some(backend),
            confidence_threshold,
        }
    }

    /// Adapter with no model; every frame yields nothing.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("none", |b| b.name())
    }

    pub fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        let Some(backend) = self.backend.as_mut() else {
            return Vec::new();
        };
        match backend.detect(frame) {
            Ok(raw) => filter_persons(raw, self.confidence_threshold, frame),
            Err(err) => {
                log::warn!(
                    "detector {} failed on frame {}: {:#}",
                    backend.name(),
                    frame.sequence,
                    err
                );
                Vec::new()
            }
        }
    }
}

/// Boxes are clamped to the frame, then truncated toward zero.
fn filter_persons(raw: Vec<RawDetection>, threshold: f32, frame: &Frame) -> Vec<Detection> {
    let max_x = frame.width() as f32;
    let max_y = frame.height() as f32;
    raw.into_iter()
        .filter(|d| d.class == ObjectClass::Person && d.confidence >= threshold)
        .map(|d| Detection {
            bbox: BoundingBox::new(
                d.x1.clamp(0.0, max_x) as i32,
                d.y1.clamp(0.0, max_y) as i32,
                d.x2.clamp(0.0, max_x) as i32,
                d.y2.clamp(0.0, max_y) as i32,
            ),
            confidence: d.confidence,
        })
        .collect()
}
