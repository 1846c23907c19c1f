use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Stub backend for testing and model-less deployments.
///
/// Reports the same scripted detections for every frame. Boxes outside the
/// frame are clipped so annotation stays in bounds.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    detections: Vec<RawDetection>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<RawDetection>) -> Self {
        Self { detections }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let max_x = frame.width() as f32;
        let max_y = frame.height() as f32;
        Ok(self
            .detections
            .iter()
            .map(|d| RawDetection {
                x1: d.x1.clamp(0.0, max_x),
                y1: d.y1.clamp(0.0, max_y),
                x2: d.x2.clamp(0.0, max_x),
                y2: d.y2.clamp(0.0, max_y),
                ..d.clone()
            })
            .collect())
    }
}
