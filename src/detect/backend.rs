use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend is owned by one worker and sees that worker's frames in capture
/// order. It must treat the frame as read-only and must not retain it past
/// the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Coordinates are in frame pixels.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates one backend per stream worker.
pub trait DetectorFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn DetectorBackend>>;
}

impl<F> DetectorFactory for F
where
    F: Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn DetectorBackend>> {
        self()
    }
}
