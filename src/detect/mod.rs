//! Person detection.
//!
//! Backends wrap an external detector capability and report every object they
//! see. `DetectionAdapter` narrows that to persons above a confidence floor,
//! in the integer pixel boxes the density heuristic expects.

mod adapter;
mod backend;
mod backends;
mod result;

pub use adapter::{DetectionAdapter, DEFAULT_CONFIDENCE_THRESHOLD};
pub use backend::{DetectorBackend, DetectorFactory};
pub use backends::{BackendKind, DetectorSettings, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection, ObjectClass, RawDetection};
