use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use crate::detect::backend::{DetectorBackend, DetectorFactory};

pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// No model: frames pass through with zero detections.
    #[default]
    Stub,
    Tract,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stub" | "none" => Ok(BackendKind::Stub),
            "tract" => Ok(BackendKind::Tract),
            other => Err(anyhow::anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Stub,
            model_path: None,
            input_size: 640,
        }
    }
}

impl DetectorSettings {
    /// Build the factory the supervisor hands to each worker. Model loading
    /// happens here, once, so a bad model path fails at startup.
    pub fn build_factory(&self) -> Result<Arc<dyn DetectorFactory>> {
        match self.backend {
            BackendKind::Stub => {
                log::warn!("no detection model configured; frames will carry zero detections");
                Ok(Arc::new(|| -> Result<Box<dyn DetectorBackend>> {
                    Ok(Box::new(StubBackend::new()))
                }))
            }
            BackendKind::Tract => self.tract_factory(),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn tract_factory(&self) -> Result<Arc<dyn DetectorFactory>> {
        let path = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("detector.model_path is required for the tract backend"))?;
        let backend = TractBackend::load(path, self.input_size)?;
        Ok(Arc::new(move || -> Result<Box<dyn DetectorBackend>> {
            Ok(Box::new(backend.clone()))
        }))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn tract_factory(&self) -> Result<Arc<dyn DetectorFactory>> {
        anyhow::bail!("tract backend requested but the backend-tract feature is disabled")
    }
}
