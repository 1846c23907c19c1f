//! Camera lookup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: String,
    pub source_locator: String,
    pub display_name: String,
    pub location: String,
}

pub trait CameraDirectory: Send + Sync {
    fn find_by_id(&self, camera_id: &str) -> Option<CameraDescriptor>;
}

/// Directory fixed at construction time, typically from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticCameraDirectory {
    cameras: HashMap<String, CameraDescriptor>,
}

impl StaticCameraDirectory {
    pub fn new(cameras: impl IntoIterator<Item = CameraDescriptor>) -> Self {
        Self {
            cameras: cameras.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

impl CameraDirectory for StaticCameraDirectory {
    fn find_by_id(&self, camera_id: &str) -> Option<CameraDescriptor> {
        self.cameras.get(camera_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_known_cameras_only() {
        let directory = StaticCameraDirectory::new([CameraDescriptor {
            id: "lobby".to_string(),
            source_locator: "0".to_string(),
            display_name: "Lobby".to_string(),
            location: "Ground floor".to_string(),
        }]);
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.find_by_id("lobby").unwrap().source_locator, "0");
        assert!(directory.find_by_id("garage").is_none());
    }
}
