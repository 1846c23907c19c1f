use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::detect::{BackendKind, DetectorSettings};
use crate::directory::{CameraDescriptor, StaticCameraDirectory};
use crate::ingest::LocatorRules;
use crate::stream::{EofPolicy, PipelineSettings};

const DEFAULT_DB_PATH: &str = "crowd.db";
const DEFAULT_VIDEO_ROOT: &str = "videos";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8890";
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 7;
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct CrowdConfigFile {
    db_path: Option<String>,
    video_root: Option<PathBuf>,
    allow_generic_urls: Option<bool>,
    api: Option<ApiConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    detector: Option<DetectorConfigFile>,
    retention: Option<RetentionConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    density_threshold: Option<f64>,
    confidence_threshold: Option<f32>,
    reference_area_sqm: Option<f64>,
    log_interval_secs: Option<f64>,
    target_fps: Option<u32>,
    max_frame_width: Option<u32>,
    jpeg_quality: Option<u8>,
    max_consecutive_failures: Option<u32>,
    retry_delay_ms: Option<u64>,
    file_eof: Option<EofPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<BackendKind>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RetentionConfigFile {
    seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    id: String,
    url: String,
    name: Option<String>,
    location: Option<String>,
    #[serde(default)]
    autostart: bool,
    threshold: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CrowdConfig {
    pub db_path: String,
    pub video_root: PathBuf,
    pub allow_generic_urls: bool,
    pub api_addr: String,
    pub pipeline: PipelineSettings,
    pub detector: DetectorSettings,
    pub retention: Duration,
    pub cameras: Vec<CameraSettings>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub descriptor: CameraDescriptor,
    /// Start streaming as soon as the daemon is up.
    pub autostart: bool,
    /// Per-camera alert threshold; falls back to the pipeline default.
    pub threshold: Option<f64>,
}

impl CrowdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CROWD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn locator_rules(&self) -> LocatorRules {
        LocatorRules {
            video_root: self.video_root.clone(),
            allow_generic_urls: self.allow_generic_urls,
        }
    }

    pub fn directory(&self) -> StaticCameraDirectory {
        StaticCameraDirectory::new(self.cameras.iter().map(|c| c.descriptor.clone()))
    }

    fn from_file(file: CrowdConfigFile) -> Result<Self> {
        let defaults = PipelineSettings::default();
        let p = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            default_threshold: p.density_threshold.unwrap_or(defaults.default_threshold),
            confidence_threshold: p
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            reference_area_sqm: p.reference_area_sqm.unwrap_or(defaults.reference_area_sqm),
            log_interval: match p.log_interval_secs {
                Some(secs) => secs_to_duration("pipeline.log_interval_secs", secs)?,
                None => defaults.log_interval,
            },
            target_fps: p.target_fps.unwrap_or(defaults.target_fps),
            max_frame_width: p.max_frame_width.unwrap_or(defaults.max_frame_width),
            jpeg_quality: p.jpeg_quality.unwrap_or(defaults.jpeg_quality),
            max_consecutive_failures: p
                .max_consecutive_failures
                .unwrap_or(defaults.max_consecutive_failures),
            retry_delay: p
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            file_eof: p.file_eof.unwrap_or(defaults.file_eof),
        };

        let d = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            // A model path alone implies the tract backend.
            backend: d.backend.unwrap_or(if d.model_path.is_some() {
                BackendKind::Tract
            } else {
                BackendKind::Stub
            }),
            model_path: d.model_path,
            input_size: d.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        };

        let cameras = file
            .cameras
            .unwrap_or_default()
            .into_iter()
            .map(|c| CameraSettings {
                descriptor: CameraDescriptor {
                    display_name: c.name.unwrap_or_else(|| c.id.clone()),
                    location: c.location.unwrap_or_default(),
                    source_locator: c.url,
                    id: c.id,
                },
                autostart: c.autostart,
                threshold: c.threshold,
            })
            .collect();

        Ok(Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            video_root: file
                .video_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VIDEO_ROOT)),
            allow_generic_urls: file.allow_generic_urls.unwrap_or(false),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            pipeline,
            detector,
            retention: Duration::from_secs(
                file.retention
                    .and_then(|retention| retention.seconds)
                    .unwrap_or(DEFAULT_RETENTION_SECS),
            ),
            cameras,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_nonempty("CROWD_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = env_nonempty("CROWD_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(root) = env_nonempty("CROWD_VIDEO_ROOT") {
            self.video_root = PathBuf::from(root);
        }
        if let Some(threshold) = env_nonempty("CROWD_DENSITY_THRESHOLD") {
            self.pipeline.default_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("CROWD_DENSITY_THRESHOLD must be a number"))?;
        }
        if let Some(policy) = env_nonempty("CROWD_FILE_EOF") {
            self.pipeline.file_eof = policy.parse()?;
        }
        if let Some(secs) = env_nonempty("CROWD_LOG_INTERVAL_SECS") {
            let secs: f64 = secs
                .parse()
                .map_err(|_| anyhow!("CROWD_LOG_INTERVAL_SECS must be a number of seconds"))?;
            self.pipeline.log_interval = secs_to_duration("CROWD_LOG_INTERVAL_SECS", secs)?;
        }
        if let Some(model) = env_nonempty("CROWD_DETECTOR_MODEL") {
            self.detector.model_path = Some(PathBuf::from(model));
            self.detector.backend = BackendKind::Tract;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_threshold("pipeline.density_threshold", self.pipeline.default_threshold)?;
        validate_threshold(
            "pipeline.confidence_threshold",
            self.pipeline.confidence_threshold as f64,
        )?;
        if !(self.pipeline.reference_area_sqm > 0.0) {
            return Err(anyhow!("pipeline.reference_area_sqm must be positive"));
        }
        if self.pipeline.log_interval.is_zero() {
            return Err(anyhow!("pipeline.log_interval_secs must be greater than zero"));
        }
        if self.pipeline.max_consecutive_failures == 0 {
            return Err(anyhow!("pipeline.max_consecutive_failures must be at least 1"));
        }
        if !(1..=100).contains(&self.pipeline.jpeg_quality) {
            return Err(anyhow!("pipeline.jpeg_quality must be within 1..=100"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be positive"));
        }
        if self.retention.as_secs() == 0 {
            return Err(anyhow!("retention must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            validate_camera_id(&camera.descriptor.id)?;
            if !seen.insert(camera.descriptor.id.as_str()) {
                return Err(anyhow!("duplicate camera id '{}'", camera.descriptor.id));
            }
            if camera.descriptor.source_locator.trim().is_empty() {
                return Err(anyhow!("camera '{}' has an empty url", camera.descriptor.id));
            }
            if let Some(threshold) = camera.threshold {
                validate_threshold(&format!("cameras[{}].threshold", camera.descriptor.id), threshold)?;
            }
        }
        Ok(())
    }
}

pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    static CAMERA_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAMERA_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_.:-]{1,64}$").unwrap());
    if !re.is_match(camera_id) {
        return Err(anyhow!("invalid camera id '{}'", camera_id));
    }
    Ok(())
}

fn validate_threshold(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

fn secs_to_duration(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds", name))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<CrowdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_ids_follow_pattern() {
        assert!(validate_camera_id("lobby-1").is_ok());
        assert!(validate_camera_id("site:gate_2.north").is_ok());
        assert!(validate_camera_id("").is_err());
        assert!(validate_camera_id("has space").is_err());
        assert!(validate_camera_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = CrowdConfig::from_file(CrowdConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.db_path, "crowd.db");
        assert_eq!(cfg.api_addr, "127.0.0.1:8890");
        assert_eq!(cfg.pipeline.default_threshold, 0.65);
        assert_eq!(cfg.pipeline.log_interval, Duration::from_secs(5));
        assert_eq!(cfg.pipeline.file_eof, EofPolicy::Stop);
        assert_eq!(cfg.detector.backend, BackendKind::Stub);
        assert!(cfg.cameras.is_empty());
    }

    #[test]
    fn duplicate_camera_ids_are_rejected() {
        let file: CrowdConfigFile = serde_json::from_str(
            r#"{"cameras": [{"id": "a", "url": "0"}, {"id": "a", "url": "1"}]}"#,
        )
        .unwrap();
        let cfg = CrowdConfig::from_file(file).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        let file: CrowdConfigFile =
            serde_json::from_str(r#"{"pipeline": {"density_threshold": 1.5}}"#).unwrap();
        assert!(CrowdConfig::from_file(file).unwrap().validate().is_err());
    }
}
