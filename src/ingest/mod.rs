//! Frame ingestion sources.
//!
//! A camera's source locator is classified into exactly one `SourceLocator`
//! kind before any worker exists:
//! - all digits: a local capture device index (feature: ingest-v4l2)
//! - `http://`, `https://`, `rtsp://`: a network stream (features: ingest-http, rtsp-gstreamer)
//! - a path ending in a known video extension: a local file (feature: ingest-file-ffmpeg)
//! - anything else: rejected, unless generic URLs are explicitly allowed
//!
//! Opening happens on the worker thread through a `SourceOpener`. Every source
//! owns its capture handle and releases it on drop.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use crate::error::StreamError;
use crate::frame::Frame;

#[cfg(feature = "ingest-v4l2")]
pub mod device;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-http")]
pub mod http;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod synthetic;

pub use file::FileSource;
pub use synthetic::SyntheticSource;

/// Extensions treated as local video files (compared case-insensitively).
pub const VIDEO_EXTENSIONS: [&str; 5] = [".mp4", ".avi", ".mov", ".mkv", ".flv"];

const NETWORK_SCHEMES: [&str; 3] = ["http://", "https://", "rtsp://"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Device,
    File,
    Network,
}

impl SourceKind {
    /// Live sources retry on read failure; files treat it as end of stream.
    pub fn is_live(self) -> bool {
        !matches!(self, SourceKind::File)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocator {
    Device(u32),
    File(PathBuf),
    Network(String),
}

/// Inputs to classification that come from configuration.
#[derive(Clone, Debug)]
pub struct LocatorRules {
    /// Relative file locators resolve against this directory.
    pub video_root: PathBuf,
    /// Accept locators matching no rule as opaque network URLs.
    pub allow_generic_urls: bool,
}

impl Default for LocatorRules {
    fn default() -> Self {
        Self {
            video_root: PathBuf::from("videos"),
            allow_generic_urls: false,
        }
    }
}

impl SourceLocator {
    /// Classify a raw locator string. Rules are checked in order: digits,
    /// network scheme, video extension, generic fallback.
    pub fn classify(raw: &str, rules: &LocatorRules) -> Result<Self, StreamError> {
        let locator = raw.trim();
        if locator.is_empty() {
            return Err(StreamError::invalid_locator(raw, "locator is empty"));
        }

        if locator.bytes().all(|b| b.is_ascii_digit()) {
            let index = locator
                .parse::<u32>()
                .map_err(|_| StreamError::invalid_locator(raw, "device index out of range"))?;
            return Ok(SourceLocator::Device(index));
        }

        let lowered = locator.to_ascii_lowercase();
        if NETWORK_SCHEMES
            .iter()
            .any(|scheme| lowered.starts_with(scheme))
        {
            return Ok(SourceLocator::Network(locator.to_string()));
        }

        if VIDEO_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
            return Ok(SourceLocator::File(resolve_video_path(
                locator,
                &rules.video_root,
            )));
        }

        if rules.allow_generic_urls {
            return Ok(SourceLocator::Network(locator.to_string()));
        }

        Err(StreamError::invalid_locator(
            raw,
            "use a number (0, 1, 2...) for a local camera, an http(s)/rtsp URL for an IP camera, \
             or a video filename such as \"demo.mp4\" in the videos folder",
        ))
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceLocator::Device(_) => SourceKind::Device,
            SourceLocator::File(_) => SourceKind::File,
            SourceLocator::Network(_) => SourceKind::Network,
        }
    }
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceLocator::Device(index) => write!(f, "device:{}", index),
            SourceLocator::File(path) => write!(f, "{}", path.display()),
            SourceLocator::Network(url) => write!(f, "{}", url),
        }
    }
}

fn resolve_video_path(locator: &str, video_root: &Path) -> PathBuf {
    let path = Path::new(locator);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        video_root.join(path)
    }
}

/// Statistics for any frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A opened capture handle owned by exactly one worker.
pub trait FrameSource: Send {
    fn kind(&self) -> SourceKind;

    /// Read the next frame. `Ok(None)` means the source has no more frames.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Seek back to the first frame. Only file sources support this.
    fn rewind(&mut self) -> Result<()> {
        Err(anyhow!("{:?} sources cannot rewind", self.kind()))
    }

    fn stats(&self) -> SourceStats;
}

/// Opens a classified locator into a live `FrameSource`.
pub trait SourceOpener: Send + Sync {
    fn open(&self, locator: &SourceLocator) -> Result<Box<dyn FrameSource>, StreamError>;
}

/// Capture parameters handed to the built-in backends.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub target_fps: u32,
    /// Requested resolution for local capture devices.
    pub device_width: u32,
    pub device_height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            target_fps: 10,
            device_width: 640,
            device_height: 480,
        }
    }
}

/// Opener wiring each kind to the backend compiled into this build.
#[derive(Clone, Debug, Default)]
pub struct DefaultSourceOpener {
    settings: CaptureSettings,
}

impl DefaultSourceOpener {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }

    fn open_device(&self, index: u32) -> Result<Box<dyn FrameSource>, StreamError> {
        #[cfg(feature = "ingest-v4l2")]
        {
            let config = device::DeviceConfig {
                index,
                target_fps: self.settings.target_fps,
                width: self.settings.device_width,
                height: self.settings.device_height,
            };
            let source = device::DeviceSource::open(config).map_err(|e| {
                StreamError::unavailable(
                    format!("device:{}", index),
                    format!("could not open camera {}: {:#}", index, e),
                )
            })?;
            Ok(Box::new(source))
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(StreamError::unavailable(
                format!("device:{}", index),
                "local camera capture requires the ingest-v4l2 feature",
            ))
        }
    }

    fn open_network(&self, url: &str) -> Result<Box<dyn FrameSource>, StreamError> {
        let lowered = url.to_ascii_lowercase();
        if lowered.starts_with("stub://") {
            return Ok(Box::new(SyntheticSource::new(url, 640, 480)));
        }
        if lowered.starts_with("rtsp://") {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                let source = rtsp::RtspSource::open(url, self.settings.target_fps)
                    .map_err(|e| StreamError::unavailable(url, format!("{:#}", e)))?;
                return Ok(Box::new(source));
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                return Err(StreamError::unavailable(
                    url,
                    "RTSP requires the rtsp-gstreamer feature",
                ));
            }
        }
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            #[cfg(feature = "ingest-http")]
            {
                let source = http::HttpSource::open(url, self.settings.target_fps)
                    .map_err(|e| StreamError::unavailable(url, format!("{:#}", e)))?;
                return Ok(Box::new(source));
            }
            #[cfg(not(feature = "ingest-http"))]
            {
                return Err(StreamError::unavailable(
                    url,
                    "HTTP streams require the ingest-http feature",
                ));
            }
        }
        Err(StreamError::unavailable(url, "unsupported URL scheme"))
    }
}

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, locator: &SourceLocator) -> Result<Box<dyn FrameSource>, StreamError> {
        match locator {
            SourceLocator::Device(index) => self.open_device(*index),
            SourceLocator::File(path) => {
                if !path.exists() {
                    return Err(StreamError::FileNotFound(path.clone()));
                }
                let source = FileSource::open(path).map_err(|e| {
                    StreamError::unavailable(
                        path.display().to_string(),
                        format!("check that it is a valid video: {:#}", e),
                    )
                })?;
                Ok(Box::new(source))
            }
            SourceLocator::Network(url) => self.open_network(url),
        }
    }
}
