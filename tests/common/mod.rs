//! Shared fixtures: scripted sources, a recording publisher and a harness
//! wiring them into a supervisor.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crowd_kernel::detect::{ObjectClass, RawDetection, StubBackend};
use crowd_kernel::ingest::SourceStats;
use crowd_kernel::{
    CameraDescriptor, DetectorBackend, DetectorFactory, Frame, FrameSource, InMemoryAuditLog,
    InMemoryMetricStore, LocatorRules, PipelineSettings, Publisher, SourceKind, SourceLocator,
    SourceOpener, StaticCameraDirectory, StreamContext, StreamError, StreamEvent,
    StreamSupervisor,
};

pub const LIVE_CAMERA: &str = "cam-live";
pub const FILE_CAMERA: &str = "cam-file";
pub const BROKEN_CAMERA: &str = "cam-broken";

#[derive(Clone, Copy, Debug)]
pub enum Step {
    Frame,
    Fail,
    End,
}

pub struct ScriptedSource {
    kind: SourceKind,
    script: Vec<Step>,
    steps: VecDeque<Step>,
    then: Step,
    rewindable: bool,
    width: u32,
    height: u32,
    produced: u64,
    live: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.steps.pop_front().unwrap_or(self.then) {
            Step::Frame => {
                self.produced += 1;
                Ok(Some(Frame::blank(self.width, self.height, [90, 90, 90], self.produced)))
            }
            Step::Fail => Err(anyhow!("scripted read failure")),
            Step::End => Ok(None),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.rewindable {
            return Err(anyhow!("scripted source cannot rewind"));
        }
        self.steps = self.script.iter().copied().collect();
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.produced,
            source: "scripted".to_string(),
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hands out scripted sources; counts opens and currently open handles.
pub struct ScriptedOpener {
    steps: Vec<Step>,
    then: Step,
    width: u32,
    height: u32,
    rewindable: bool,
    pub opens: AtomicUsize,
    pub live: Arc<AtomicUsize>,
}

impl ScriptedOpener {
    pub fn new(steps: Vec<Step>, then: Step) -> Self {
        Self {
            steps,
            then,
            width: 800,
            height: 600,
            rewindable: false,
            opens: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A live source that never runs dry.
    pub fn endless() -> Self {
        Self::new(Vec::new(), Step::Frame)
    }

    /// Sources replay their script from the start on `rewind`.
    pub fn rewindable(mut self) -> Self {
        self.rewindable = true;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl SourceOpener for ScriptedOpener {
    fn open(&self, locator: &SourceLocator) -> Result<Box<dyn FrameSource>, StreamError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            kind: locator.kind(),
            script: self.steps.clone(),
            steps: self.steps.iter().copied().collect(),
            then: self.then,
            rewindable: self.rewindable,
            width: self.width,
            height: self.height,
            produced: 0,
            live: self.live.clone(),
        }))
    }
}

/// Records every event; can be told to reject frame events.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<StreamEvent>>,
    fail_frames: AtomicBool,
}

impl RecordingPublisher {
    pub fn failing_frames() -> Self {
        let publisher = Self::default();
        publisher.fail_frames.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn frames_for(&self, camera_id: &str) -> Vec<StreamEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == "frame" && e.camera_id() == Some(camera_id))
            .collect()
    }

    pub fn errors_for(&self, camera_id: Option<&str>) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Error {
                    camera_id: id,
                    message,
                } if id.as_deref() == camera_id => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl Publisher for RecordingPublisher {
    fn emit(&self, event: &StreamEvent) -> Result<()> {
        if self.fail_frames.load(Ordering::SeqCst) && event.name() == "frame" {
            return Err(anyhow!("transport closed"));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Four non-overlapping 50x50 persons (2500 px² each).
pub fn four_people() -> Vec<RawDetection> {
    (0..4)
        .map(|i| {
            let x = 100.0 + i as f32 * 120.0;
            RawDetection {
                x1: x,
                y1: 200.0,
                x2: x + 50.0,
                y2: 250.0,
                confidence: 0.9,
                class: ObjectClass::Person,
            }
        })
        .collect()
}

pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        target_fps: 50,
        retry_delay: Duration::from_millis(1),
        ..PipelineSettings::default()
    }
}

pub struct Harness {
    pub supervisor: StreamSupervisor,
    pub opener: Arc<ScriptedOpener>,
    pub publisher: Arc<RecordingPublisher>,
    pub store: Arc<InMemoryMetricStore>,
    pub audit: Arc<InMemoryAuditLog>,
}

pub fn harness(
    opener: ScriptedOpener,
    publisher: RecordingPublisher,
    detections: Vec<RawDetection>,
    settings: PipelineSettings,
) -> Harness {
    let opener = Arc::new(opener);
    let publisher = Arc::new(publisher);
    let store = Arc::new(InMemoryMetricStore::new());
    let audit = Arc::new(InMemoryAuditLog::new());
    let ctx = StreamContext {
        store: store.clone(),
        audit: audit.clone(),
        ..context(opener.clone(), publisher.clone(), detections, settings)
    };
    Harness {
        supervisor: StreamSupervisor::new(Arc::new(ctx)),
        opener,
        publisher,
        store,
        audit,
    }
}

/// Context over the three test cameras with in-memory stores.
pub fn context(
    opener: Arc<ScriptedOpener>,
    publisher: Arc<dyn Publisher>,
    detections: Vec<RawDetection>,
    settings: PipelineSettings,
) -> StreamContext {
    let directory = StaticCameraDirectory::new([
        camera(LIVE_CAMERA, "rtsp://10.0.0.7/live"),
        camera(FILE_CAMERA, "crowd.mp4"),
        camera(BROKEN_CAMERA, "not a locator"),
    ]);
    let detectors: Arc<dyn DetectorFactory> =
        Arc::new(move || -> Result<Box<dyn DetectorBackend>> {
            Ok(Box::new(StubBackend::with_detections(detections.clone())))
        });
    StreamContext {
        directory: Arc::new(directory),
        opener,
        detectors,
        publisher,
        store: Arc::new(InMemoryMetricStore::new()),
        audit: Arc::new(InMemoryAuditLog::new()),
        settings,
        locator_rules: LocatorRules {
            video_root: PathBuf::from("/srv/videos"),
            allow_generic_urls: false,
        },
    }
}

fn camera(id: &str, url: &str) -> CameraDescriptor {
    CameraDescriptor {
        id: id.to_string(),
        source_locator: url.to_string(),
        display_name: id.to_string(),
        location: "test".to_string(),
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
