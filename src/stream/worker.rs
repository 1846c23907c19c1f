//! Per-camera capture-to-publish loop.
//!
//! A worker opens its source on its own thread, then repeats
//! read → downscale → detect → estimate → annotate → encode → emit → persist
//! until stopped, the file ends, or a terminal failure. The source is owned by
//! the worker and dropped on every exit path.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;

use super::signal::StopSignal;
use super::supervisor::StreamContext;
use crate::annotate::FrameAnnotator;
use crate::density::{DensityEngine, DensitySample, DEFAULT_DENSITY_THRESHOLD, DEFAULT_REFERENCE_AREA_SQM};
use crate::detect::{DetectionAdapter, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::error::StreamError;
use crate::frame::{Frame, DEFAULT_MAX_FRAME_WIDTH};
use crate::ingest::{FrameSource, SourceLocator};
use crate::publish::{encode_jpeg_base64, FramePayload, StreamEvent, DEFAULT_JPEG_QUALITY};

/// What a file source does when it runs out of frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EofPolicy {
    #[default]
    Stop,
    Loop,
}

impl FromStr for EofPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(EofPolicy::Stop),
            "loop" => Ok(EofPolicy::Loop),
            other => Err(anyhow::anyhow!("unknown file_eof policy '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub default_threshold: f64,
    pub confidence_threshold: f32,
    pub reference_area_sqm: f64,
    /// Minimum time between persisted samples per camera.
    pub log_interval: Duration,
    /// Pacing target; 0 disables pacing.
    pub target_fps: u32,
    pub max_frame_width: u32,
    pub jpeg_quality: u8,
    pub max_consecutive_failures: u32,
    pub retry_delay: Duration,
    pub file_eof: EofPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_DENSITY_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            reference_area_sqm: DEFAULT_REFERENCE_AREA_SQM,
            log_interval: Duration::from_secs(5),
            target_fps: 10,
            max_frame_width: DEFAULT_MAX_FRAME_WIDTH,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_consecutive_failures: 10,
            retry_delay: Duration::from_millis(100),
            file_eof: EofPolicy::Stop,
        }
    }
}

impl PipelineSettings {
    fn frame_interval(&self) -> Option<Duration> {
        (self.target_fps > 0).then(|| Duration::from_nanos(1_000_000_000 / self.target_fps as u64))
    }
}

/// Lets through at most one persist per interval. The clock starts when the
/// stream starts, so the first sample is written one interval in.
#[derive(Clone, Debug)]
pub struct PersistThrottle {
    interval: Duration,
    last: Instant,
}

impl PersistThrottle {
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last: start,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub enum WorkerExit {
    /// The file ended (or a looping file produced nothing).
    Finished,
    Failed(StreamError),
    StoppedByRequest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Starting,
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// Worker state readable from the supervisor without taking its lock.
#[derive(Clone, Debug)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Starting as u8)))
    }

    pub(crate) fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from` → `to` only if no one else moved the state first.
    pub(crate) fn advance(&self, from: WorkerState, to: WorkerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

pub(crate) struct StreamWorker {
    camera_id: String,
    locator: SourceLocator,
    threshold: f64,
    ctx: Arc<StreamContext>,
    signal: StopSignal,
    state: StateCell,
    frames_processed: u64,
}

impl StreamWorker {
    pub(crate) fn new(
        camera_id: String,
        locator: SourceLocator,
        threshold: f64,
        ctx: Arc<StreamContext>,
        signal: StopSignal,
        state: StateCell,
    ) -> Self {
        Self {
            camera_id,
            locator,
            threshold,
            ctx,
            signal,
            state,
            frames_processed: 0,
        }
    }

    pub(crate) fn run(mut self) -> WorkerExit {
        log::info!("stream {}: opening {}", self.camera_id, self.locator);
        let exit = match self.ctx.opener.open(&self.locator) {
            Ok(mut source) => {
                let mut detector = self.build_detector();
                self.state.advance(WorkerState::Starting, WorkerState::Running);
                log::info!(
                    "stream {}: streaming from {} (detector {})",
                    self.camera_id,
                    source.stats().source,
                    detector.backend_name()
                );
                self.stream(source.as_mut(), &mut detector)
            }
            Err(err) => {
                self.report(&err);
                WorkerExit::Failed(err)
            }
        };
        self.state.set(WorkerState::Stopped);
        match &exit {
            WorkerExit::Failed(err) => log::warn!(
                "stream {}: failed after {} frames: {}",
                self.camera_id,
                self.frames_processed,
                err
            ),
            other => log::info!(
                "stream {}: exited ({:?}) after {} frames",
                self.camera_id,
                other,
                self.frames_processed
            ),
        }
        exit
    }

    fn build_detector(&self) -> DetectionAdapter {
        match self.ctx.detectors.create() {
            Ok(mut backend) => {
                if let Err(err) = backend.warm_up() {
                    log::warn!("stream {}: detector warm-up failed: {:#}", self.camera_id, err);
                }
                DetectionAdapter::new(backend, self.ctx.settings.confidence_threshold)
            }
            Err(err) => {
                log::warn!(
                    "stream {}: detector unavailable, sending raw frames: {:#}",
                    self.camera_id,
                    err
                );
                DetectionAdapter::disabled()
            }
        }
    }

    fn stream(&mut self, source: &mut dyn FrameSource, detector: &mut DetectionAdapter) -> WorkerExit {
        let settings = self.ctx.settings.clone();
        let engine = DensityEngine::new(settings.reference_area_sqm);
        let annotator = FrameAnnotator::new();
        let mut throttle = PersistThrottle::new(settings.log_interval, Instant::now());
        let live = source.kind().is_live();
        let mut failures = 0u32;
        let mut since_rewind = 0u64;

        loop {
            if self.signal.is_stopped() {
                return WorkerExit::StoppedByRequest;
            }
            let cycle_start = Instant::now();

            let frame = match source.read_frame() {
                Ok(Some(frame)) => {
                    failures = 0;
                    frame
                }
                other if !live => {
                    if let Err(err) = other {
                        log::debug!("stream {}: file read ended: {:#}", self.camera_id, err);
                    }
                    match settings.file_eof {
                        EofPolicy::Stop => {
                            log::info!("stream {}: end of file", self.camera_id);
                            return WorkerExit::Finished;
                        }
                        EofPolicy::Loop if since_rewind == 0 => {
                            log::warn!("stream {}: file yields no frames; not looping", self.camera_id);
                            return WorkerExit::Finished;
                        }
                        EofPolicy::Loop => {
                            if let Err(err) = source.rewind() {
                                log::warn!("stream {}: rewind failed: {:#}", self.camera_id, err);
                                return WorkerExit::Finished;
                            }
                            since_rewind = 0;
                            continue;
                        }
                    }
                }
                other => {
                    failures += 1;
                    match other {
                        Err(err) => log::warn!(
                            "stream {}: read failure {}/{}: {:#}",
                            self.camera_id,
                            failures,
                            settings.max_consecutive_failures,
                            err
                        ),
                        _ => log::warn!(
                            "stream {}: source returned no frame ({}/{})",
                            self.camera_id,
                            failures,
                            settings.max_consecutive_failures
                        ),
                    }
                    if failures >= settings.max_consecutive_failures {
                        let err = StreamError::ConnectionLost { failures };
                        self.report(&err);
                        return WorkerExit::Failed(err);
                    }
                    if self.signal.sleep(settings.retry_delay) {
                        return WorkerExit::StoppedByRequest;
                    }
                    continue;
                }
            };
            since_rewind += 1;

            let frame = frame.downscaled(settings.max_frame_width);
            let (image, sample) = self.process(frame, detector, &engine, &annotator);

            let encoded = match encode_jpeg_base64(&image, settings.jpeg_quality) {
                Ok(encoded) => encoded,
                Err(err) => {
                    let err = StreamError::EncodeFailure(format!("{:#}", err));
                    self.report(&err);
                    return WorkerExit::Failed(err);
                }
            };
            let event = StreamEvent::Frame(FramePayload {
                camera_id: self.camera_id.clone(),
                frame: encoded,
                density: sample.estimate,
                alert: sample.alert,
            });
            if let Err(err) = self.ctx.publisher.emit(&event) {
                let err = StreamError::PublishFailure {
                    event: event.name(),
                    reason: format!("{:#}", err),
                };
                self.report(&err);
                return WorkerExit::Failed(err);
            }
            self.frames_processed += 1;

            if throttle.ready(Instant::now()) {
                self.persist(&sample);
            }

            if let Some(interval) = settings.frame_interval() {
                let elapsed = cycle_start.elapsed();
                if elapsed < interval && self.signal.sleep(interval - elapsed) {
                    return WorkerExit::StoppedByRequest;
                }
            }
        }
    }

    fn process(
        &self,
        frame: Frame,
        detector: &mut DetectionAdapter,
        engine: &DensityEngine,
        annotator: &FrameAnnotator,
    ) -> (image::RgbImage, DensitySample) {
        if !detector.is_enabled() {
            return (frame.into_image(), DensitySample::default());
        }
        let detections = detector.detect(&frame);
        let estimate = engine.estimate(&detections, frame.width(), frame.height());
        let sample = DensitySample::evaluate(estimate, self.threshold);
        if sample.alert {
            log::debug!(
                "stream {}: density {:.3} over threshold {:.2}",
                self.camera_id,
                estimate.density_value,
                self.threshold
            );
        }
        let image = annotator.annotate(&frame, &detections, &estimate, self.threshold);
        (image, sample)
    }

    fn persist(&self, sample: &DensitySample) {
        let estimate = &sample.estimate;
        if let Err(err) = self.ctx.store.append(
            &self.camera_id,
            estimate.person_count,
            estimate.density_value,
            sample.alert,
        ) {
            let err = StreamError::PersistFailure(format!("{:#}", err));
            log::warn!("stream {}: {}", self.camera_id, err);
        }
    }

    /// Tell subscribers about a terminal failure. A dead publisher is only logged.
    fn report(&self, err: &StreamError) {
        log::error!("stream {}: {}", self.camera_id, err);
        let event = StreamEvent::error(Some(&self.camera_id), err.to_string());
        if let Err(emit_err) = self.ctx.publisher.emit(&event) {
            log::warn!(
                "stream {}: could not publish error event: {:#}",
                self.camera_id,
                emit_err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_allows_one_persist_per_interval() {
        let start = Instant::now();
        let mut throttle = PersistThrottle::new(Duration::from_secs(5), start);
        let persisted = (1..=20)
            .filter(|i| throttle.ready(start + Duration::from_millis(250 * i)))
            .count();
        assert_eq!(persisted, 1);
    }

    #[test]
    fn throttle_resets_after_each_persist() {
        let start = Instant::now();
        let mut throttle = PersistThrottle::new(Duration::from_secs(5), start);
        assert!(!throttle.ready(start + Duration::from_secs(4)));
        assert!(throttle.ready(start + Duration::from_secs(6)));
        assert!(!throttle.ready(start + Duration::from_secs(10)));
        assert!(throttle.ready(start + Duration::from_secs(11)));
    }

    #[test]
    fn eof_policy_parses() {
        assert_eq!("LOOP".parse::<EofPolicy>().unwrap(), EofPolicy::Loop);
        assert_eq!("stop".parse::<EofPolicy>().unwrap(), EofPolicy::Stop);
        assert!("rewind".parse::<EofPolicy>().is_err());
    }

    #[test]
    fn state_cell_advance_respects_concurrent_moves() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), WorkerState::Starting);
        cell.set(WorkerState::Stopping);
        assert!(!cell.advance(WorkerState::Starting, WorkerState::Running));
        assert_eq!(cell.get(), WorkerState::Stopping);
    }

    #[test]
    fn zero_fps_disables_pacing() {
        let settings = PipelineSettings {
            target_fps: 0,
            ..PipelineSettings::default()
        };
        assert!(settings.frame_interval().is_none());
        assert_eq!(
            PipelineSettings::default().frame_interval(),
            Some(Duration::from_millis(100))
        );
    }
}
