//! Registry of active stream workers.
//!
//! The registry maps camera id to the live worker's stop signal, state and
//! thread. It is the only state shared across workers and every mutation
//! happens under its mutex, so at most one worker is registered per camera.
//!
//! `stop` deregisters immediately and retires the thread. A worker that ends
//! on its own removes its entry through a lease tagged with the generation it
//! was started under; a retired worker can never evict its successor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use super::signal::StopSignal;
use super::worker::{PipelineSettings, StateCell, StreamWorker, WorkerExit, WorkerState};
use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::detect::DetectorFactory;
use crate::directory::CameraDirectory;
use crate::error::StreamError;
use crate::ingest::{LocatorRules, SourceLocator, SourceOpener};
use crate::publish::Publisher;
use crate::storage::MetricStore;

/// Collaborators and settings shared by the supervisor and all its workers.
pub struct StreamContext {
    pub directory: Arc<dyn CameraDirectory>,
    pub opener: Arc<dyn SourceOpener>,
    pub detectors: Arc<dyn DetectorFactory>,
    pub publisher: Arc<dyn Publisher>,
    pub store: Arc<dyn MetricStore>,
    pub audit: Arc<dyn AuditLog>,
    pub settings: PipelineSettings,
    pub locator_rules: LocatorRules,
}

/// How a worker's run ended, as seen after the fact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerOutcome {
    Finished,
    Failed(String),
    StoppedByRequest,
}

impl From<&WorkerExit> for WorkerOutcome {
    fn from(exit: &WorkerExit) -> Self {
        match exit {
            WorkerExit::Finished => WorkerOutcome::Finished,
            WorkerExit::Failed(err) => WorkerOutcome::Failed(err.to_string()),
            WorkerExit::StoppedByRequest => WorkerOutcome::StoppedByRequest,
        }
    }
}

struct ActiveStream {
    generation: u64,
    signal: StopSignal,
    state: StateCell,
    join: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<String, ActiveStream>>>;
type Outcomes = Arc<Mutex<HashMap<String, (u64, WorkerOutcome)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking worker must not wedge the registry for everyone else.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held by a worker thread; releases the registry entry on every exit path.
struct RegistryLease {
    registry: Registry,
    outcomes: Outcomes,
    camera_id: String,
    generation: u64,
    outcome: Option<WorkerOutcome>,
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| WorkerOutcome::Failed("worker panicked".to_string()));
        {
            let mut outcomes = lock(&self.outcomes);
            let newer = outcomes
                .get(&self.camera_id)
                .is_some_and(|(generation, _)| *generation > self.generation);
            if !newer {
                outcomes.insert(self.camera_id.clone(), (self.generation, outcome));
            }
        }
        let mut registry = lock(&self.registry);
        if registry
            .get(&self.camera_id)
            .is_some_and(|active| active.generation == self.generation)
        {
            registry.remove(&self.camera_id);
        }
    }
}

pub struct StreamSupervisor {
    ctx: Arc<StreamContext>,
    registry: Registry,
    outcomes: Outcomes,
    retired: Mutex<Vec<JoinHandle<()>>>,
    next_generation: AtomicU64,
}

impl StreamSupervisor {
    pub fn new(ctx: Arc<StreamContext>) -> Self {
        Self {
            ctx,
            registry: Arc::new(Mutex::new(HashMap::new())),
            outcomes: Arc::new(Mutex::new(HashMap::new())),
            retired: Mutex::new(Vec::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn default_threshold(&self) -> f64 {
        self.ctx.settings.default_threshold
    }

    /// Start streaming `camera_id` with the given alert threshold.
    ///
    /// Lookup, classification and registration happen under the registry lock,
    /// so concurrent starts for one camera yield exactly one worker.
    pub fn start(&self, camera_id: &str, threshold: f64) -> Result<(), StreamError> {
        let generation = {
            let mut registry = lock(&self.registry);
            if registry.contains_key(camera_id) {
                return Err(StreamError::AlreadyActive(camera_id.to_string()));
            }
            let camera = self
                .ctx
                .directory
                .find_by_id(camera_id)
                .ok_or_else(|| StreamError::CameraNotFound(camera_id.to_string()))?;
            if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                return Err(StreamError::InvalidThreshold(threshold));
            }
            let locator =
                SourceLocator::classify(&camera.source_locator, &self.ctx.locator_rules)?;

            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            let signal = StopSignal::new();
            let state = StateCell::new();
            let worker = StreamWorker::new(
                camera_id.to_string(),
                locator,
                threshold,
                Arc::clone(&self.ctx),
                signal.clone(),
                state.clone(),
            );
            let mut lease = RegistryLease {
                registry: Arc::clone(&self.registry),
                outcomes: Arc::clone(&self.outcomes),
                camera_id: camera_id.to_string(),
                generation,
                outcome: None,
            };
            let join = std::thread::Builder::new()
                .name(format!("stream-{}", camera_id))
                .spawn(move || {
                    let exit = worker.run();
                    lease.outcome = Some(WorkerOutcome::from(&exit));
                })
                .map_err(|err| StreamError::WorkerSpawn {
                    camera_id: camera_id.to_string(),
                    reason: err.to_string(),
                })?;
            registry.insert(
                camera_id.to_string(),
                ActiveStream {
                    generation,
                    signal,
                    state,
                    join,
                },
            );
            generation
        };
        self.reap_retired();

        log::info!(
            "started stream for camera {} (threshold {:.2}, generation {})",
            camera_id,
            threshold,
            generation
        );
        self.audit(AuditAction::StreamStarted, camera_id, Some(format!("threshold={}", threshold)));
        Ok(())
    }

    /// Stop `camera_id`. Unknown or already stopped cameras are a no-op.
    /// Returns whether a worker was signalled.
    pub fn stop(&self, camera_id: &str) -> bool {
        let Some(active) = lock(&self.registry).remove(camera_id) else {
            log::debug!("stop for inactive camera {} ignored", camera_id);
            return false;
        };
        active.signal.stop();
        if !active.state.advance(WorkerState::Running, WorkerState::Stopping) {
            active.state.advance(WorkerState::Starting, WorkerState::Stopping);
        }
        lock(&self.retired).push(active.join);
        self.reap_retired();

        log::info!("stopped stream for camera {}", camera_id);
        self.audit(AuditAction::StreamStopped, camera_id, None);
        true
    }

    pub fn is_active(&self, camera_id: &str) -> bool {
        lock(&self.registry).contains_key(camera_id)
    }

    /// Current worker state; `Stopped` once the camera has no registered worker.
    pub fn state(&self, camera_id: &str) -> WorkerState {
        lock(&self.registry)
            .get(camera_id)
            .map_or(WorkerState::Stopped, |active| active.state.get())
    }

    pub fn active_cameras(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.registry).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Outcome of the most recent worker that ran for `camera_id`.
    pub fn last_outcome(&self, camera_id: &str) -> Option<WorkerOutcome> {
        lock(&self.outcomes)
            .get(camera_id)
            .map(|(_, outcome)| outcome.clone())
    }

    /// Stop every worker and wait for all threads, retired ones included.
    pub fn shutdown(&self) {
        for camera_id in self.active_cameras() {
            self.stop(&camera_id);
        }
        let handles: Vec<JoinHandle<()>> = lock(&self.retired).drain(..).collect();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("stream").to_string();
            if handle.join().is_err() {
                log::error!("worker thread {} panicked", name);
            }
        }
    }

    fn reap_retired(&self) {
        lock(&self.retired).retain(|handle| !handle.is_finished());
    }

    fn audit(&self, action: AuditAction, camera_id: &str, details: Option<String>) {
        let record = AuditRecord::now(action, camera_id, details);
        if let Err(err) = self.ctx.audit.append(&record) {
            log::warn!("audit append failed for camera {}: {:#}", camera_id, err);
        }
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        for active in lock(&self.registry).values() {
            active.signal.stop();
        }
    }
}
