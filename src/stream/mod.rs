//! Per-camera stream lifecycle: cancellation, the worker loop, the
//! supervisor registry and control command dispatch.

mod control;
mod signal;
mod supervisor;
mod worker;

pub use control::{client_message, dispatch, ControlCommand};
pub use signal::StopSignal;
pub use supervisor::{StreamContext, StreamSupervisor, WorkerOutcome};
pub use worker::{EofPolicy, PersistThrottle, PipelineSettings, WorkerExit, WorkerState};
