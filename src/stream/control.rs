//! Inbound control commands.

use serde::{Deserialize, Serialize};

use super::supervisor::StreamSupervisor;
use crate::error::StreamError;
use crate::publish::{Publisher, StreamEvent};

/// Control messages as they arrive on the wire, e.g.
/// `{"type":"start_stream","camera_id":"lobby","threshold":0.7}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlCommand {
    #[serde(rename = "start_stream")]
    Start {
        #[serde(default)]
        camera_id: Option<String>,
        #[serde(default)]
        threshold: Option<f64>,
    },
    #[serde(rename = "stop_stream")]
    Stop {
        #[serde(default)]
        camera_id: Option<String>,
    },
}

/// Subscriber-facing text for a rejected command.
pub fn client_message(err: &StreamError) -> String {
    match err {
        StreamError::AlreadyActive(_) => "Stream already active".to_string(),
        StreamError::CameraNotFound(_) => "Camera not found".to_string(),
        other => format!("Error starting stream: {}", other),
    }
}

fn required(camera_id: &Option<String>) -> Option<&str> {
    camera_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// Apply one command. Rejections are published as `error` events so every
/// subscriber sees them, and also returned to the caller.
pub fn dispatch(
    supervisor: &StreamSupervisor,
    publisher: &dyn Publisher,
    command: ControlCommand,
) -> Result<(), StreamError> {
    match command {
        ControlCommand::Start {
            camera_id,
            threshold,
        } => {
            let Some(camera_id) = required(&camera_id) else {
                publish_error(publisher, None, "Camera ID required");
                return Ok(());
            };
            let threshold = threshold.unwrap_or_else(|| supervisor.default_threshold());
            supervisor.start(camera_id, threshold).map_err(|err| {
                log::warn!("start_stream {} rejected: {}", camera_id, err);
                publish_error(publisher, Some(camera_id), &client_message(&err));
                err
            })
        }
        ControlCommand::Stop { camera_id } => {
            if let Some(camera_id) = required(&camera_id) {
                supervisor.stop(camera_id);
            }
            Ok(())
        }
    }
}

fn publish_error(publisher: &dyn Publisher, camera_id: Option<&str>, message: &str) {
    if let Err(err) = publisher.emit(&StreamEvent::error(camera_id, message)) {
        log::warn!("could not publish control error: {:#}", err);
    }
}
