//! End-to-end pipeline behaviour through the supervisor: frame events,
//! density values, end-of-file handling, failure limits and persistence.

mod common;

use std::time::Duration;

use common::*;
use crowd_kernel::stream::EofPolicy;
use crowd_kernel::{PipelineSettings, StreamEvent, WorkerOutcome, WorkerState};

const WAIT: Duration = Duration::from_secs(5);

fn frame_payloads(events: &[StreamEvent]) -> Vec<(u32, f64, bool)> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Frame(payload) => Some((
                payload.density.person_count,
                payload.density.density_value,
                payload.alert,
            )),
            _ => None,
        })
        .collect()
}

#[test]
fn three_frames_with_four_people_each() {
    let h = harness(
        ScriptedOpener::new(vec![Step::Frame; 3], Step::End),
        RecordingPublisher::default(),
        four_people(),
        test_settings(),
    );
    h.supervisor.start(FILE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(FILE_CAMERA).is_some()));

    let frames = frame_payloads(&h.publisher.frames_for(FILE_CAMERA));
    assert_eq!(frames.len(), 3);
    for (count, value, alert) in frames {
        assert_eq!(count, 4);
        assert_eq!(value, 0.007);
        assert!(!alert);
    }
    assert_eq!(
        h.supervisor.last_outcome(FILE_CAMERA),
        Some(WorkerOutcome::Finished)
    );
}

#[test]
fn frame_payload_carries_decodable_jpeg() {
    use base64::Engine;

    let h = harness(
        ScriptedOpener::new(vec![Step::Frame], Step::End),
        RecordingPublisher::default(),
        four_people(),
        test_settings(),
    );
    h.supervisor.start(FILE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(FILE_CAMERA).is_some()));

    let events = h.publisher.frames_for(FILE_CAMERA);
    let StreamEvent::Frame(payload) = &events[0] else {
        panic!("expected frame event");
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&payload.frame)
        .unwrap();
    let image = image::load_from_memory(&bytes).unwrap();
    assert_eq!((image.width(), image.height()), (800, 600));
}

#[test]
fn wide_frames_are_downscaled_to_max_width() {
    use base64::Engine;

    let h = harness(
        ScriptedOpener::new(vec![Step::Frame], Step::End).with_size(1600, 1200),
        RecordingPublisher::default(),
        Vec::new(),
        test_settings(),
    );
    h.supervisor.start(FILE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(FILE_CAMERA).is_some()));

    let events = h.publisher.frames_for(FILE_CAMERA);
    assert_eq!(events.len(), 1);
    let StreamEvent::Frame(payload) = &events[0] else {
        panic!("expected frame event");
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&payload.frame)
        .unwrap();
    let image = image::load_from_memory(&bytes).unwrap();
    assert_eq!((image.width(), image.height()), (800, 600));
}

#[test]
fn single_frame_file_finishes_without_error() {
    let h = harness(
        ScriptedOpener::new(vec![Step::Frame], Step::End),
        RecordingPublisher::default(),
        four_people(),
        test_settings(),
    );
    h.supervisor.start(FILE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(FILE_CAMERA).is_some()));

    assert_eq!(h.publisher.frames_for(FILE_CAMERA).len(), 1);
    assert!(h.publisher.errors_for(Some(FILE_CAMERA)).is_empty());
    assert_eq!(
        h.supervisor.last_outcome(FILE_CAMERA),
        Some(WorkerOutcome::Finished)
    );
    assert!(wait_until(WAIT, || !h.supervisor.is_active(FILE_CAMERA)));
    assert_eq!(h.supervisor.state(FILE_CAMERA), WorkerState::Stopped);
    assert_eq!(h.opener.live_handles(), 0);
}

#[test]
fn file_read_error_counts_as_end_of_file() {
    let h = harness(
        ScriptedOpener::new(vec![Step::Frame, Step::Frame], Step::Fail),
        RecordingPublisher::default(),
        Vec::new(),
        test_settings(),
    );
    h.supervisor.start(FILE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(FILE_CAMERA).is_some()));
    assert_eq!(h.publisher.frames_for(FILE_CAMERA).len(), 2);
    assert_eq!(
        h.supervisor.last_outcome(FILE_CAMERA),
        Some(WorkerOutcome::Finished)
    );
}

#[test]
fn looping_file_without_rewind_support_finishes() {
    // Scripted sources keep the default `rewind`, which fails.
    let settings = PipelineSettings {
        file_eof: EofPolicy::Loop,
        ..test_settings()
    };
    let h = harness(
        ScriptedOpener::new(vec![Step::Frame; 2], Step::End),
        RecordingPublisher::default(),
        Vec::new(),
        settings,
    );
    h.supervisor.start(FILE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(FILE_CAMERA).is_some()));
    assert_eq!(h.publisher.frames_for(FILE_CAMERA).len(), 2);
    assert_eq!(
        h.supervisor.last_outcome(FILE_CAMERA),
        Some(WorkerOutcome::Finished)
    );
}

#[test]
fn looping_file_replays_until_stopped() {
    let settings = PipelineSettings {
        file_eof: EofPolicy::Loop,
        ..test_settings()
    };
    let h = harness(
        ScriptedOpener::new(vec![Step::Frame], Step::End).rewindable(),
        RecordingPublisher::default(),
        four_people(),
        settings,
    );
    h.supervisor.start(FILE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.publisher.frames_for(FILE_CAMERA).len() > 3));

    assert!(h.supervisor.is_active(FILE_CAMERA));
    assert_eq!(h.supervisor.last_outcome(FILE_CAMERA), None);
    assert_eq!(h.opener.open_count(), 1);

    assert!(h.supervisor.stop(FILE_CAMERA));
    assert!(wait_until(WAIT, || h.opener.live_handles() == 0));
    assert!(wait_until(WAIT, || {
        h.supervisor.last_outcome(FILE_CAMERA) == Some(WorkerOutcome::StoppedByRequest)
    }));
    assert!(h.publisher.errors_for(Some(FILE_CAMERA)).is_empty());
}

#[test]
fn live_source_fails_after_ten_consecutive_read_errors() {
    let h = harness(
        ScriptedOpener::new(vec![Step::Frame, Step::Fail, Step::Frame], Step::Fail),
        RecordingPublisher::default(),
        Vec::new(),
        test_settings(),
    );
    h.supervisor.start(LIVE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(LIVE_CAMERA).is_some()));

    // The failure in between was recovered; the counter restarted after it.
    assert_eq!(h.publisher.frames_for(LIVE_CAMERA).len(), 2);
    let errors = h.publisher.errors_for(Some(LIVE_CAMERA));
    assert_eq!(
        errors,
        vec!["connection lost after 10 consecutive read failures".to_string()]
    );
    assert!(matches!(
        h.supervisor.last_outcome(LIVE_CAMERA),
        Some(WorkerOutcome::Failed(_))
    ));
    assert!(wait_until(WAIT, || !h.supervisor.is_active(LIVE_CAMERA)));
    assert_eq!(h.opener.live_handles(), 0);
}

#[test]
fn live_source_end_of_stream_is_a_read_failure() {
    let h = harness(
        ScriptedOpener::new(Vec::new(), Step::End),
        RecordingPublisher::default(),
        Vec::new(),
        test_settings(),
    );
    h.supervisor.start(LIVE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(LIVE_CAMERA).is_some()));
    assert!(matches!(
        h.supervisor.last_outcome(LIVE_CAMERA),
        Some(WorkerOutcome::Failed(_))
    ));
    assert_eq!(h.publisher.errors_for(Some(LIVE_CAMERA)).len(), 1);
}

#[test]
fn publish_failure_ends_the_worker() {
    let h = harness(
        ScriptedOpener::endless(),
        RecordingPublisher::failing_frames(),
        four_people(),
        test_settings(),
    );
    h.supervisor.start(LIVE_CAMERA, 0.65).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(LIVE_CAMERA).is_some()));

    let outcome = h.supervisor.last_outcome(LIVE_CAMERA);
    let Some(WorkerOutcome::Failed(message)) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(message.contains("failed to publish frame event"), "{}", message);
    assert_eq!(h.opener.open_count(), 1);
    assert!(wait_until(WAIT, || h.opener.live_handles() == 0));
    assert!(h.store.records().is_empty());
}

#[test]
fn alert_follows_threshold() {
    let h = harness(
        ScriptedOpener::new(vec![Step::Frame], Step::End),
        RecordingPublisher::default(),
        four_people(),
        test_settings(),
    );
    // 0.007 >= 0.005: alert.
    h.supervisor.start(FILE_CAMERA, 0.005).unwrap();
    assert!(wait_until(WAIT, || h.supervisor.last_outcome(FILE_CAMERA).is_some()));
    let frames = frame_payloads(&h.publisher.frames_for(FILE_CAMERA));
    assert_eq!(frames, vec![(4, 0.007, true)]);
}

#[test]
fn persistence_is_throttled_to_log_interval() {
    let settings = PipelineSettings {
        log_interval: Duration::from_millis(200),
        target_fps: 100,
        ..test_settings()
    };
    let h = harness(
        ScriptedOpener::endless(),
        RecordingPublisher::default(),
        four_people(),
        settings,
    );
    h.supervisor.start(LIVE_CAMERA, 0.65).unwrap();
    std::thread::sleep(Duration::from_millis(700));
    h.supervisor.stop(LIVE_CAMERA);
    h.supervisor.shutdown();

    let frames = h.publisher.frames_for(LIVE_CAMERA).len();
    let persisted = h.store.count_for(LIVE_CAMERA);
    assert!(frames > 3, "only {} frames processed", frames);
    assert!(persisted >= 1, "nothing persisted");
    assert!(persisted <= 4, "{} samples persisted for {} frames", persisted, frames);
    let records = h.store.records();
    assert!(records.iter().all(|r| r.person_count == 4));
    assert!(records
        .windows(2)
        .all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
}
