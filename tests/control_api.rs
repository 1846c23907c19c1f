//! Control server over a real loopback socket.

mod common;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use crowd_kernel::api::{ControlConfig, ControlServer};
use crowd_kernel::{EventHub, StreamEvent, StreamSupervisor};
use serde_json::Value;

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        Self {
            writer: stream.try_clone().expect("clone stream"),
            reader: BufReader::new(stream),
        }
    }

    fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).expect("write");
        self.writer.write_all(b"\n").expect("write newline");
    }

    fn next_event(&mut self) -> Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read event");
        serde_json::from_str(&line).expect("event json")
    }

    /// Skip events until one named `name` arrives.
    fn next_named(&mut self, name: &str) -> Value {
        for _ in 0..200 {
            let event = self.next_event();
            if event["event"] == name {
                return event;
            }
        }
        panic!("no {} event received", name);
    }
}

fn server() -> (
    crowd_kernel::api::ControlHandle,
    Arc<StreamSupervisor>,
    Arc<ScriptedOpener>,
) {
    let hub = Arc::new(EventHub::new());
    let opener = Arc::new(ScriptedOpener::endless());
    let ctx = context(opener.clone(), hub.clone(), four_people(), test_settings());
    let supervisor = Arc::new(StreamSupervisor::new(Arc::new(ctx)));
    let cfg = ControlConfig {
        addr: "127.0.0.1:0".to_string(),
        subscriber_capacity: 64,
    };
    let handle = ControlServer::new(cfg, supervisor.clone(), hub)
        .spawn()
        .expect("spawn control server");
    (handle, supervisor, opener)
}

#[test]
fn greets_clients_on_connect() {
    let (handle, _supervisor, _opener) = server();
    let mut client = Client::connect(handle.addr);
    let event: StreamEvent = serde_json::from_value(client.next_event()).unwrap();
    assert_eq!(
        event,
        StreamEvent::Connected {
            message: "Connected to video streamer".to_string()
        }
    );
    handle.stop().unwrap();
}

#[test]
fn rejected_commands_come_back_as_error_events() {
    let (handle, supervisor, opener) = server();
    let mut client = Client::connect(handle.addr);
    client.next_named("connected");

    client.send(r#"{"type":"start_stream","camera_id":"cam-nowhere"}"#);
    let event = client.next_named("error");
    assert_eq!(event["payload"]["message"], "Camera not found");
    assert_eq!(event["payload"]["camera_id"], "cam-nowhere");

    client.send(r#"{"type":"start_stream"}"#);
    let event = client.next_named("error");
    assert_eq!(event["payload"]["message"], "Camera ID required");
    assert!(event["payload"].get("camera_id").is_none());

    client.send("this is not json");
    let event = client.next_named("error");
    assert!(event["payload"]["message"]
        .as_str()
        .unwrap()
        .starts_with("invalid command"));

    assert!(supervisor.active_cameras().is_empty());
    assert_eq!(opener.open_count(), 0);
    handle.stop().unwrap();
}

#[test]
fn start_streams_frames_and_stop_ends_them() {
    let (handle, supervisor, opener) = server();
    let mut client = Client::connect(handle.addr);
    client.next_named("connected");

    client.send(&format!(
        r#"{{"type":"start_stream","camera_id":"{}","threshold":0.005}}"#,
        LIVE_CAMERA
    ));
    let event = client.next_named("frame");
    assert_eq!(event["payload"]["camera_id"], LIVE_CAMERA);
    assert_eq!(event["payload"]["density"]["person_count"], 4);
    assert_eq!(event["payload"]["alert"], true);
    assert!(!event["payload"]["frame"].as_str().unwrap().is_empty());

    client.send(&format!(
        r#"{{"type":"start_stream","camera_id":"{}"}}"#,
        LIVE_CAMERA
    ));
    let event = client.next_named("error");
    assert_eq!(event["payload"]["message"], "Stream already active");

    client.send(&format!(r#"{{"type":"stop_stream","camera_id":"{}"}}"#, LIVE_CAMERA));
    assert!(wait_until(Duration::from_secs(5), || !supervisor.is_active(LIVE_CAMERA)));
    assert!(wait_until(Duration::from_secs(5), || opener.live_handles() == 0));

    supervisor.shutdown();
    handle.stop().unwrap();
}
