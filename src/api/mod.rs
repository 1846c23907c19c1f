//! Control and event server.
//!
//! Plain TCP, one JSON object per line in both directions. A client receives a
//! `connected` event on accept and then every hub event; lines it sends are
//! parsed as `ControlCommand`s and dispatched to the supervisor.

use anyhow::{anyhow, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::publish::{EventHub, Publisher, StreamEvent};
use crate::stream::{dispatch, ControlCommand, StreamSupervisor};

const MAX_REQUEST_BYTES: usize = 8192;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Debug)]
pub struct ControlConfig {
    pub addr: String,
    /// Events buffered per client before it starts missing frames.
    pub subscriber_capacity: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8890".to_string(),
            subscriber_capacity: 32,
        }
    }
}

#[derive(Debug)]
pub struct ControlHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("control server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ControlServer {
    cfg: ControlConfig,
    supervisor: Arc<StreamSupervisor>,
    hub: Arc<EventHub>,
}

impl ControlServer {
    pub fn new(cfg: ControlConfig, supervisor: Arc<StreamSupervisor>, hub: Arc<EventHub>) -> Self {
        Self {
            cfg,
            supervisor,
            hub,
        }
    }

    pub fn spawn(self) -> Result<ControlHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "control server configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;
        log::info!("control server listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("control-accept".to_string())
            .spawn(move || {
                if let Err(err) = self.run(listener, shutdown_thread) {
                    log::error!("control server stopped: {}", err);
                }
            })?;

        Ok(ControlHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }

    fn run(self, listener: TcpListener, shutdown: Arc<AtomicBool>) -> Result<()> {
        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok((stream, peer)) => match self.open_connection(stream, peer, &shutdown) {
                    Ok(mut threads) => connections.append(&mut threads),
                    Err(err) => log::warn!("control connection from {} rejected: {}", peer, err),
                },
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(err) => return Err(err.into()),
            }
            connections.retain(|handle| !handle.is_finished());
        }
        for handle in connections {
            let _ = handle.join();
        }
        Ok(())
    }

    fn open_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: &Arc<AtomicBool>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let local = stream.local_addr()?;
        if local.ip().is_loopback() && !peer.ip().is_loopback() {
            return Err(anyhow!("non-loopback peer on loopback listener"));
        }
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        let writer = Arc::new(Mutex::new(stream.try_clone()?));
        let closed = Arc::new(AtomicBool::new(false));
        let events = self.hub.subscribe(self.cfg.subscriber_capacity);
        log::info!(
            "control client connected: {} ({} subscribers)",
            peer,
            self.hub.subscriber_count()
        );
        write_event(
            &writer,
            &StreamEvent::Connected {
                message: "Connected to video streamer".to_string(),
            },
        )?;

        let out = {
            let writer = writer.clone();
            let closed = closed.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name(format!("control-out-{}", peer))
                .spawn(move || {
                    while !shutdown.load(Ordering::SeqCst) && !closed.load(Ordering::SeqCst) {
                        match events.recv_timeout(POLL_INTERVAL) {
                            Ok(event) => {
                                if let Err(err) = write_event(&writer, &event) {
                                    log::debug!("control client {} write failed: {}", peer, err);
                                    break;
                                }
                            }
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    closed.store(true, Ordering::SeqCst);
                })?
        };

        let supervisor = self.supervisor.clone();
        let hub = self.hub.clone();
        let shutdown = shutdown.clone();
        let inbound = std::thread::Builder::new()
            .name(format!("control-in-{}", peer))
            .spawn(move || {
                let result = read_commands(stream, &shutdown, &closed, |line| {
                    handle_line(&supervisor, hub.as_ref(), &writer, line)
                });
                if let Err(err) = result {
                    log::debug!("control client {} closed: {}", peer, err);
                }
                closed.store(true, Ordering::SeqCst);
                log::info!("control client disconnected: {}", peer);
            })?;

        Ok(vec![out, inbound])
    }
}

fn handle_line(
    supervisor: &StreamSupervisor,
    publisher: &dyn Publisher,
    writer: &Mutex<TcpStream>,
    line: &[u8],
) -> Result<()> {
    match serde_json::from_slice::<ControlCommand>(line) {
        Ok(command) => {
            log::debug!("control command: {:?}", command);
            // Rejections are already published to every subscriber.
            let _ = dispatch(supervisor, publisher, command);
            Ok(())
        }
        Err(err) => write_event(writer, &StreamEvent::error(None, format!("invalid command: {}", err))),
    }
}

/// Split the byte stream into lines and hand each non-empty one to `on_line`.
fn read_commands(
    mut stream: TcpStream,
    shutdown: &AtomicBool,
    closed: &AtomicBool,
    mut on_line: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    while !shutdown.load(Ordering::SeqCst) && !closed.load(Ordering::SeqCst) {
        let n = match stream.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(err) => return Err(err.into()),
        };
        pending.extend_from_slice(&chunk[..n]);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let line = trim_line(&line);
            if !line.is_empty() {
                on_line(line)?;
            }
        }
        if pending.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("control line exceeds {} bytes", MAX_REQUEST_BYTES));
        }
    }
    Ok(())
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &line[start..end.max(start)]
}

fn write_event(writer: &Mutex<TcpStream>, event: &StreamEvent) -> Result<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    let mut stream = writer
        .lock()
        .map_err(|_| anyhow!("control writer lock poisoned"))?;
    stream.write_all(&line)?;
    stream.flush()?;
    Ok(())
}
