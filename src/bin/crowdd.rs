//! crowdd - crowd density streaming daemon
//!
//! This daemon:
//! 1. Loads configuration (`CROWD_CONFIG` file plus `CROWD_*` overrides)
//! 2. Opens the density and audit stores
//! 3. Serves the control/event protocol on the configured address
//! 4. Starts cameras marked `autostart`
//! 5. Enforces density log retention until Ctrl-C, then stops every stream

use anyhow::Result;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crowd_kernel::{
    api::{ControlConfig, ControlServer},
    config::CrowdConfig,
    ingest::CaptureSettings,
    DefaultSourceOpener, EventHub, SqliteAuditLog, SqliteMetricStore, StreamContext,
    StreamSupervisor,
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = CrowdConfig::load()?;
    log::info!(
        "crowdd {} starting: db={} cameras={} detector={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.db_path,
        cfg.cameras.len(),
        cfg.detector.backend
    );

    let store = Arc::new(SqliteMetricStore::open(&cfg.db_path)?);
    let audit = Arc::new(SqliteAuditLog::open(&cfg.db_path)?);
    match audit.verify_chain() {
        Ok(count) => log::info!("audit chain verified ({} records)", count),
        Err(err) => log::error!("audit chain verification failed: {:#}", err),
    }

    let hub = Arc::new(EventHub::new());
    let ctx = StreamContext {
        directory: Arc::new(cfg.directory()),
        opener: Arc::new(DefaultSourceOpener::new(CaptureSettings {
            target_fps: cfg.pipeline.target_fps,
            ..CaptureSettings::default()
        })),
        detectors: cfg.detector.build_factory()?,
        publisher: hub.clone(),
        store: store.clone(),
        audit,
        settings: cfg.pipeline.clone(),
        locator_rules: cfg.locator_rules(),
    };
    let supervisor = Arc::new(StreamSupervisor::new(Arc::new(ctx)));

    let control = ControlServer::new(
        ControlConfig {
            addr: cfg.api_addr.clone(),
            ..ControlConfig::default()
        },
        supervisor.clone(),
        hub,
    )
    .spawn()?;
    log::info!("control api listening on {}", control.addr);

    for camera in cfg.cameras.iter().filter(|camera| camera.autostart) {
        let id = &camera.descriptor.id;
        let threshold = camera.threshold.unwrap_or(cfg.pipeline.default_threshold);
        if let Err(err) = supervisor.start(id, threshold) {
            log::error!("autostart failed for camera {}: {}", id, err);
        }
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("crowdd running; press Ctrl-C to stop");
    loop {
        match rx.recv_timeout(MAINTENANCE_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        match store.enforce_retention(cfg.retention) {
            Ok(0) => {}
            Ok(removed) => log::info!("retention removed {} density samples", removed),
            Err(err) => log::warn!("retention pass failed: {:#}", err),
        }
        log::info!("active streams: {:?}", supervisor.active_cameras());
    }

    log::info!("shutdown signal received, stopping streams...");
    control.stop()?;
    supervisor.shutdown();
    log::info!("crowdd stopped");
    Ok(())
}
