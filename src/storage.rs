//! Density sample persistence.
//!
//! Samples are append-only. Per camera, stored timestamps never decrease even
//! if the wall clock steps backwards; a regressed clock reuses the previous
//! timestamp.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sink for throttled density samples.
pub trait MetricStore: Send + Sync {
    /// Append one sample; returns the stored row id.
    fn append(&self, camera_id: &str, person_count: u32, density_value: f64, alert: bool)
        -> Result<i64>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DensityRecord {
    pub id: i64,
    pub camera_id: String,
    pub timestamp_ms: i64,
    pub person_count: u32,
    pub density_value: f64,
    pub alert_triggered: bool,
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub(crate) fn now_ms() -> Result<i64> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
    i64::try_from(elapsed.as_millis()).map_err(|_| anyhow!("system time exceeds i64 range"))
}

pub struct SqliteMetricStore {
    conn: Mutex<Connection>,
}

impl SqliteMetricStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("open density database {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("density store lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS density_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              camera_id TEXT NOT NULL,
              timestamp_ms INTEGER NOT NULL,
              person_count INTEGER NOT NULL,
              density_value REAL NOT NULL,
              alert_triggered INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_density_camera_time
              ON density_logs(camera_id, timestamp_ms);
            "#,
        )?;
        Ok(())
    }

    fn append_at(
        &self,
        camera_id: &str,
        person_count: u32,
        density_value: f64,
        alert: bool,
        now_ms: i64,
    ) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let last: Option<i64> = tx
            .query_row(
                "SELECT MAX(timestamp_ms) FROM density_logs WHERE camera_id = ?1",
                params![camera_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let timestamp_ms = last.map_or(now_ms, |last| last.max(now_ms));
        tx.execute(
            r#"
            INSERT INTO density_logs(camera_id, timestamp_ms, person_count, density_value, alert_triggered)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![camera_id, timestamp_ms, person_count, density_value, alert],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Most recent samples for a camera, newest first.
    pub fn find_by_camera(&self, camera_id: &str, limit: usize) -> Result<Vec<DensityRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, camera_id, timestamp_ms, person_count, density_value, alert_triggered
            FROM density_logs WHERE camera_id = ?1
            ORDER BY timestamp_ms DESC, id DESC LIMIT ?2
            "#,
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![camera_id, limit], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Samples from the last `minutes`, oldest first.
    pub fn find_recent_by_camera(&self, camera_id: &str, minutes: u32) -> Result<Vec<DensityRecord>> {
        let since = now_ms()? - i64::from(minutes) * 60_000;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, camera_id, timestamp_ms, person_count, density_value, alert_triggered
            FROM density_logs WHERE camera_id = ?1 AND timestamp_ms >= ?2
            ORDER BY timestamp_ms ASC, id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![camera_id, since], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete samples older than `retention`; returns rows removed.
    pub fn enforce_retention(&self, retention: Duration) -> Result<usize> {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms()?.saturating_sub(retention_ms);
        let removed = self.lock()?.execute(
            "DELETE FROM density_logs WHERE timestamp_ms < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }
}

impl MetricStore for SqliteMetricStore {
    fn append(
        &self,
        camera_id: &str,
        person_count: u32,
        density_value: f64,
        alert: bool,
    ) -> Result<i64> {
        self.append_at(camera_id, person_count, density_value, alert, now_ms()?)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DensityRecord> {
    Ok(DensityRecord {
        id: row.get(0)?,
        camera_id: row.get(1)?,
        timestamp_ms: row.get(2)?,
        person_count: row.get(3)?,
        density_value: row.get(4)?,
        alert_triggered: row.get(5)?,
    })
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryMetricStore {
    records: Mutex<Vec<DensityRecord>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DensityRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count_for(&self, camera_id: &str) -> usize {
        self.records()
            .iter()
            .filter(|r| r.camera_id == camera_id)
            .count()
    }
}

impl MetricStore for InMemoryMetricStore {
    fn append(
        &self,
        camera_id: &str,
        person_count: u32,
        density_value: f64,
        alert: bool,
    ) -> Result<i64> {
        let now = now_ms()?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let last = records
            .iter()
            .filter(|r| r.camera_id == camera_id)
            .map(|r| r.timestamp_ms)
            .max();
        let id = records.len() as i64 + 1;
        records.push(DensityRecord {
            id,
            camera_id: camera_id.to_string(),
            timestamp_ms: last.map_or(now, |last| last.max(now)),
            person_count,
            density_value,
            alert_triggered: alert,
        });
        Ok(id)
    }
}
