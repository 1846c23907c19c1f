//! Hash-chained audit trail for stream lifecycle actions.
//!
//! Each record stores `entry_hash = SHA-256(prev_hash || payload_json)`; the
//! first record chains from 32 zero bytes. Tampering with or deleting a row
//! breaks verification of every later one.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

use crate::storage::{now_ms, open_db_connection};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    StreamStarted,
    StreamStopped,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub camera_id: String,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AuditRecord {
    pub fn now(action: AuditAction, camera_id: &str, details: Option<String>) -> Self {
        Self {
            action,
            camera_id: camera_id.to_string(),
            timestamp_ms: now_ms().unwrap_or_default(),
            details,
        }
    }
}

pub trait AuditLog: Send + Sync {
    fn append(&self, record: &AuditRecord) -> Result<()>;
}

pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

fn to_hash(bytes: Vec<u8>, what: &str) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| anyhow!("corrupt audit log: {} size", what))
}

pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

impl SqliteAuditLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL,
              prev_hash BLOB NOT NULL,
              entry_hash BLOB NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("audit log lock poisoned"))
    }

    /// Recompute every entry hash in id order. Returns the record count.
    pub fn verify_chain(&self) -> Result<usize> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, payload_json, prev_hash, entry_hash FROM audit_log ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;
        let mut expected_prev = [0u8; 32];
        let mut count = 0;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let payload: String = row.get(1)?;
            let prev = to_hash(row.get(2)?, "prev_hash")?;
            let entry = to_hash(row.get(3)?, "entry_hash")?;
            if prev != expected_prev {
                return Err(anyhow!(
                    "audit chain broken at id {}: prev_hash {} != expected {}",
                    id,
                    hex::encode(prev),
                    hex::encode(expected_prev)
                ));
            }
            let computed = hash_entry(&prev, payload.as_bytes());
            if computed != entry {
                return Err(anyhow!(
                    "audit chain broken at id {}: entry_hash {} != computed {}",
                    id,
                    hex::encode(entry),
                    hex::encode(computed)
                ));
            }
            expected_prev = entry;
            count += 1;
        }
        Ok(count)
    }

    pub fn records(&self) -> Result<Vec<AuditRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload_json FROM audit_log ORDER BY id ASC")?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(Into::into))
            .collect()
    }
}

impl AuditLog for SqliteAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        let payload_json = serde_json::to_string(record)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let prev_hash = {
            let mut stmt =
                tx.prepare("SELECT entry_hash FROM audit_log ORDER BY id DESC LIMIT 1")?;
            let mut rows = stmt.query([])?;
            let prev = match rows.next()? {
                Some(row) => to_hash(row.get(0)?, "entry_hash")?,
                None => [0u8; 32],
            };
            prev
        };
        let entry_hash = hash_entry(&prev_hash, payload_json.as_bytes());
        tx.execute(
            r#"
            INSERT INTO audit_log(created_at, payload_json, prev_hash, entry_hash)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                record.timestamp_ms,
                payload_json,
                prev_hash.to_vec(),
                entry_hash.to_vec()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("audit log lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}
