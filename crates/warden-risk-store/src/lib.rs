//! Persistent, cross-run, time-windowed risk counters.
//!
//! Counters are keyed `(tenant, bucket)` and survive past a single run (the
//! whole reason they live in SQLite rather than in the per-run context),
//! mirroring the teacher workspace's causal-chain ledger: a SQLite connection
//! wrapped in a `Mutex` for `Send + Sync`, `PRAGMA journal_mode=WAL`, and
//! idempotent schema creation on open.

#![deny(unsafe_code)]

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use warden_core::types::RiskCounter;
use warden_core::PipelineError;

const CREATE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS risk_counters (
    tenant            TEXT    NOT NULL,
    bucket            TEXT    NOT NULL,
    count             INTEGER NOT NULL,
    window_start_epoch INTEGER NOT NULL,
    PRIMARY KEY (tenant, bucket)
);
";

fn store_err(e: rusqlite::Error) -> PipelineError {
    PipelineError::StoreError(e.to_string())
}

/// SQLite-backed risk counter store.
pub struct RiskStore {
    conn: Mutex<Connection>,
}

impl RiskStore {
    /// Open (or create) the risk-counter database at `path`.
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch(CREATE_SCHEMA_SQL).map_err(store_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory store (used in tests; process-local, not cross-run).
    pub fn open_in_memory() -> Result<Self, PipelineError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        conn.execute_batch(CREATE_SCHEMA_SQL).map_err(store_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Atomically increment `(tenant, bucket)`, resetting the window if it has
    /// expired, and return the resulting counter.
    pub fn increment(
        &self,
        tenant: &str,
        bucket: &str,
        now_epoch: u64,
        window_sec: u64,
    ) -> Result<RiskCounter, PipelineError> {
        let mut conn = self.conn.lock().expect("risk store lock poisoned");
        let tx = conn.transaction().map_err(store_err)?;

        let existing: Option<(u64, u64)> = tx
            .query_row(
                "SELECT count, window_start_epoch FROM risk_counters WHERE tenant = ?1 AND bucket = ?2",
                params![tenant, bucket],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        let (new_count, window_start) = match existing {
            Some((count, window_start)) if now_epoch.saturating_sub(window_start) < window_sec => {
                (count + 1, window_start)
            }
            _ => (1, now_epoch),
        };

        tx.execute(
            "INSERT INTO risk_counters (tenant, bucket, count, window_start_epoch)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant, bucket) DO UPDATE SET count = ?3, window_start_epoch = ?4",
            params![tenant, bucket, new_count, window_start],
        )
        .map_err(store_err)?;

        tx.commit().map_err(store_err)?;

        Ok(RiskCounter { count: new_count, window_start_epoch: window_start })
    }

    /// Read the current counter for `(tenant, bucket)` without mutating it.
    /// Returns a zero counter if no row exists yet.
    pub fn peek(&self, tenant: &str, bucket: &str) -> Result<RiskCounter, PipelineError> {
        let conn = self.conn.lock().expect("risk store lock poisoned");
        let existing: Option<(u64, u64)> = conn
            .query_row(
                "SELECT count, window_start_epoch FROM risk_counters WHERE tenant = ?1 AND bucket = ?2",
                params![tenant, bucket],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        Ok(match existing {
            Some((count, window_start_epoch)) => RiskCounter { count, window_start_epoch },
            None => RiskCounter { count: 0, window_start_epoch: now_epoch_fallback() },
        })
    }
}

fn now_epoch_fallback() -> u64 {
    0
}
