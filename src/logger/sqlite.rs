//! SQLite activity store: WAL-mode database holding the activity trail and
//! the per-attempt retrain history.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;

use crate::core::errors::{Result, RgError};

/// SQLite activity logger with WAL mode and cached prepared statements.
pub struct SqliteLogger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLogger {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| RgError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ──────────────────── activity_log ────────────────────

    pub fn log_activity(&self, row: &ActivityRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO activity_log (
                timestamp, event_type, severity, retrain_id, reason, old_quality,
                new_quality, duration_ms, success, error_code, error_message, details
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.retrain_id,
                row.reason,
                row.old_quality,
                row.new_quality,
                row.duration_ms,
                row.success,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    /// Delete activity rows older than `retention_days`.
    pub fn prune_activity_log(&self, retention_days: u32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let cutoff_str = cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let deleted = self.conn.execute(
            "DELETE FROM activity_log WHERE timestamp < ?1",
            params![cutoff_str],
        )?;
        Ok(deleted)
    }

    // ──────────────────── retrain_log ────────────────────

    /// Record one retrain attempt. Re-recording the same id replaces the row.
    pub fn log_retrain(&self, row: &RetrainRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO retrain_log (
                id, timestamp, reason, success, duration_secs, old_quality,
                new_quality, error_message
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            )?
            .execute(params![
                row.id,
                row.timestamp,
                row.reason,
                row.success,
                row.duration_secs,
                row.old_quality,
                row.new_quality,
                row.error_message,
            ])?;
        Ok(())
    }

    /// Retrain attempts, newest first.
    pub fn recent_retrains(&self, limit: u32) -> Result<Vec<RetrainRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, timestamp, reason, success, duration_secs, old_quality,
                    new_quality, error_message
             FROM retrain_log ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(RetrainRow {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    reason: row.get(2)?,
                    success: row.get(3)?,
                    duration_secs: row.get(4)?,
                    old_quality: row.get(5)?,
                    new_quality: row.get(6)?,
                    error_message: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ──────────────────── row types ────────────────────

/// Row for the `activity_log` table.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub retrain_id: Option<String>,
    pub reason: Option<String>,
    pub old_quality: Option<f64>,
    pub new_quality: Option<f64>,
    pub duration_ms: Option<i64>,
    pub success: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

/// Row for the `retrain_log` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainRow {
    pub id: String,
    pub timestamp: String,
    pub reason: String,
    pub success: bool,
    pub duration_secs: f64,
    pub old_quality: Option<f64>,
    pub new_quality: Option<f64>,
    pub error_message: Option<String>,
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -2000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[RG-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            retrain_id TEXT,
            reason TEXT,
            old_quality REAL,
            new_quality REAL,
            duration_ms INTEGER,
            success INTEGER NOT NULL DEFAULT 1,
            error_code TEXT,
            error_message TEXT,
            details TEXT
        );

        CREATE TABLE IF NOT EXISTS retrain_log (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            reason TEXT NOT NULL,
            success INTEGER NOT NULL,
            duration_secs REAL NOT NULL,
            old_quality REAL,
            new_quality REAL,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_activity_type_time ON activity_log(event_type, timestamp);
        CREATE INDEX IF NOT EXISTS idx_retrain_timestamp ON retrain_log(timestamp);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
