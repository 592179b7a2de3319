//! Durable engine state: last retrain, last fingerprint, last quality.
//!
//! Every store either returns a complete record or fails with
//! `StoreUnavailable`. An unreadable record is never replaced by defaults.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RgError};

/// Last-known facts about the model family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineState {
    /// Completion time of the last successful retrain.
    pub last_retrain_time: Option<DateTime<Utc>>,
    /// Dataset fingerprint recorded at the last successful retrain.
    pub last_data_fingerprint: Option<String>,
    /// Quality measured right after the last successful retrain.
    pub last_quality_score: Option<f64>,
    /// Successful retrains only.
    pub retrain_count: u64,
    /// Last time a decision was evaluated.
    pub last_check_time: Option<DateTime<Utc>>,
}

/// Persistence seam for [`EngineState`].
pub trait StateStore: Send + Sync {
    /// Load the record; an uninitialized store yields `EngineState::default()`.
    fn load(&self) -> Result<EngineState>;
    /// Replace the record atomically.
    fn save(&self, state: &EngineState) -> Result<()>;
    /// Human-readable location for logs and status output.
    fn describe(&self) -> String;
    /// File other processes lock to serialize retrains against this store.
    /// `None` for stores private to one process.
    fn lock_path(&self) -> Option<PathBuf> {
        None
    }
}

impl<S: StateStore + ?Sized> StateStore for Box<S> {
    fn load(&self) -> Result<EngineState> {
        (**self).load()
    }
    fn save(&self, state: &EngineState) -> Result<()> {
        (**self).save(state)
    }
    fn describe(&self) -> String {
        (**self).describe()
    }
    fn lock_path(&self) -> Option<PathBuf> {
        (**self).lock_path()
    }
}

// ──────────────────── JSON file ────────────────────

/// Pretty-printed JSON document replaced via temp file + rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes writers inside this process; rename keeps readers consistent.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<EngineState> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(EngineState::default());
            }
            Err(err) => return Err(RgError::store(&self.path, format!("read failed: {err}"))),
        };
        serde_json::from_str(&raw)
            .map_err(|err| RgError::store(&self.path, format!("corrupt state document: {err}")))
    }

    fn save(&self, state: &EngineState) -> Result<()> {
        let _guard = self.write_lock.lock();
        write_state_atomic(&self.path, state)
            .map_err(|err| RgError::store(&self.path, format!("write failed: {err}")))
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }

    fn lock_path(&self) -> Option<PathBuf> {
        Some(sibling_lock_path(&self.path))
    }
}

/// `retrain_state.json` -> `retrain_state.json.lock`.
pub(crate) fn sibling_lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn write_state_atomic(path: &Path, state: &EngineState) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;

    let result = (|| {
        {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

// ──────────────────── SQLite ────────────────────

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteStateStore;

#[cfg(feature = "sqlite")]
mod sqlite_store {
    use super::{EngineState, Path, PathBuf, Result, RgError, StateStore};

    use chrono::{DateTime, SecondsFormat, Utc};
    use parking_lot::Mutex;
    use rusqlite::{Connection, OpenFlags, OptionalExtension as _, params};

    /// Single-row `engine_state` table in a WAL-mode database.
    pub struct SqliteStateStore {
        conn: Mutex<Connection>,
        path: PathBuf,
    }

    impl SqliteStateStore {
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
            )
            .map_err(|err| RgError::store(path, err.to_string()))?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;
                 CREATE TABLE IF NOT EXISTS engine_state (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    last_retrain_time TEXT,
                    last_data_fingerprint TEXT,
                    last_quality_score REAL,
                    retrain_count INTEGER NOT NULL DEFAULT 0,
                    last_check_time TEXT
                 );",
            )
            .map_err(|err| RgError::store(path, err.to_string()))?;
            Ok(Self {
                conn: Mutex::new(conn),
                path: path.to_path_buf(),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn parse_ts(&self, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
            raw.map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|err| RgError::store(&self.path, format!("bad timestamp {s:?}: {err}")))
            })
            .transpose()
        }
    }

    fn fmt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
        ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    type StateRow = (
        Option<String>,
        Option<String>,
        Option<f64>,
        i64,
        Option<String>,
    );

    impl StateStore for SqliteStateStore {
        fn load(&self) -> Result<EngineState> {
            let row: Option<StateRow> = {
                let conn = self.conn.lock();
                conn.query_row(
                    "SELECT last_retrain_time, last_data_fingerprint, last_quality_score,
                            retrain_count, last_check_time
                     FROM engine_state WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(|err| RgError::store(&self.path, err.to_string()))?
            };
            let Some((retrain, fingerprint, quality, count, check)) = row else {
                return Ok(EngineState::default());
            };
            Ok(EngineState {
                last_retrain_time: self.parse_ts(retrain)?,
                last_data_fingerprint: fingerprint,
                last_quality_score: quality,
                retrain_count: u64::try_from(count).map_err(|_| {
                    RgError::store(&self.path, format!("negative retrain_count {count}"))
                })?,
                last_check_time: self.parse_ts(check)?,
            })
        }

        fn save(&self, state: &EngineState) -> Result<()> {
            let count = i64::try_from(state.retrain_count).unwrap_or(i64::MAX);
            let mut conn = self.conn.lock();
            let tx = conn
                .transaction()
                .map_err(|err| RgError::store(&self.path, err.to_string()))?;
            tx.execute(
                "INSERT INTO engine_state (
                    id, last_retrain_time, last_data_fingerprint, last_quality_score,
                    retrain_count, last_check_time
                 ) VALUES (1, ?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    last_retrain_time = excluded.last_retrain_time,
                    last_data_fingerprint = excluded.last_data_fingerprint,
                    last_quality_score = excluded.last_quality_score,
                    retrain_count = excluded.retrain_count,
                    last_check_time = excluded.last_check_time",
                params![
                    fmt_ts(state.last_retrain_time),
                    state.last_data_fingerprint,
                    state.last_quality_score,
                    count,
                    fmt_ts(state.last_check_time),
                ],
            )
            .map_err(|err| RgError::store(&self.path, err.to_string()))?;
            tx.commit()
                .map_err(|err| RgError::store(&self.path, err.to_string()))
        }

        fn describe(&self) -> String {
            format!("sqlite:{}", self.path.display())
        }

        fn lock_path(&self) -> Option<PathBuf> {
            Some(super::sibling_lock_path(&self.path))
        }
    }
}

// ──────────────────── memory ────────────────────

/// In-process store. `fail_next_save` lets callers simulate a broken medium.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Option<EngineState>>,
    fail_saves: Mutex<bool>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_state(state: EngineState) -> Self {
        Self {
            inner: Mutex::new(Some(state)),
            fail_saves: Mutex::new(false),
        }
    }

    /// Make every subsequent `save` fail with `StoreUnavailable`.
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock() = fail;
    }

    /// Snapshot without going through the trait.
    #[must_use]
    pub fn snapshot(&self) -> EngineState {
        self.inner.lock().clone().unwrap_or_default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<EngineState> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &EngineState) -> Result<()> {
        if *self.fail_saves.lock() {
            return Err(RgError::store("memory", "saves disabled"));
        }
        *self.inner.lock() = Some(state.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> EngineState {
        EngineState {
            last_retrain_time: Some(Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap()),
            last_data_fingerprint: Some("deadbeef".to_string()),
            last_quality_score: Some(0.875),
            retrain_count: 3,
            last_check_time: Some(Utc.with_ymd_and_hms(2026, 2, 3, 5, 0, 0).unwrap()),
        }
    }

    #[test]
    fn json_missing_file_is_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().unwrap(), EngineState::default());
    }

    #[test]
    fn lock_path_sits_next_to_the_store() {
        let store = JsonFileStore::new("/var/lib/rguard/retrain_state.json");
        assert_eq!(
            store.lock_path(),
            Some(PathBuf::from("/var/lib/rguard/retrain_state.json.lock"))
        );
        assert_eq!(MemoryStateStore::new().lock_path(), None);
        let boxed: Box<dyn StateStore> = Box::new(store);
        assert!(boxed.lock_path().is_some());
    }

    #[test]
    fn json_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/logs/state.json"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
        assert!(!dir.path().join("nested/logs/state.json.tmp").exists());
    }

    #[test]
    fn json_corrupt_file_is_unavailable_not_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert_eq!(err.code(), "RG-3001");
        assert!(err.to_string().contains("corrupt"));
    }

    #[test]
    fn json_partial_document_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"retrain_count": 7}"#).unwrap();
        let state = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(state.retrain_count, 7);
        assert!(state.last_retrain_time.is_none());
    }

    #[test]
    fn json_unwritable_location_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let store = JsonFileStore::new(blocker.join("state.json"));
        let err = store.save(&sample()).unwrap_err();
        assert_eq!(err.code(), "RG-3001");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_uninitialized_then_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStateStore::open(&dir.path().join("state.db")).unwrap();
        assert_eq!(store.load().unwrap(), EngineState::default());

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());

        let mut next = sample();
        next.retrain_count = 4;
        next.last_data_fingerprint = None;
        store.save(&next).unwrap();
        assert_eq!(store.load().unwrap(), next);
        assert!(store.describe().starts_with("sqlite:"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        SqliteStateStore::open(&path).unwrap().save(&sample()).unwrap();
        let reopened = SqliteStateStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), sample());
    }

    #[test]
    fn memory_store_round_trip_and_failure_injection() {
        let store = MemoryStateStore::new();
        assert_eq!(store.load().unwrap(), EngineState::default());
        store.save(&sample()).unwrap();
        assert_eq!(store.snapshot(), sample());

        store.set_fail_saves(true);
        assert!(store.save(&EngineState::default()).is_err());
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn boxed_store_delegates() {
        let store: Box<dyn StateStore> = Box::new(MemoryStateStore::with_state(sample()));
        assert_eq!(store.load().unwrap(), sample());
        assert_eq!(store.describe(), "memory");
    }
}
