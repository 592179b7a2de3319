//! Dual-write coordinator: every activity event goes to JSONL and, when
//! enabled, SQLite.
//!
//! A dedicated logger thread owns the `SqliteLogger` and `JsonlWriter`. Other
//! threads send `ActivityEvent`s over a bounded crossbeam channel with
//! `try_send()`, so a retrain never waits on log I/O.
//!
//! Between events the thread also does upkeep: a degraded JSONL writer is
//! pointed back at its primary path, and SQLite activity rows past the
//! retention window are pruned at startup and then daily.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::core::config::Config;
use crate::core::errors::{Result, RgError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ActivityRow, RetrainRow, SqliteLogger};

const CHANNEL_CAPACITY: usize = 1024;
const RECOVERY_INTERVAL: Duration = Duration::from_secs(30);
#[cfg(feature = "sqlite")]
const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

// ──────────────────── public event type ────────────────────

/// Events recorded in the activity trail.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    EngineStarted {
        version: String,
        config_hash: String,
    },
    EngineStopped {
        reason: String,
        uptime_secs: u64,
    },
    CheckCompleted {
        should_retrain: bool,
        reason: String,
        quality: Option<f64>,
        data_changed: bool,
    },
    RetrainStarted {
        retrain_id: String,
        reason: String,
        previous_quality: Option<f64>,
    },
    RetrainSucceeded {
        retrain_id: String,
        reason: String,
        started_at: String,
        duration_secs: f64,
        previous_quality: Option<f64>,
        new_quality: Option<f64>,
    },
    RetrainFailed {
        retrain_id: String,
        reason: String,
        started_at: String,
        duration_secs: f64,
        previous_quality: Option<f64>,
        error: String,
    },
    RetrainRejected {
        reason: String,
        error_code: String,
    },
    ConfigUpdated {
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking; a full channel drops
    /// the event and bumps the dropped counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only until the sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

/// Options for building the dual-write logger.
pub struct DualLoggerConfig {
    /// `None` disables SQLite.
    pub sqlite_path: Option<PathBuf>,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
    /// SQLite activity rows older than this are pruned; 0 disables pruning.
    pub activity_retention_days: u32,
}

impl DualLoggerConfig {
    /// Logger wired to the configured data paths and retention.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let paths = &config.paths;
        Self {
            sqlite_path: cfg!(feature = "sqlite").then(|| paths.sqlite_db.clone()),
            jsonl_config: JsonlConfig {
                path: paths.jsonl_log.clone(),
                ..JsonlConfig::default()
            },
            channel_capacity: CHANNEL_CAPACITY,
            activity_retention_days: config.logging.activity_retention_days,
        }
    }
}

impl Default for DualLoggerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle plus its join handle.
///
/// The thread runs until `handle.shutdown()` is called or every sender is dropped.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("rguard-logger".to_string())
        .spawn(move || {
            logger_thread_main(rx, config, dropped_clone);
        })
        .map_err(|e| RgError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(rx: Receiver<ActivityEvent>, config: DualLoggerConfig, dropped: Arc<AtomicU64>) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = config.sqlite_path.and_then(|p| match SqliteLogger::open(&p) {
        Ok(db) => Some(db),
        Err(e) => {
            eprintln!("[RG-DUAL] failed to open SQLite at {}: {e}", p.display());
            None
        }
    });
    #[cfg(feature = "sqlite")]
    let mut last_prune = Instant::now();
    #[cfg(feature = "sqlite")]
    if let Some(db) = &sqlite {
        prune_activity(db, config.activity_retention_days);
    }

    let mut jsonl = JsonlWriter::open(config.jsonl_config);
    let mut last_recovery = Instant::now();
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    loop {
        let event = match rx.recv_timeout(RECOVERY_INTERVAL) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if jsonl.is_degraded() && last_recovery.elapsed() >= RECOVERY_INTERVAL {
            last_recovery = Instant::now();
            jsonl.try_recover();
        }
        #[cfg(feature = "sqlite")]
        if last_prune.elapsed() >= PRUNE_INTERVAL {
            last_prune = Instant::now();
            if let Some(db) = &sqlite {
                prune_activity(db, config.activity_retention_days);
            }
        }

        let Some(event) = event else {
            continue;
        };

        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        let entry = event_to_log_entry(&event);
        jsonl.write_entry(&entry);

        #[cfg(feature = "sqlite")]
        if let Some(db) = &sqlite {
            let activity_ok = db.log_activity(&entry_to_activity_row(&entry)).is_ok();
            let retrain_ok = event_to_retrain_row(&event)
                .as_ref()
                .is_none_or(|row| db.log_retrain(row).is_ok());
            if activity_ok && retrain_ok {
                sqlite_failures = 0;
            } else {
                sqlite_failures += 1;
                if sqlite_failures >= 3 {
                    eprintln!("[RG-DUAL] SQLite write failed {sqlite_failures} times, disabling");
                    sqlite = None;
                }
            }
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

#[cfg(feature = "sqlite")]
fn prune_activity(db: &SqliteLogger, retention_days: u32) {
    if retention_days == 0 {
        return;
    }
    match db.prune_activity_log(retention_days) {
        Ok(0) => {}
        Ok(n) => eprintln!(
            "[RG-DUAL] pruned {n} activity rows older than {retention_days}d from {}",
            db.path().display()
        ),
        Err(e) => eprintln!("[RG-DUAL] activity prune failed: {e}"),
    }
}

// ──────────────────── event conversion ────────────────────

#[allow(
    clippy::too_many_lines,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    let secs_to_ms = |secs: f64| (secs.max(0.0) * 1000.0).round() as u64;
    match event {
        ActivityEvent::EngineStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::EngineStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::EngineStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::EngineStop, Severity::Info);
            e.reason = Some(reason.clone());
            e.details = Some(format!("uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::CheckCompleted {
            should_retrain,
            reason,
            quality,
            data_changed,
        } => {
            let mut e = LogEntry::new(EventType::CheckComplete, Severity::Info);
            e.reason = Some(reason.clone());
            e.new_quality = *quality;
            e.details = Some(format!(
                "should_retrain={should_retrain} data_changed={data_changed}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::RetrainStarted {
            retrain_id,
            reason,
            previous_quality,
        } => {
            let mut e = LogEntry::new(EventType::RetrainStart, Severity::Info);
            e.retrain_id = Some(retrain_id.clone());
            e.reason = Some(reason.clone());
            e.old_quality = *previous_quality;
            e
        }
        ActivityEvent::RetrainSucceeded {
            retrain_id,
            reason,
            started_at,
            duration_secs,
            previous_quality,
            new_quality,
        } => {
            let mut e = LogEntry::new(EventType::RetrainSuccess, Severity::Info);
            e.retrain_id = Some(retrain_id.clone());
            e.reason = Some(reason.clone());
            e.old_quality = *previous_quality;
            e.new_quality = *new_quality;
            e.duration_ms = Some(secs_to_ms(*duration_secs));
            e.details = Some(format!("started_at={started_at}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::RetrainFailed {
            retrain_id,
            reason,
            started_at,
            duration_secs,
            previous_quality,
            error,
        } => {
            let mut e = LogEntry::new(EventType::RetrainFailure, Severity::Warning);
            e.retrain_id = Some(retrain_id.clone());
            e.reason = Some(reason.clone());
            e.old_quality = *previous_quality;
            e.duration_ms = Some(secs_to_ms(*duration_secs));
            e.error_message = Some(error.clone());
            e.details = Some(format!("started_at={started_at}"));
            e.ok = Some(false);
            e
        }
        ActivityEvent::RetrainRejected { reason, error_code } => {
            let mut e = LogEntry::new(EventType::RetrainRejected, Severity::Info);
            e.reason = Some(reason.clone());
            e.error_code = Some(error_code.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::ConfigUpdated { details } => {
            let mut e = LogEntry::new(EventType::ConfigUpdate, Severity::Info);
            e.details = Some(details.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::EngineStop, Severity::Info),
    }
}

#[cfg(feature = "sqlite")]
fn entry_to_activity_row(entry: &LogEntry) -> ActivityRow {
    let severity = match entry.severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    };
    ActivityRow {
        timestamp: entry.ts.clone(),
        event_type: entry.event.as_str().to_string(),
        severity: severity.to_string(),
        retrain_id: entry.retrain_id.clone(),
        reason: entry.reason.clone(),
        old_quality: entry.old_quality,
        new_quality: entry.new_quality,
        duration_ms: entry.duration_ms.and_then(|ms| i64::try_from(ms).ok()),
        success: entry.ok.unwrap_or(true),
        error_code: entry.error_code.clone(),
        error_message: entry.error_message.clone(),
        details: entry.details.clone(),
    }
}

#[cfg(feature = "sqlite")]
fn event_to_retrain_row(event: &ActivityEvent) -> Option<RetrainRow> {
    match event {
        ActivityEvent::RetrainSucceeded {
            retrain_id,
            reason,
            started_at,
            duration_secs,
            previous_quality,
            new_quality,
        } => Some(RetrainRow {
            id: retrain_id.clone(),
            timestamp: started_at.clone(),
            reason: reason.clone(),
            success: true,
            duration_secs: *duration_secs,
            old_quality: *previous_quality,
            new_quality: *new_quality,
            error_message: None,
        }),
        ActivityEvent::RetrainFailed {
            retrain_id,
            reason,
            started_at,
            duration_secs,
            previous_quality,
            error,
        } => Some(RetrainRow {
            id: retrain_id.clone(),
            timestamp: started_at.clone(),
            reason: reason.clone(),
            success: false,
            duration_secs: *duration_secs,
            old_quality: *previous_quality,
            new_quality: None,
            error_message: Some(error.clone()),
        }),
        _ => None,
    }
}

// ──────────────────── tests ────────────────────
