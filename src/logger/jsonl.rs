//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! tailing reader never sees a partial line.
//!
//! Fallback chain:
//! 1. Primary file path
//! 2. Fallback path (e.g. `/dev/shm/rguard.jsonl`)
//! 3. stderr with `[RG-JSONL]` prefix
//! 4. Silent discard (logging failures never stop the engine)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RgError};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EngineStart,
    EngineStop,
    CheckComplete,
    RetrainStart,
    RetrainSuccess,
    RetrainFailure,
    RetrainRejected,
    ConfigUpdate,
    Error,
}

impl EventType {
    /// Stable snake_case label, identical to the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EngineStart => "engine_start",
            Self::EngineStop => "engine_stop",
            Self::CheckComplete => "check_complete",
            Self::RetrainStart => "retrain_start",
            Self::RetrainSuccess => "retrain_success",
            Self::RetrainFailure => "retrain_failure",
            Self::RetrainRejected => "retrain_rejected",
            Self::ConfigUpdate => "config_update",
            Self::Error => "error",
        }
    }
}

/// A single JSONL log entry; only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrain_id: Option<String>,
    /// Why a retrain ran, or why it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Quality before the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_quality: Option<f64>,
    /// Quality after the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// RG error code if the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            retrain_id: None,
            reason: None,
            old_quality: None,
            new_quality: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Where the writer is currently sending lines, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl Sink {
    const fn next(self) -> Self {
        match self {
            Self::Primary => Self::Fallback,
            Self::Fallback => Self::Stderr,
            Self::Stderr | Self::Discard => Self::Discard,
        }
    }
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Used when `path` cannot be opened; ideally on another filesystem.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the file would exceed this size. Default: 16 MiB.
    pub max_size_bytes: u64,
    /// Rotated files kept. Default: 5.
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: crate::core::config::PathsConfig::default().jsonl_log,
            fallback_path: Some(PathBuf::from("/dev/shm/rguard.jsonl")),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 10,
        }
    }
}

const BUF_CAPACITY: usize = 64 * 1024;

/// Append-only JSONL writer with size rotation and a fallback chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    sink: Sink,
    bytes_written: u64,
    last_fsync: Instant,
}

impl JsonlWriter {
    /// Open the primary path, walking down the chain until something accepts lines.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            sink: Sink::Primary,
            bytes_written: 0,
            last_fsync: Instant::now(),
        };
        w.settle(Sink::Primary);
        w
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[RG-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
        self.last_fsync = Instant::now();
    }

    #[must_use]
    pub const fn sink(&self) -> Sink {
        self.sink
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.sink != Sink::Primary
    }

    /// Switch back to the primary path if it can be opened again.
    /// Returns whether the writer is on the primary path afterwards.
    pub fn try_recover(&mut self) -> bool {
        if !self.is_degraded() {
            return true;
        }
        let Ok((file, size)) = open_append(&self.config.path) else {
            return false;
        };
        self.flush();
        self.writer = Some(BufWriter::with_capacity(BUF_CAPACITY, file));
        self.sink = Sink::Primary;
        self.bytes_written = size;
        let _ = writeln!(
            io::stderr(),
            "[RG-JSONL] back on primary path {}",
            self.config.path.display()
        );
        true
    }

    // ──────────────────────── internals ────────────────────────

    fn sink_path(&self, sink: Sink) -> Option<&Path> {
        match sink {
            Sink::Primary => Some(&self.config.path),
            Sink::Fallback => self.config.fallback_path.as_deref(),
            Sink::Stderr | Sink::Discard => None,
        }
    }

    /// Use the first sink at or after `from` that works.
    fn settle(&mut self, from: Sink) {
        self.writer = None;
        let mut sink = from;
        while matches!(sink, Sink::Primary | Sink::Fallback) {
            if let Some(path) = self.sink_path(sink)
                && let Ok((file, size)) = open_append(path)
            {
                self.writer = Some(BufWriter::with_capacity(BUF_CAPACITY, file));
                self.bytes_written = size;
                break;
            }
            sink = sink.next();
        }
        if sink != Sink::Primary && sink != self.sink {
            let _ = writeln!(io::stderr(), "[RG-JSONL] activity log degraded to {sink:?}");
        }
        self.sink = sink;
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.writer.is_some() && self.bytes_written + len > self.config.max_size_bytes {
            self.rotate();
        }

        match self.sink {
            Sink::Primary | Sink::Fallback => {
                let written = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if written {
                    self.bytes_written += len;
                    let due = Duration::from_secs(self.config.fsync_interval_secs);
                    if self.last_fsync.elapsed() >= due {
                        self.fsync();
                    }
                } else {
                    self.settle(self.sink.next());
                    self.write_line(line);
                }
            }
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[RG-JSONL] {line}");
            }
            Sink::Discard => {}
        }
    }

    /// `log` becomes `log.1`, `log.1` becomes `log.2`, and the oldest falls off.
    fn rotate(&mut self) {
        self.flush();
        let Some(base) = self.sink_path(self.sink).map(Path::to_path_buf) else {
            return;
        };
        self.writer = None;

        let keep = self.config.max_rotated_files.max(1);
        let _ = fs::remove_file(rotated_name(&base, keep));
        for i in (1..keep).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::with_capacity(BUF_CAPACITY, file));
                self.bytes_written = 0;
            }
            Err(_) => self.settle(self.sink.next()),
        }
    }
}

// ──────────────────────── helpers ────────────────────────

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| RgError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| RgError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────
