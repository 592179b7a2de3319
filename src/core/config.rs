//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RgError};
use crate::engine::policy::PolicyConfig;

/// Full retrain_guard configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Initial policy; reset to this on every restart.
    pub policy: PolicyConfig,
    pub paths: PathsConfig,
    pub job: JobConfig,
    pub evaluator: EvaluatorConfig,
    pub daemon: DaemonConfig,
    pub logging: LoggingConfig,
}

/// Which `StateStore` implementation backs the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Json,
    Sqlite,
}

/// Filesystem paths used by rguard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Processed dataset the training job reads and the engine fingerprints.
    pub dataset: PathBuf,
    pub state_backend: StateBackend,
    pub state_file: PathBuf,
    pub sqlite_db: PathBuf,
    pub jsonl_log: PathBuf,
}

/// External training job command line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// Quality evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// External evaluation command (argv). Empty disables evaluation.
    pub command: Vec<String>,
    pub model_name: String,
    pub target_column: String,
    pub test_fraction: f64,
    pub split_seed: u64,
}

/// Background check loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    pub check_interval_secs: u64,
}

/// Activity trail housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// SQLite activity rows older than this are pruned. 0 keeps everything.
    pub activity_retention_days: u32,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = home_dir();
        let cfg = home_dir.join(".config").join("rguard").join("config.toml");
        let data = home_dir.join(".local").join("share").join("rguard");
        Self {
            config_file: cfg,
            dataset: PathBuf::from("data/processed/cleaned.csv"),
            state_backend: StateBackend::Json,
            state_file: data.join("retrain_state.json"),
            sqlite_db: data.join("activity.sqlite3"),
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["src/models/train.py".to_string()],
            working_dir: PathBuf::from("."),
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            model_name: "HousingModel".to_string(),
            target_column: "target".to_string(),
            test_fraction: 0.2,
            split_seed: 42,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 3_600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            activity_retention_days: 30,
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[RG-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| RgError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(RgError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // policy
        if let Some(raw) = lookup("RG_POLICY_MIN_QUALITY_THRESHOLD") {
            self.policy.min_quality_threshold =
                parse_env("RG_POLICY_MIN_QUALITY_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("RG_POLICY_DEGRADATION_THRESHOLD") {
            self.policy.degradation_threshold =
                parse_env("RG_POLICY_DEGRADATION_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("RG_POLICY_AUTO_RETRAIN_ENABLED") {
            self.policy.auto_retrain_enabled = parse_env("RG_POLICY_AUTO_RETRAIN_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("RG_POLICY_MIN_RETRAIN_INTERVAL_SECS") {
            self.policy.min_retrain_interval_secs =
                parse_env("RG_POLICY_MIN_RETRAIN_INTERVAL_SECS", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("RG_PATHS_DATASET") {
            self.paths.dataset = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("RG_PATHS_STATE_FILE") {
            self.paths.state_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("RG_PATHS_SQLITE_DB") {
            self.paths.sqlite_db = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("RG_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("RG_PATHS_STATE_BACKEND") {
            self.paths.state_backend = match raw.trim().to_ascii_lowercase().as_str() {
                "json" => StateBackend::Json,
                "sqlite" => StateBackend::Sqlite,
                other => {
                    return Err(RgError::ConfigParse {
                        context: "env",
                        details: format!("RG_PATHS_STATE_BACKEND={other:?}: expected json|sqlite"),
                    });
                }
            };
        }

        // job
        if let Some(raw) = lookup("RG_JOB_PROGRAM") {
            self.job.program = raw;
        }
        if let Some(raw) = lookup("RG_JOB_WORKING_DIR") {
            self.job.working_dir = PathBuf::from(raw);
        }

        // evaluator
        if let Some(raw) = lookup("RG_EVALUATOR_MODEL_NAME") {
            self.evaluator.model_name = raw;
        }

        // daemon
        if let Some(raw) = lookup("RG_DAEMON_CHECK_INTERVAL_SECS") {
            self.daemon.check_interval_secs = parse_env("RG_DAEMON_CHECK_INTERVAL_SECS", &raw)?;
        }

        // logging
        if let Some(raw) = lookup("RG_LOGGING_ACTIVITY_RETENTION_DAYS") {
            self.logging.activity_retention_days =
                parse_env("RG_LOGGING_ACTIVITY_RETENTION_DAYS", &raw)?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.policy.validate()?;

        if self.job.program.trim().is_empty() {
            return Err(RgError::InvalidConfig {
                details: "job.program must not be empty".to_string(),
            });
        }

        let fraction = self.evaluator.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(RgError::InvalidConfig {
                details: format!("evaluator.test_fraction must be in (0, 1), got {fraction}"),
            });
        }

        if self.evaluator.target_column.trim().is_empty() {
            return Err(RgError::InvalidConfig {
                details: "evaluator.target_column must not be empty".to_string(),
            });
        }

        if self.daemon.check_interval_secs == 0 {
            return Err(RgError::InvalidConfig {
                details: "daemon.check_interval_secs must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| RgError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
