//! Public entry point: check-and-maybe-retrain, manual trigger, status,
//! policy update.
//!
//! Every read-modify-write of [`EngineState`] runs under a single retrain
//! guard. A second concurrent attempt is rejected with `RetrainInProgress`
//! instead of queueing behind the first.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng as _;
use serde::Serialize;

use crate::core::config::{Config, StateBackend};
use crate::core::errors::{Result, RgError};
use crate::engine::fingerprint;
use crate::engine::lock::RetrainLock;
use crate::engine::policy::{self, PolicyConfig, PolicyUpdate, Verdict};
use crate::engine::quality::{CommandEvaluator, QualityEvaluator};
use crate::engine::state::{EngineState, JsonFileStore, StateStore};
use crate::engine::supervisor::{CommandSupervisor, JobSupervisor};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

/// Prefix on the reason of retrains started by [`Orchestrator::check_and_retrain`].
pub const AUTO_TRIGGER_PREFIX: &str = "Auto-trigger: ";

// ──────────────────── result types ────────────────────

/// Result of one retrain attempt. A failed job is reported here, not as an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainOutcome {
    pub retrain_id: String,
    pub success: bool,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub previous_quality: Option<f64>,
    pub new_quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

/// Result of [`Orchestrator::check_and_retrain`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CheckReport {
    NoAction { reason: String, verdict: Verdict },
    Retrained(RetrainOutcome),
}

impl CheckReport {
    #[must_use]
    pub fn outcome(&self) -> Option<&RetrainOutcome> {
        match self {
            Self::Retrained(outcome) => Some(outcome),
            Self::NoAction { .. } => None,
        }
    }
}

/// Read-only snapshot for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub state: EngineState,
    pub verdict: Verdict,
    pub current_quality: Option<f64>,
    pub data_changed: bool,
    pub config: PolicyConfig,
    pub store: String,
    pub dataset: PathBuf,
    pub job: String,
}

// ──────────────────── orchestrator ────────────────────

/// Owns the engine collaborators for one model family.
pub struct Orchestrator {
    store: Box<dyn StateStore>,
    evaluator: Box<dyn QualityEvaluator>,
    supervisor: Box<dyn JobSupervisor>,
    dataset: PathBuf,
    policy: RwLock<PolicyConfig>,
    retrain_guard: Mutex<()>,
    logger: Option<ActivityLoggerHandle>,
}

impl Orchestrator {
    pub fn new(
        store: impl StateStore + 'static,
        evaluator: impl QualityEvaluator + 'static,
        supervisor: impl JobSupervisor + 'static,
        dataset: impl Into<PathBuf>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            store: Box::new(store),
            evaluator: Box::new(evaluator),
            supervisor: Box::new(supervisor),
            dataset: dataset.into(),
            policy: RwLock::new(policy),
            retrain_guard: Mutex::new(()),
            logger: None,
        }
    }

    /// Wire the command-driven collaborators described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Box<dyn StateStore> = match config.paths.state_backend {
            StateBackend::Json => Box::new(JsonFileStore::new(&config.paths.state_file)),
            #[cfg(feature = "sqlite")]
            StateBackend::Sqlite => Box::new(crate::engine::state::SqliteStateStore::open(
                &config.paths.sqlite_db,
            )?),
            #[cfg(not(feature = "sqlite"))]
            StateBackend::Sqlite => {
                return Err(RgError::InvalidConfig {
                    details: "paths.state_backend = \"sqlite\" requires the sqlite feature"
                        .to_string(),
                });
            }
        };
        Ok(Self::new(
            store,
            CommandEvaluator::new(config.evaluator.command.clone(), &config.job.working_dir),
            CommandSupervisor::from_config(&config.job),
            &config.paths.dataset,
            config.policy.clone(),
        ))
    }

    /// Attach the activity trail.
    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn dataset(&self) -> &Path {
        &self.dataset
    }

    /// Current policy snapshot.
    pub fn policy(&self) -> PolicyConfig {
        self.policy.read().clone()
    }

    /// Record the check, evaluate the policy and retrain when warranted.
    pub fn check_and_retrain(&self) -> Result<CheckReport> {
        let _guard = self
            .retrain_guard
            .try_lock()
            .ok_or(RgError::RetrainInProgress)?;
        let _store_lock = self.lock_store()?;

        let mut state = self.store.load()?;
        let now = Utc::now();
        state.last_check_time = Some(now);
        self.store.save(&state)?;

        let (changed, _) = fingerprint::has_changed(&self.dataset, &state)?;
        let quality = self.evaluator.current_quality();
        let verdict = policy::decide(&state, &self.policy.read(), changed, quality, now);

        self.emit(ActivityEvent::CheckCompleted {
            should_retrain: verdict.should_retrain,
            reason: verdict.reason(),
            quality,
            data_changed: changed,
        });

        if !verdict.should_retrain {
            return Ok(CheckReport::NoAction {
                reason: verdict.reason(),
                verdict,
            });
        }

        let reason = format!("{AUTO_TRIGGER_PREFIX}{}", verdict.reason());
        self.run_retrain(&state, reason, quality)
            .map(CheckReport::Retrained)
    }

    /// Manual retrain. Without `force`, an active cooldown rejects with `TooSoon`.
    pub fn trigger_retrain(&self, reason: &str, force: bool) -> Result<RetrainOutcome> {
        let _guard = self.retrain_guard.try_lock().ok_or_else(|| {
            self.emit(ActivityEvent::RetrainRejected {
                reason: reason.to_string(),
                error_code: RgError::RetrainInProgress.code().to_string(),
            });
            RgError::RetrainInProgress
        })?;
        let _store_lock = self.lock_store().inspect_err(|err| {
            self.emit(ActivityEvent::RetrainRejected {
                reason: reason.to_string(),
                error_code: err.code().to_string(),
            });
        })?;

        let state = self.store.load()?;
        let quality = self.evaluator.current_quality();

        if !force {
            let cooldown = policy::cooldown(&state, &self.policy.read(), Utc::now());
            if let Some(verdict) = cooldown {
                let err = RgError::TooSoon {
                    reason: verdict.reason(),
                };
                self.emit(ActivityEvent::RetrainRejected {
                    reason: verdict.reason(),
                    error_code: err.code().to_string(),
                });
                return Err(err);
            }
        }

        self.run_retrain(&state, reason.to_string(), quality)
    }

    /// Snapshot of state, verdict and signals. Never writes.
    pub fn status(&self) -> Result<StatusReport> {
        let state = self.store.load()?;
        let (data_changed, _) = fingerprint::has_changed(&self.dataset, &state)?;
        let current_quality = self.evaluator.current_quality();
        let config = self.policy();
        let verdict = policy::decide(&state, &config, data_changed, current_quality, Utc::now());
        Ok(StatusReport {
            state,
            verdict,
            current_quality,
            data_changed,
            config,
            store: self.store.describe(),
            dataset: self.dataset.clone(),
            job: self.supervisor.describe(),
        })
    }

    /// Merge the provided fields. An invalid result leaves the policy unchanged.
    pub fn update_config(&self, update: &PolicyUpdate) -> Result<PolicyConfig> {
        let mut current = self.policy.write();
        let mut next = current.clone();
        next.merge(update);
        next.validate()?;
        current.clone_from(&next);
        drop(current);

        self.emit(ActivityEvent::ConfigUpdated {
            details: serde_json::to_string(update)?,
        });
        Ok(next)
    }

    // ──────────────────── internals ────────────────────

    fn run_retrain(
        &self,
        state: &EngineState,
        reason: String,
        previous_quality: Option<f64>,
    ) -> Result<RetrainOutcome> {
        let retrain_id = new_retrain_id();
        let started_at = Utc::now();
        let timer = Instant::now();
        self.emit(ActivityEvent::RetrainStarted {
            retrain_id: retrain_id.clone(),
            reason: reason.clone(),
            previous_quality,
        });

        let output = self.supervisor.run_training_job().inspect_err(|err| {
            eprintln!("[RG-ENGINE] training job could not start: {err}");
            self.emit_error(err);
        })?;
        let duration_secs = timer.elapsed().as_secs_f64();
        let started_label = started_at.to_rfc3339_opts(SecondsFormat::Millis, true);

        if !output.succeeded() {
            let error = output.failure_detail();
            eprintln!("[RG-ENGINE] retrain {retrain_id} failed: {error}");
            self.emit(ActivityEvent::RetrainFailed {
                retrain_id: retrain_id.clone(),
                reason: reason.clone(),
                started_at: started_label,
                duration_secs,
                previous_quality,
                error: error.clone(),
            });
            return Ok(RetrainOutcome {
                retrain_id,
                success: false,
                reason,
                started_at,
                duration_secs,
                previous_quality,
                new_quality: None,
                error: Some(error),
                message: "Retraining failed".to_string(),
            });
        }

        let new_quality = self.evaluator.current_quality();
        let new_fingerprint = fingerprint::fingerprint(&self.dataset)?;
        let completed_at = Utc::now().max(started_at);
        let next = EngineState {
            last_retrain_time: Some(
                state
                    .last_retrain_time
                    .map_or(completed_at, |prev| prev.max(completed_at)),
            ),
            last_data_fingerprint: Some(new_fingerprint),
            last_quality_score: new_quality,
            retrain_count: state.retrain_count.saturating_add(1),
            last_check_time: Some(completed_at),
        };
        self.store.save(&next).inspect_err(|err| {
            eprintln!("[RG-ENGINE] retrain {retrain_id} succeeded but state was not saved: {err}");
            self.emit_error(err);
        })?;

        self.emit(ActivityEvent::RetrainSucceeded {
            retrain_id: retrain_id.clone(),
            reason: reason.clone(),
            started_at: started_label,
            duration_secs,
            previous_quality,
            new_quality,
        });
        Ok(RetrainOutcome {
            retrain_id,
            success: true,
            reason,
            started_at,
            duration_secs,
            previous_quality,
            new_quality,
            error: None,
            message: "Model retrained successfully".to_string(),
        })
    }

    /// Cross-process lock on the state store, when it has one.
    fn lock_store(&self) -> Result<Option<RetrainLock>> {
        self.store
            .lock_path()
            .map(|path| RetrainLock::try_acquire(&path))
            .transpose()
    }

    fn emit(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }

    fn emit_error(&self, err: &RgError) {
        self.emit(ActivityEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }
}

/// Random RFC 4122 version-4 identifier.
fn new_retrain_id() -> String {
    let mut bytes = [0_u8; 16];
    rand::rng().fill(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex = fingerprint::hex_encode(&bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
