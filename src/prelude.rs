//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use retrain_guard::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, RgError};

// Engine
pub use crate::engine::fingerprint::{fingerprint, has_changed};
pub use crate::engine::orchestrator::{CheckReport, Orchestrator, RetrainOutcome, StatusReport};
pub use crate::engine::policy::{Blocker, PolicyConfig, PolicyUpdate, Verdict, decide};
pub use crate::engine::quality::{
    CommandEvaluator, HoldoutEvaluator, Model, ModelRegistry, QualityEvaluator, StaticQuality,
};
pub use crate::engine::state::{EngineState, JsonFileStore, MemoryStateStore, StateStore};
pub use crate::engine::supervisor::{CommandSupervisor, JobOutput, JobSupervisor};

// Logger
pub use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
