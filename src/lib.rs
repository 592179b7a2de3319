#![forbid(unsafe_code)]

//! retrain_guard (rguard): decides when a model needs retraining and
//! supervises the external training job that does it.
//!
//! Two signals drive the decision:
//! 1. **Data fingerprint**: SHA-256 of the training dataset, compared with the
//!    one recorded at the last successful retrain
//! 2. **Model quality**: hold-out score of the registered model, checked against
//!    an absolute floor and against the previous score
//!
//! A cooldown between retrains and an on/off switch gate automatic retraining.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use retrain_guard::prelude::*;
//!
//! # fn main() -> retrain_guard::core::errors::Result<()> {
//! let config = Config::load(None)?;
//! let orchestrator = Orchestrator::from_config(&config)?;
//! let report = orchestrator.check_and_retrain()?;
//! println!("{report:?}");
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod core;
#[cfg(feature = "daemon")]
pub mod daemon;
pub mod engine;
pub mod logger;
