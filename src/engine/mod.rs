//! Retraining decision and orchestration engine.
//!
//! Leaf-first: [`state`] persists what the engine knows, [`fingerprint`] and
//! [`quality`] produce signals, [`policy`] turns them into a verdict,
//! [`supervisor`] runs the training job, [`lock`] keeps retrains from
//! overlapping across processes, and [`orchestrator`] drives it all.

pub mod fingerprint;
pub mod lock;
pub mod orchestrator;
pub mod policy;
pub mod quality;
pub mod state;
pub mod supervisor;
