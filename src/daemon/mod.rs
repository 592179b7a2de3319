//! Daemon subsystem: interval loop and signal handling.

pub mod loop_main;
pub mod signals;
