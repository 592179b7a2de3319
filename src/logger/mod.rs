//! Activity trail: JSONL append-only log plus SQLite (WAL) with graceful degradation.

pub mod dual;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
