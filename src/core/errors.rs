//! RG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, RgError>;

/// Top-level error type for retrain_guard.
#[derive(Debug, Error)]
pub enum RgError {
    #[error("[RG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[RG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[RG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[RG-2001] retraining not allowed: {reason}. Use force to override")]
    TooSoon { reason: String },

    #[error("[RG-2002] retrain already in progress")]
    RetrainInProgress,

    #[error("[RG-2003] no registered model named {name}")]
    ModelNotFound { name: String },

    #[error("[RG-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[RG-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[RG-3001] state store unavailable at {location}: {details}")]
    StoreUnavailable { location: String, details: String },

    #[error("[RG-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[RG-3003] failed to launch {program}: {source}")]
    JobLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[RG-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl RgError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "RG-1001",
            Self::MissingConfig { .. } => "RG-1002",
            Self::ConfigParse { .. } => "RG-1003",
            Self::TooSoon { .. } => "RG-2001",
            Self::RetrainInProgress => "RG-2002",
            Self::ModelNotFound { .. } => "RG-2003",
            Self::Serialization { .. } => "RG-2101",
            Self::Sql { .. } => "RG-2102",
            Self::StoreUnavailable { .. } => "RG-3001",
            Self::Io { .. } => "RG-3002",
            Self::JobLaunch { .. } => "RG-3003",
            Self::Runtime { .. } => "RG-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TooSoon { .. }
                | Self::RetrainInProgress
                | Self::Io { .. }
                | Self::Sql { .. }
                | Self::StoreUnavailable { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether this is an expected, user-facing rejection rather than a fault.
    #[must_use]
    pub const fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::TooSoon { .. } | Self::RetrainInProgress)
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for store faults.
    #[must_use]
    pub fn store(location: impl AsRef<Path>, details: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            location: location.as_ref().display().to_string(),
            details: details.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for RgError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for RgError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for RgError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<RgError> {
        vec![
            RgError::InvalidConfig {
                details: String::new(),
            },
            RgError::MissingConfig {
                path: PathBuf::new(),
            },
            RgError::ConfigParse {
                context: "",
                details: String::new(),
            },
            RgError::TooSoon {
                reason: String::new(),
            },
            RgError::RetrainInProgress,
            RgError::ModelNotFound {
                name: String::new(),
            },
            RgError::Serialization {
                context: "",
                details: String::new(),
            },
            RgError::Sql {
                context: "",
                details: String::new(),
            },
            RgError::StoreUnavailable {
                location: String::new(),
                details: String::new(),
            },
            RgError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            RgError::JobLaunch {
                program: String::new(),
                source: std::io::Error::other("test"),
            },
            RgError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(RgError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_carries_code_prefix() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain {}: {msg}",
                err.code()
            );
            assert!(err.code().starts_with("RG-"));
        }
    }

    #[test]
    fn too_soon_echoes_blocking_reason() {
        let err = RgError::TooSoon {
            reason: "Too soon since last retrain (2026-01-01T00:00:00Z)".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2026-01-01T00:00:00Z"), "{msg}");
        assert!(msg.contains("force"), "{msg}");
        assert!(err.is_policy_rejection());
        assert!(err.is_retryable());
    }

    #[test]
    fn hard_faults_are_not_policy_rejections() {
        let store = RgError::store("/tmp/state.json", "corrupt");
        assert!(!store.is_policy_rejection());
        assert_eq!(store.code(), "RG-3001");
        assert!(store.to_string().contains("/tmp/state.json"));

        let launch = RgError::JobLaunch {
            program: "train.sh".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(!launch.is_policy_rejection());
        assert!(!launch.is_retryable());
    }

    #[test]
    fn io_convenience_constructor() {
        let err = RgError::io(
            "/tmp/data.csv",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(err.code(), "RG-3002");
        assert!(err.to_string().contains("/tmp/data.csv"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn from_rusqlite_error() {
        let sql_err =
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some("test".to_string()));
        let err: RgError = sql_err.into();
        assert_eq!(err.code(), "RG-2102");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: RgError = json_err.into();
        assert_eq!(err.code(), "RG-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: RgError = toml_err.into();
        assert_eq!(err.code(), "RG-1003");
    }
}
