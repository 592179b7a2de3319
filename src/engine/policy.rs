//! Retrain decision policy: cooldown, data-change, and quality signals folded
//! into a single [`Verdict`].
//!
//! [`decide`] is pure. The caller supplies the clock reading so the same inputs
//! always yield the same verdict.

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RgError};
use crate::engine::state::EngineState;

/// Reason text when automatic retraining is switched off.
pub const REASON_DISABLED: &str = "auto-retrain disabled";
/// Reason text when no trigger fired.
pub const REASON_NONE: &str = "no retrain triggers";
/// Reason text when the dataset fingerprint moved.
pub const REASON_DATA_CHANGED: &str = "data has changed";

// ──────────────────── policy config ────────────────────

/// Thresholds and switches for the retrain decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Quality below this always warrants retraining.
    pub min_quality_threshold: f64,
    /// Drop in quality since the last retrain that warrants retraining.
    pub degradation_threshold: f64,
    /// Master switch; when false the verdict is always "disabled".
    pub auto_retrain_enabled: bool,
    /// Minimum time between two successful retrains.
    pub min_retrain_interval_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_quality_threshold: 0.5,
            degradation_threshold: 0.1,
            auto_retrain_enabled: true,
            min_retrain_interval_secs: 6 * 3600,
        }
    }
}

impl PolicyConfig {
    /// Cooldown as a chrono duration, saturating at `i64::MAX` seconds.
    #[must_use]
    pub fn min_retrain_interval(&self) -> Duration {
        let secs = i64::try_from(self.min_retrain_interval_secs).unwrap_or(i64::MAX);
        Duration::try_seconds(secs).unwrap_or(Duration::MAX)
    }

    /// Reject thresholds that would make every comparison meaningless.
    pub fn validate(&self) -> Result<()> {
        if !self.min_quality_threshold.is_finite() {
            return Err(RgError::InvalidConfig {
                details: format!(
                    "policy.min_quality_threshold must be finite, got {}",
                    self.min_quality_threshold
                ),
            });
        }
        if !self.degradation_threshold.is_finite() || self.degradation_threshold < 0.0 {
            return Err(RgError::InvalidConfig {
                details: format!(
                    "policy.degradation_threshold must be finite and >= 0, got {}",
                    self.degradation_threshold
                ),
            });
        }
        Ok(())
    }

    /// Merge the provided fields; unspecified fields keep their value.
    pub fn merge(&mut self, update: &PolicyUpdate) {
        if let Some(v) = update.min_quality_threshold {
            self.min_quality_threshold = v;
        }
        if let Some(v) = update.degradation_threshold {
            self.degradation_threshold = v;
        }
        if let Some(v) = update.auto_retrain_enabled {
            self.auto_retrain_enabled = v;
        }
        if let Some(v) = update.min_retrain_interval_secs {
            self.min_retrain_interval_secs = v;
        }
    }
}

/// Partial policy update. `None` fields are left untouched by [`PolicyConfig::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyUpdate {
    pub min_quality_threshold: Option<f64>,
    pub degradation_threshold: Option<f64>,
    pub auto_retrain_enabled: Option<bool>,
    pub min_retrain_interval_secs: Option<u64>,
}

impl PolicyUpdate {
    /// True when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl From<&PolicyConfig> for PolicyUpdate {
    /// Full update carrying every field of `config`.
    fn from(config: &PolicyConfig) -> Self {
        Self {
            min_quality_threshold: Some(config.min_quality_threshold),
            degradation_threshold: Some(config.degradation_threshold),
            auto_retrain_enabled: Some(config.auto_retrain_enabled),
            min_retrain_interval_secs: Some(config.min_retrain_interval_secs),
        }
    }
}

// ──────────────────── verdict ────────────────────

/// A check that short-circuited evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Blocker {
    /// `auto_retrain_enabled` is false.
    Disabled,
    /// Last successful retrain is inside the cooldown window.
    Cooldown { last_retrain: DateTime<Utc> },
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub should_retrain: bool,
    /// Ordered, human-readable reasons.
    pub reasons: Vec<String>,
    /// Set when a short-circuiting check decided the verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocker: Option<Blocker>,
}

impl Verdict {
    fn blocked(blocker: Blocker, reason: String) -> Self {
        Self {
            should_retrain: false,
            reasons: vec![reason],
            blocker: Some(blocker),
        }
    }

    /// Reasons joined for display.
    #[must_use]
    pub fn reason(&self) -> String {
        if self.reasons.is_empty() {
            REASON_NONE.to_string()
        } else {
            self.reasons.join("; ")
        }
    }

    /// Whether the cooldown window alone is what blocked retraining.
    #[must_use]
    pub fn is_cooldown_blocked(&self) -> bool {
        matches!(self.blocker, Some(Blocker::Cooldown { .. }))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.should_retrain {
            "retrain"
        } else {
            "hold"
        };
        write!(f, "{label}: {}", self.reason())
    }
}

// ──────────────────── decide ────────────────────

/// Blocked verdict when the last successful retrain is inside the cooldown window.
///
/// Independent of `auto_retrain_enabled`: manual triggers use this directly.
#[must_use]
pub fn cooldown(state: &EngineState, config: &PolicyConfig, now: DateTime<Utc>) -> Option<Verdict> {
    let last = state.last_retrain_time?;
    (now.signed_duration_since(last) < config.min_retrain_interval()).then(|| {
        Verdict::blocked(
            Blocker::Cooldown { last_retrain: last },
            format!(
                "Too soon since last retrain ({})",
                last.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
        )
    })
}

/// Evaluate the retrain policy.
///
/// Order: disabled switch, then cooldown (both short-circuit), then the
/// accumulating data-change and quality checks. Below-minimum and degraded
/// quality are mutually exclusive.
#[must_use]
pub fn decide(
    state: &EngineState,
    config: &PolicyConfig,
    changed: bool,
    quality: Option<f64>,
    now: DateTime<Utc>,
) -> Verdict {
    if !config.auto_retrain_enabled {
        return Verdict::blocked(Blocker::Disabled, REASON_DISABLED.to_string());
    }

    if let Some(blocked) = cooldown(state, config, now) {
        return blocked;
    }

    let mut reasons = Vec::new();
    if changed {
        reasons.push(REASON_DATA_CHANGED.to_string());
    }

    if let Some(current) = quality {
        if current < config.min_quality_threshold {
            reasons.push(format!(
                "quality below threshold ({current:.3} < {})",
                config.min_quality_threshold
            ));
        } else if let Some(previous) = state.last_quality_score
            && previous - current > config.degradation_threshold
        {
            reasons.push(format!("quality degraded ({previous:.3} -> {current:.3})"));
        }
    }

    Verdict {
        should_retrain: !reasons.is_empty(),
        reasons,
        blocker: None,
    }
}
