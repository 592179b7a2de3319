//! Model quality measurement.
//!
//! Absence of a score is an ordinary answer: no dataset, no registered model,
//! or an evaluator that could not produce a number. Failures are reported on
//! stderr and folded into `None` so the decision policy never sees an error.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::core::config::EvaluatorConfig;
use crate::core::errors::{Result, RgError};

/// Source of the current quality score of the deployed model.
pub trait QualityEvaluator: Send + Sync {
    fn current_quality(&self) -> Option<f64>;
}

impl<Q: QualityEvaluator + ?Sized> QualityEvaluator for Box<Q> {
    fn current_quality(&self) -> Option<f64> {
        (**self).current_quality()
    }
}

/// A loaded model able to score feature rows.
pub trait Model: Send + Sync {
    /// One prediction per input row.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>>;
}

/// Registry lookup result: model handle plus its version label.
pub struct RegisteredModel {
    pub model: Box<dyn Model>,
    pub version: String,
}

/// Lookup service for the latest registered model of a family.
pub trait ModelRegistry: Send + Sync {
    /// Fails with `ModelNotFound` when nothing is registered under `name`.
    fn latest(&self, name: &str) -> Result<RegisteredModel>;
}

// ──────────────────── metrics ────────────────────

/// Coefficient of determination.
///
/// `None` on empty or mismatched input. A constant target scores 1.0 when
/// predicted exactly and 0.0 otherwise.
#[must_use]
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return Some(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    let score = 1.0 - ss_res / ss_tot;
    score.is_finite().then_some(score)
}

// ──────────────────── dataset ────────────────────

/// Numeric table split into feature rows and the target column.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl Dataset {
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Parse a header-first, comma-separated numeric file.
pub fn load_numeric_csv(path: &Path, target_column: &str) -> Result<Dataset> {
    let raw = fs::read_to_string(path).map_err(|err| RgError::io(path, err))?;
    parse_numeric_csv(&raw, target_column)
}

fn parse_numeric_csv(raw: &str, target_column: &str) -> Result<Dataset> {
    let mut lines = raw.lines().filter(|line| !line.trim().is_empty());
    let header: Vec<String> = lines
        .next()
        .ok_or_else(|| csv_error("empty file"))?
        .split(',')
        .map(|h| h.trim().trim_matches('"').to_string())
        .collect();
    let target_idx = header
        .iter()
        .position(|h| h == target_column)
        .ok_or_else(|| csv_error(format!("target column {target_column:?} not in header")))?;

    let mut features = Vec::new();
    let mut targets = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        if cells.len() != header.len() {
            return Err(csv_error(format!(
                "row {} has {} cells, header has {}",
                line_no + 2,
                cells.len(),
                header.len()
            )));
        }
        let mut row = Vec::with_capacity(header.len() - 1);
        for (idx, cell) in cells.iter().enumerate() {
            let value: f64 = cell.trim_matches('"').parse().map_err(|_| {
                csv_error(format!("row {} column {}: not a number: {cell:?}", line_no + 2, header[idx]))
            })?;
            if idx == target_idx {
                targets.push(value);
            } else {
                row.push(value);
            }
        }
        features.push(row);
    }

    let feature_names = header
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| *idx != target_idx)
        .map(|(_, name)| name)
        .collect();
    Ok(Dataset {
        feature_names,
        features,
        targets,
    })
}

fn csv_error(details: impl Into<String>) -> RgError {
    RgError::Serialization {
        context: "csv",
        details: details.into(),
    }
}

/// Indices of the held-out rows: seeded shuffle, first `ceil(n * fraction)` taken.
///
/// Empty when fewer than two rows exist; at least one row is always kept for training.
#[must_use]
pub fn holdout_indices(n: usize, test_fraction: f64, seed: u64) -> Vec<usize> {
    if n < 2 {
        return Vec::new();
    }
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let n_test = ((n as f64) * test_fraction).ceil() as usize;
    indices.truncate(n_test.clamp(1, n - 1));
    indices
}

// ──────────────────── hold-out evaluator ────────────────────

/// Scores the registry's latest model on a deterministic hold-out split.
pub struct HoldoutEvaluator<R: ModelRegistry> {
    registry: R,
    dataset: PathBuf,
    model_name: String,
    target_column: String,
    test_fraction: f64,
    seed: u64,
}

impl<R: ModelRegistry> HoldoutEvaluator<R> {
    pub fn new(registry: R, dataset: impl Into<PathBuf>, config: &EvaluatorConfig) -> Self {
        Self {
            registry,
            dataset: dataset.into(),
            model_name: config.model_name.clone(),
            target_column: config.target_column.clone(),
            test_fraction: config.test_fraction,
            seed: config.split_seed,
        }
    }

    /// Full evaluation with errors surfaced; `Ok(None)` for the ordinary absent cases.
    pub fn evaluate(&self) -> Result<Option<f64>> {
        if !self.dataset.exists() {
            return Ok(None);
        }
        let registered = match self.registry.latest(&self.model_name) {
            Ok(registered) => registered,
            Err(RgError::ModelNotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let data = load_numeric_csv(&self.dataset, &self.target_column)?;
        let holdout = holdout_indices(data.len(), self.test_fraction, self.seed);
        if holdout.is_empty() {
            return Ok(None);
        }
        let rows: Vec<Vec<f64>> = holdout.iter().map(|&i| data.features[i].clone()).collect();
        let actual: Vec<f64> = holdout.iter().map(|&i| data.targets[i]).collect();
        let predicted = registered.model.predict(&rows)?;
        if predicted.len() != actual.len() {
            return Err(RgError::Runtime {
                details: format!(
                    "model {} v{} returned {} predictions for {} rows",
                    self.model_name,
                    registered.version,
                    predicted.len(),
                    actual.len()
                ),
            });
        }
        Ok(r2_score(&actual, &predicted))
    }
}

impl<R: ModelRegistry> QualityEvaluator for HoldoutEvaluator<R> {
    fn current_quality(&self) -> Option<f64> {
        self.evaluate().unwrap_or_else(|err| {
            eprintln!("[RG-QUALITY] evaluation of {} failed: {err}", self.model_name);
            None
        })
    }
}

// ──────────────────── command evaluator ────────────────────

/// Runs an external scorer and reads the score from its last stdout line.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    argv: Vec<String>,
    working_dir: PathBuf,
}

impl CommandEvaluator {
    pub fn new(argv: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            working_dir: working_dir.into(),
        }
    }

    /// `Ok(None)` when no command is configured or the output carries no score.
    pub fn evaluate(&self) -> Result<Option<f64>> {
        let Some((program, args)) = self.argv.split_first() else {
            return Ok(None);
        };
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .stdout(Stdio::piped())
            .output()
            .map_err(|source| RgError::JobLaunch {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(RgError::Runtime {
                details: format!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(parse_score(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_score(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

impl QualityEvaluator for CommandEvaluator {
    fn current_quality(&self) -> Option<f64> {
        match self.evaluate() {
            Ok(score) => score,
            Err(err) => {
                if let RgError::JobLaunch { source, .. } = &err
                    && source.kind() == io::ErrorKind::NotFound
                {
                    eprintln!("[RG-QUALITY] evaluator not found: {err}");
                } else {
                    eprintln!("[RG-QUALITY] evaluation failed: {err}");
                }
                None
            }
        }
    }
}

/// Fixed score; useful for embedding hosts that compute quality elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticQuality(pub Option<f64>);

impl QualityEvaluator for StaticQuality {
    fn current_quality(&self) -> Option<f64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LinearModel {
        weight: f64,
    }

    impl Model for LinearModel {
        fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
            Ok(rows.iter().map(|r| r[0] * self.weight).collect())
        }
    }

    struct OneModelRegistry {
        weight: Option<f64>,
    }

    impl ModelRegistry for OneModelRegistry {
        fn latest(&self, name: &str) -> Result<RegisteredModel> {
            match self.weight {
                Some(weight) => Ok(RegisteredModel {
                    model: Box::new(LinearModel { weight }),
                    version: "3".to_string(),
                }),
                None => Err(RgError::ModelNotFound {
                    name: name.to_string(),
                }),
            }
        }
    }

    fn write_linear_dataset(dir: &Path) -> PathBuf {
        let path = dir.join("cleaned.csv");
        let mut body = String::from("x,noise,target\n");
        for i in 0..50 {
            body.push_str(&format!("{i},{},{}\n", i % 3, i * 2));
        }
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn r2_perfect_and_mean_predictions() {
        let actual = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(r2_score(&actual, &actual), Some(1.0));
        let mean = [2.5; 4];
        assert_eq!(r2_score(&actual, &mean), Some(0.0));
        assert!(r2_score(&actual, &[4.0, 3.0, 2.0, 1.0]).unwrap() < 0.0);
    }

    #[test]
    fn r2_degenerate_inputs() {
        assert_eq!(r2_score(&[], &[]), None);
        assert_eq!(r2_score(&[1.0], &[1.0, 2.0]), None);
        assert_eq!(r2_score(&[5.0, 5.0], &[5.0, 5.0]), Some(1.0));
        assert_eq!(r2_score(&[5.0, 5.0], &[4.0, 5.0]), Some(0.0));
    }

    #[test]
    fn csv_parsing_separates_target() {
        let data = parse_numeric_csv("a,target,b\n1,10,2\n\n3,30,4\n", "target").unwrap();
        assert_eq!(data.feature_names, vec!["a", "b"]);
        assert_eq!(data.features, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(data.targets, vec![10.0, 30.0]);
    }

    #[test]
    fn csv_errors_are_reported() {
        assert!(parse_numeric_csv("", "target").is_err());
        assert!(parse_numeric_csv("a,b\n1,2\n", "target").is_err());
        let err = parse_numeric_csv("a,target\n1,x\n", "target").unwrap_err();
        assert!(err.to_string().contains("not a number"), "{err}");
        assert!(parse_numeric_csv("a,target\n1\n", "target").is_err());
    }

    #[test]
    fn holdout_is_deterministic_and_sized() {
        let a = holdout_indices(100, 0.2, 42);
        let b = holdout_indices(100, 0.2, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        assert_ne!(a, holdout_indices(100, 0.2, 7));
        assert_eq!(holdout_indices(3, 0.2, 42).len(), 1);
        assert_eq!(holdout_indices(2, 0.99, 42).len(), 1);
        assert!(holdout_indices(1, 0.2, 42).is_empty());
    }

    #[test]
    fn holdout_evaluator_scores_exact_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_linear_dataset(dir.path());
        let eval = HoldoutEvaluator::new(
            OneModelRegistry { weight: Some(2.0) },
            &path,
            &EvaluatorConfig::default(),
        );
        let score = eval.current_quality().unwrap();
        assert!((score - 1.0).abs() < 1e-12, "{score}");
    }

    #[test]
    fn holdout_evaluator_poor_model_scores_low() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_linear_dataset(dir.path());
        let eval = HoldoutEvaluator::new(
            OneModelRegistry { weight: Some(0.0) },
            &path,
            &EvaluatorConfig::default(),
        );
        assert!(eval.current_quality().unwrap() < 0.5);
    }

    #[test]
    fn absent_model_or_dataset_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_linear_dataset(dir.path());
        let no_model = HoldoutEvaluator::new(
            OneModelRegistry { weight: None },
            &path,
            &EvaluatorConfig::default(),
        );
        assert_eq!(no_model.evaluate().unwrap(), None);

        let no_data = HoldoutEvaluator::new(
            OneModelRegistry { weight: Some(2.0) },
            dir.path().join("missing.csv"),
            &EvaluatorConfig::default(),
        );
        assert_eq!(no_data.current_quality(), None);
    }

    #[test]
    fn wrong_target_column_folds_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_linear_dataset(dir.path());
        let config = EvaluatorConfig {
            target_column: "price".to_string(),
            ..EvaluatorConfig::default()
        };
        let eval = HoldoutEvaluator::new(OneModelRegistry { weight: Some(2.0) }, &path, &config);
        assert!(eval.evaluate().is_err());
        assert_eq!(eval.current_quality(), None);
    }

    #[test]
    fn score_parsing_uses_last_nonempty_line() {
        assert_eq!(parse_score("loading\nr2=\n0.75\n\n"), Some(0.75));
        assert_eq!(parse_score("0.75\ndone\n"), None);
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("NaN\n"), None);
    }

    #[cfg(unix)]
    #[test]
    fn command_evaluator_reads_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let eval = CommandEvaluator::new(
            vec!["sh".into(), "-c".into(), "echo warming up; echo 0.625".into()],
            dir.path(),
        );
        assert_eq!(eval.current_quality(), Some(0.625));
    }

    #[cfg(unix)]
    #[test]
    fn command_evaluator_failure_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let failing = CommandEvaluator::new(
            vec!["sh".into(), "-c".into(), "echo 0.9; exit 2".into()],
            dir.path(),
        );
        assert!(failing.evaluate().is_err());
        assert_eq!(failing.current_quality(), None);

        let missing = CommandEvaluator::new(vec!["rguard-no-such-scorer".into()], dir.path());
        assert_eq!(missing.current_quality(), None);

        let unset = CommandEvaluator::new(Vec::new(), dir.path());
        assert_eq!(unset.evaluate().unwrap(), None);
    }
}
