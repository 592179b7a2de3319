//! Launches the external training job and classifies its exit.

#![allow(missing_docs)]

use std::io::Read as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Serialize;

use crate::core::config::JobConfig;
use crate::core::errors::{Result, RgError};

/// Captured result of one training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl JobOutput {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Failure detail for the retrain outcome.
    #[must_use]
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        match (self.exit_code, stderr.is_empty()) {
            (Some(code), true) => format!("training job exited with code {code}"),
            (None, true) => "training job terminated by signal".to_string(),
            (_, false) => stderr.to_string(),
        }
    }
}

/// Runs the training job to completion. Only a launch failure is an error.
pub trait JobSupervisor: Send + Sync {
    fn run_training_job(&self) -> Result<JobOutput>;
    /// Short description of what runs, for logs.
    fn describe(&self) -> String;
}

impl<J: JobSupervisor + ?Sized> JobSupervisor for Box<J> {
    fn run_training_job(&self) -> Result<JobOutput> {
        (**self).run_training_job()
    }
    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Spawns `program args...` in `working_dir`; stdin and stdout are discarded.
#[derive(Debug, Clone)]
pub struct CommandSupervisor {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandSupervisor {
    pub fn new(program: impl Into<String>, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
        }
    }

    #[must_use]
    pub fn from_config(job: &JobConfig) -> Self {
        Self::new(job.program.clone(), job.args.clone(), job.working_dir.clone())
    }
}

impl JobSupervisor for CommandSupervisor {
    fn run_training_job(&self) -> Result<JobOutput> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RgError::JobLaunch {
                program: self.program.clone(),
                source,
            })?;

        // Drain stderr before waiting so a chatty job cannot block on a full pipe.
        let mut raw = Vec::new();
        if let Some(mut pipe) = child.stderr.take()
            && let Err(err) = pipe.read_to_end(&mut raw)
        {
            eprintln!("[RG-JOB] failed to read stderr of {}: {err}", self.program);
        }
        let status = child.wait().map_err(|source| RgError::Runtime {
            details: format!("waiting for {}: {source}", self.program),
        })?;

        Ok(JobOutput {
            exit_code: status.code(),
            stderr: String::from_utf8_lossy(&raw).into_owned(),
        })
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSupervisor {
        CommandSupervisor::new("sh", vec!["-c".to_string(), script.to_string()], ".")
    }

    #[test]
    fn zero_exit_succeeds() {
        let out = sh("echo trained; exit 0").run_training_job().unwrap();
        assert!(out.succeeded());
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn nonzero_exit_captures_stderr() {
        let out = sh("echo 'dataset missing' >&2; exit 3")
            .run_training_job()
            .unwrap();
        assert!(!out.succeeded());
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.failure_detail(), "dataset missing");
    }

    #[test]
    fn silent_failure_reports_exit_code() {
        let out = sh("exit 5").run_training_job().unwrap();
        assert_eq!(out.failure_detail(), "training job exited with code 5");
    }

    #[test]
    fn killed_by_signal_has_no_exit_code() {
        let out = sh("kill -9 $$").run_training_job().unwrap();
        assert_eq!(out.exit_code, None);
        assert!(!out.succeeded());
        assert!(out.failure_detail().contains("signal"));
    }

    #[test]
    fn missing_program_is_launch_error() {
        let sup = CommandSupervisor::new("rguard-definitely-missing-trainer", Vec::new(), ".");
        let err = sup.run_training_job().unwrap_err();
        assert_eq!(err.code(), "RG-3003");
    }

    #[test]
    fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sup = CommandSupervisor::new(
            "sh",
            vec!["-c".to_string(), "touch marker".to_string()],
            dir.path(),
        );
        assert!(sup.run_training_job().unwrap().succeeded());
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn describe_joins_argv() {
        let job = JobConfig::default();
        assert_eq!(
            CommandSupervisor::from_config(&job).describe(),
            "python src/models/train.py"
        );
    }
}
