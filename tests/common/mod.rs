#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// Parse the last non-empty stdout line as JSON.
    pub fn json(&self) -> serde_json::Value {
        let line = self
            .stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_else(|| panic!("no stdout; log: {}", self.log_path.display()));
        serde_json::from_str(line)
            .unwrap_or_else(|e| panic!("stdout is not JSON ({e}); log: {}", self.log_path.display()))
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_rguard") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "rguard.exe" } else { "rguard" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve rguard binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &Path)]) -> CmdResult {
    let root = std::env::temp_dir().join("rguard-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env_remove("RG_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("execute rguard command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Scratch project: dataset, quality file, training script and a config
/// pointing every path into the temp dir.
pub struct Workspace {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl Workspace {
    /// Training job that appends to `runs.log` and succeeds.
    pub fn new() -> Self {
        Self::with_job("echo trained >> runs.log")
    }

    /// `script` runs under `sh -c` in the workspace directory.
    pub fn with_job(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("create workspace");
        let root = dir.path();
        fs::write(root.join("data.csv"), "x,target\n1,2\n2,4\n3,6\n").expect("write dataset");
        fs::write(root.join("quality.txt"), "0.9\n").expect("write quality");

        let config_path = root.join("config.toml");
        let config = format!(
            r#"[policy]
min_retrain_interval_secs = 21600

[paths]
dataset = {dataset:?}
state_file = {state:?}
sqlite_db = {db:?}
jsonl_log = {jsonl:?}

[job]
program = "sh"
args = ["-c", {script:?}]
working_dir = {root:?}

[evaluator]
command = ["sh", "-c", "cat quality.txt"]
"#,
            dataset = root.join("data.csv").to_string_lossy(),
            state = root.join("state/retrain_state.json").to_string_lossy(),
            db = root.join("activity.sqlite3").to_string_lossy(),
            jsonl = root.join("activity.jsonl").to_string_lossy(),
            root = root.to_string_lossy(),
        );
        fs::write(&config_path, config).expect("write config");
        Self { dir, config_path }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_arg(&self) -> &str {
        self.config_path.to_str().expect("utf-8 temp path")
    }

    /// Run `rguard --config <ws> --json <args>` with HOME inside the workspace.
    pub fn run(&self, case_name: &str, args: &[&str]) -> CmdResult {
        let mut full = vec!["--config", self.config_arg(), "--json"];
        full.extend_from_slice(args);
        run_cli_case_with_env(case_name, &full, &[("HOME", self.root())])
    }

    pub fn training_runs(&self) -> usize {
        fs::read_to_string(self.root().join("runs.log"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    pub fn state(&self) -> serde_json::Value {
        let raw = fs::read_to_string(self.root().join("state/retrain_state.json"))
            .expect("read state file");
        serde_json::from_str(&raw).expect("parse state file")
    }

    pub fn set_quality(&self, score: &str) {
        fs::write(self.root().join("quality.txt"), score).expect("write quality");
    }
}
