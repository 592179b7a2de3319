//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread;

use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use retrain_guard::core::config::Config;
use retrain_guard::core::errors::RgError;
use retrain_guard::daemon::loop_main::{DaemonArgs as LoopArgs, RetrainDaemon};
use retrain_guard::engine::orchestrator::{CheckReport, Orchestrator, RetrainOutcome};
use retrain_guard::logger::dual::{
    ActivityLoggerHandle, DualLoggerConfig, spawn_logger,
};
use retrain_guard::logger::sqlite::{RetrainRow, SqliteLogger};

/// Retrain guard: decides when a model is stale and supervises its retraining.
#[derive(Debug, Parser)]
#[command(
    name = "rguard",
    author,
    version,
    about = "Retrain Guard - model retraining decisions and orchestration",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Evaluate the retrain policy once and retrain if it says so.
    Check,
    /// Retrain now, subject to the cooldown unless forced.
    Trigger(TriggerArgs),
    /// Show engine state, current quality and the policy verdict.
    Status,
    /// Show recent retrain attempts.
    History(HistoryArgs),
    /// Inspect configuration.
    Config(ConfigArgs),
    /// Run the periodic check loop in the foreground.
    Daemon(DaemonArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct TriggerArgs {
    /// Reason recorded with the retrain.
    #[arg(long, default_value = "Manual trigger")]
    reason: String,
    /// Ignore the minimum interval between retrains.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Clone, Args)]
struct HistoryArgs {
    /// Number of attempts to show, newest first.
    #[arg(long, default_value_t = 20)]
    limit: u32,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct DaemonArgs {
    /// Exit after this many checks.
    #[arg(long, value_name = "N")]
    max_checks: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Target shell.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or a request the policy refused.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

impl From<RgError> for CliError {
    fn from(err: RgError) -> Self {
        match err {
            RgError::TooSoon { .. }
            | RgError::RetrainInProgress
            | RgError::InvalidConfig { .. }
            | RgError::MissingConfig { .. }
            | RgError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Check => run_check(cli),
        Command::Trigger(args) => run_trigger(cli, args),
        Command::Status => run_status(cli),
        Command::History(args) => run_history(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── engine commands ────────────────────

/// Orchestrator wired to the activity trail for the duration of one command.
struct Session {
    orchestrator: Orchestrator,
    logger: Option<(ActivityLoggerHandle, thread::JoinHandle<()>)>,
}

impl Session {
    fn open(config: &Config) -> Result<Self, CliError> {
        let orchestrator = Orchestrator::from_config(config)?;
        match spawn_logger(DualLoggerConfig::from_config(config)) {
            Ok((handle, join)) => Ok(Self {
                orchestrator: orchestrator.with_logger(handle.clone()),
                logger: Some((handle, join)),
            }),
            Err(err) => {
                eprintln!("[RG-CLI] activity logger unavailable, continuing without it: {err}");
                Ok(Self {
                    orchestrator,
                    logger: None,
                })
            }
        }
    }

    fn close(self) {
        if let Some((handle, join)) = self.logger {
            handle.shutdown();
            let _ = join.join();
        }
    }
}

fn run_check(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let session = Session::open(&config)?;
    let result = session.orchestrator.check_and_retrain();
    session.close();
    let report = result?;

    match output_mode(cli) {
        OutputMode::Human => match &report {
            CheckReport::NoAction { reason, .. } => {
                println!("{} {reason}", "No retrain:".yellow().bold());
            }
            CheckReport::Retrained(outcome) => print_outcome(outcome),
        },
        OutputMode::Json => {
            let payload = json!({
                "command": "check",
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }

    match report.outcome() {
        Some(outcome) if !outcome.success => Err(retrain_failed(outcome)),
        _ => Ok(()),
    }
}

fn run_trigger(cli: &Cli, args: &TriggerArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let session = Session::open(&config)?;
    let result = session
        .orchestrator
        .trigger_retrain(&args.reason, args.force);
    session.close();
    let outcome = result?;

    match output_mode(cli) {
        OutputMode::Human => print_outcome(&outcome),
        OutputMode::Json => {
            let payload = json!({
                "command": "trigger",
                "forced": args.force,
                "outcome": serde_json::to_value(&outcome)?,
            });
            write_json_line(&payload)?;
        }
    }

    if outcome.success {
        Ok(())
    } else {
        Err(retrain_failed(&outcome))
    }
}

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let orchestrator = Orchestrator::from_config(&config)?;
    let status = orchestrator.status()?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Retrain Guard v{}", env!("CARGO_PKG_VERSION"));
            println!("  Config:  {}", config.paths.config_file.display());
            println!("  Store:   {}", status.store);
            println!(
                "  Dataset: {} ({})",
                status.dataset.display(),
                if status.data_changed {
                    "changed".yellow()
                } else {
                    "unchanged".green()
                }
            );
            println!("  Job:     {}", status.job);

            println!("\nState:");
            println!("  Last retrain:   {}", fmt_time(status.state.last_retrain_time));
            println!("  Retrain count:  {}", status.state.retrain_count);
            println!("  Last check:     {}", fmt_time(status.state.last_check_time));
            println!("  Stored quality: {}", fmt_quality(status.state.last_quality_score));
            println!("  Current:        {}", fmt_quality(status.current_quality));

            println!("\nPolicy:");
            println!(
                "  Auto-retrain:   {}",
                if status.config.auto_retrain_enabled {
                    "enabled".green()
                } else {
                    "disabled".red()
                }
            );
            println!("  Min quality:    {}", status.config.min_quality_threshold);
            println!("  Degradation:    {}", status.config.degradation_threshold);
            println!("  Min interval:   {}s", status.config.min_retrain_interval_secs);

            let verdict = status.verdict.to_string();
            if status.verdict.should_retrain {
                println!("\n{}", verdict.yellow().bold());
            } else {
                println!("\n{}", verdict.green());
            }
        }
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&status)?;
            if let Value::Object(map) = &mut payload {
                map.insert("command".to_string(), json!("status"));
                map.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
            }
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let rows: Vec<RetrainRow> = if config.paths.sqlite_db.exists() {
        SqliteLogger::open(&config.paths.sqlite_db)?.recent_retrains(args.limit)?
    } else {
        Vec::new()
    };

    match output_mode(cli) {
        OutputMode::Human => {
            if rows.is_empty() {
                println!("No retrain attempts recorded.");
                return Ok(());
            }
            println!(
                "  {:<25}  {:<8}  {:>9}  {:>15}  Reason",
                "Timestamp", "Result", "Duration", "Quality"
            );
            println!("  {}", "-".repeat(80));
            for row in &rows {
                let status = if row.success {
                    "ok".green()
                } else {
                    "failed".red()
                };
                println!(
                    "  {:<25}  {:<8}  {:>8.1}s  {:>15}  {}",
                    row.timestamp,
                    status,
                    row.duration_secs,
                    format!(
                        "{} -> {}",
                        fmt_quality(row.old_quality),
                        fmt_quality(row.new_quality)
                    ),
                    row.reason
                );
                if let Some(message) = &row.error_message {
                    println!("    {}", message.dimmed());
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "history",
                "limit": args.limit,
                "retrains": serde_json::to_value(&rows)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let loop_args = LoopArgs {
        config_path: cli.config.clone(),
        max_checks: args.max_checks,
    };
    let mut daemon = RetrainDaemon::init(config, loop_args)?;
    daemon.run()?;
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("{} {e}", "Configuration is INVALID:".red());
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output helpers ────────────────────

fn print_outcome(outcome: &RetrainOutcome) {
    let headline = if outcome.success {
        outcome.message.green().bold()
    } else {
        outcome.message.red().bold()
    };
    println!("{headline}");
    println!("  Retrain id: {}", outcome.retrain_id);
    println!("  Reason:     {}", outcome.reason);
    println!(
        "  Started:    {}",
        outcome.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    println!("  Duration:   {:.1}s", outcome.duration_secs);
    println!(
        "  Quality:    {} -> {}",
        fmt_quality(outcome.previous_quality),
        fmt_quality(outcome.new_quality)
    );
    if let Some(error) = &outcome.error {
        println!("  Error:      {}", error.red());
    }
}

fn retrain_failed(outcome: &RetrainOutcome) -> CliError {
    CliError::Runtime(format!(
        "retrain {} failed: {}",
        outcome.retrain_id,
        outcome.error.as_deref().unwrap_or("unknown error")
    ))
}

fn fmt_quality(score: Option<f64>) -> String {
    score.map_or_else(|| "n/a".to_string(), |s| format!("{s:.3}"))
}

fn fmt_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map_or_else(
        || "never".to_string(),
        |t| t.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("RG_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "rguard",
            "--config",
            "/tmp/rguard.toml",
            "--json",
            "--no-color",
            "status",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["rguard", "status", "--json", "--no-color"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_all_subcommands() {
        let cases = [
            vec!["rguard", "check"],
            vec!["rguard", "trigger"],
            vec!["rguard", "trigger", "--reason", "new labels", "--force"],
            vec!["rguard", "status"],
            vec!["rguard", "history", "--limit", "5"],
            vec!["rguard", "config"],
            vec!["rguard", "config", "show"],
            vec!["rguard", "config", "validate"],
            vec!["rguard", "daemon", "--max-checks", "3"],
            vec!["rguard", "completions", "bash"],
        ];
        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse: {case:?}");
        }
    }

    #[test]
    fn trigger_defaults() {
        let cli = Cli::try_parse_from(["rguard", "trigger"]).unwrap();
        let Command::Trigger(args) = cli.command else {
            panic!("expected trigger");
        };
        assert_eq!(args.reason, "Manual trigger");
        assert!(!args.force);
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(Cli::try_parse_from(["rguard"]).is_err());
        assert!(Cli::try_parse_from(["rguard", "retrain"]).is_err());
        assert!(Cli::try_parse_from(["rguard", "history", "--limit", "many"]).is_err());
        assert!(Cli::try_parse_from(["rguard", "completions", "cmd"]).is_err());
    }

    #[test]
    fn clap_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_codes_follow_error_class() {
        let too_soon: CliError = RgError::TooSoon {
            reason: "cooldown".to_string(),
        }
        .into();
        assert_eq!(too_soon.exit_code(), 1);
        assert_eq!(CliError::from(RgError::RetrainInProgress).exit_code(), 1);
        let bad_config: CliError = RgError::InvalidConfig {
            details: "x".to_string(),
        }
        .into();
        assert_eq!(bad_config.exit_code(), 1);
        let store: CliError = RgError::store("/tmp/state.json", "disk gone").into();
        assert_eq!(store.exit_code(), 2);
        assert_eq!(CliError::Internal("bug".to_string()).exit_code(), 3);
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn quality_and_time_formatting() {
        assert_eq!(fmt_quality(None), "n/a");
        assert_eq!(fmt_quality(Some(0.81234)), "0.812");
        assert_eq!(fmt_time(None), "never");
    }
}
