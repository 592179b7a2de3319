//! Daemon loop: periodic `check_and_retrain` with signal-driven shutdown,
//! policy reload and immediate checks.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::{Result, RgError};
use crate::daemon::signals::SignalHandler;
use crate::engine::orchestrator::{CheckReport, Orchestrator};
use crate::engine::policy::PolicyUpdate;
use crate::logger::dual::{
    ActivityEvent, ActivityLoggerHandle, DualLoggerConfig, spawn_logger,
};

/// Upper bound on one sleep between signal polls.
const TICK: Duration = Duration::from_millis(250);

/// Options for `rguard daemon`.
#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Config file re-read on SIGHUP. `None` re-reads the default location.
    pub config_path: Option<PathBuf>,
    /// Stop after this many checks. Mostly for smoke tests.
    pub max_checks: Option<u64>,
}

/// Runs the engine on an interval until asked to stop.
pub struct RetrainDaemon {
    config: Config,
    args: DaemonArgs,
    orchestrator: Arc<Orchestrator>,
    signal_handler: SignalHandler,
    logger_handle: Option<ActivityLoggerHandle>,
    logger_join: Option<thread::JoinHandle<()>>,
    start_time: Instant,
    checks_run: u64,
}

impl RetrainDaemon {
    /// Build the daemon from configuration: activity logger, orchestrator, signal hooks.
    pub fn init(config: Config, args: DaemonArgs) -> Result<Self> {
        let (logger_handle, logger_join) = spawn_logger(DualLoggerConfig::from_config(&config))?;
        let orchestrator =
            Arc::new(Orchestrator::from_config(&config)?.with_logger(logger_handle.clone()));
        let mut daemon = Self::new(config, args, orchestrator, SignalHandler::new());
        daemon.logger_handle = Some(logger_handle);
        daemon.logger_join = Some(logger_join);
        Ok(daemon)
    }

    /// Assemble from parts; no logger thread is owned.
    pub fn new(
        config: Config,
        args: DaemonArgs,
        orchestrator: Arc<Orchestrator>,
        signal_handler: SignalHandler,
    ) -> Self {
        Self {
            config,
            args,
            orchestrator,
            signal_handler,
            logger_handle: None,
            logger_join: None,
            start_time: Instant::now(),
            checks_run: 0,
        }
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn signal_handler(&self) -> SignalHandler {
        self.signal_handler.clone()
    }

    /// Run until shutdown, `max_checks`, or a store fault.
    ///
    /// The first check runs immediately; later ones every `check_interval_secs`.
    pub fn run(&mut self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.emit(ActivityEvent::EngineStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
        });
        eprintln!(
            "[RG-DAEMON] started: dataset={} store={} interval={}s",
            self.orchestrator.dataset().display(),
            self.orchestrator.store().describe(),
            self.config.daemon.check_interval_secs
        );

        let interval = Duration::from_secs(self.config.daemon.check_interval_secs);
        let mut next_check = Instant::now();

        let result = loop {
            if self.signal_handler.should_shutdown() {
                eprintln!("[RG-DAEMON] shutdown requested");
                break Ok("shutdown requested");
            }

            if self.signal_handler.should_reload() {
                self.handle_policy_reload();
            }

            let forced = self.signal_handler.should_check();
            if forced || Instant::now() >= next_check {
                if let Err(err) = self.run_check() {
                    break Err(err);
                }
                next_check = Instant::now() + interval;
                if self.args.max_checks.is_some_and(|max| self.checks_run >= max) {
                    break Ok("check limit reached");
                }
            }

            let remaining = next_check.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(TICK));
        };

        let reason = match &result {
            Ok(reason) => (*reason).to_string(),
            Err(err) => format!("stopped on error: {}", err.code()),
        };
        self.shutdown(&reason);
        result.map(|_| ())
    }

    /// One check. Only a store fault is returned; everything else is logged.
    fn run_check(&mut self) -> Result<()> {
        self.checks_run += 1;
        match self.orchestrator.check_and_retrain() {
            Ok(CheckReport::NoAction { reason, .. }) => {
                eprintln!("[RG-DAEMON] no retrain: {reason}");
                Ok(())
            }
            Ok(CheckReport::Retrained(outcome)) => {
                if outcome.success {
                    eprintln!(
                        "[RG-DAEMON] retrain {} succeeded in {:.1}s ({})",
                        outcome.retrain_id, outcome.duration_secs, outcome.reason
                    );
                } else {
                    eprintln!(
                        "[RG-DAEMON] retrain {} failed: {}",
                        outcome.retrain_id,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
                Ok(())
            }
            Err(err) if err.is_policy_rejection() => {
                eprintln!("[RG-DAEMON] check skipped: {err}");
                Ok(())
            }
            Err(err @ RgError::StoreUnavailable { .. }) => {
                eprintln!("[RG-DAEMON] state store unavailable, stopping: {err}");
                self.emit(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                Err(err)
            }
            Err(err) => {
                eprintln!("[RG-DAEMON] check failed: {err}");
                self.emit(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Re-read `[policy]` from the config file and apply it. Other sections need a restart.
    fn handle_policy_reload(&mut self) {
        let loaded = match Config::load(self.args.config_path.as_deref()) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("[RG-DAEMON] reload failed, keeping current policy: {err}");
                return;
            }
        };
        match self
            .orchestrator
            .update_config(&PolicyUpdate::from(&loaded.policy))
        {
            Ok(policy) => {
                eprintln!(
                    "[RG-DAEMON] policy reloaded (auto_retrain_enabled={}, min_quality_threshold={})",
                    policy.auto_retrain_enabled, policy.min_quality_threshold
                );
                self.config.policy = policy;
            }
            Err(err) => eprintln!("[RG-DAEMON] reloaded policy rejected: {err}"),
        }
    }

    fn emit(&self, event: ActivityEvent) {
        if let Some(handle) = &self.logger_handle {
            handle.send(event);
        }
    }

    fn shutdown(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();
        self.emit(ActivityEvent::EngineStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        if let Some(handle) = &self.logger_handle {
            let dropped = handle.dropped_events();
            if dropped > 0 {
                eprintln!("[RG-DAEMON] {dropped} activity events were dropped");
            }
            handle.shutdown();
        }
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
        eprintln!("[RG-DAEMON] shutdown complete (uptime={uptime_secs}s, checks={})", self.checks_run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::policy::PolicyConfig;
    use crate::engine::quality::StaticQuality;
    use crate::engine::state::{MemoryStateStore, StateStore};
    use crate::engine::supervisor::{JobOutput, JobSupervisor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob(Arc<AtomicUsize>);

    impl JobSupervisor for CountingJob {
        fn run_training_job(&self) -> Result<JobOutput> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(JobOutput {
                exit_code: Some(0),
                stderr: String::new(),
            })
        }
        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn daemon_with(
        store: MemoryStateStore,
        args: DaemonArgs,
    ) -> (RetrainDaemon, Arc<AtomicUsize>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("data.csv");
        std::fs::write(&dataset, "x,target\n1,1\n").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let orch = Orchestrator::new(
            store,
            StaticQuality(Some(0.9)),
            CountingJob(Arc::clone(&runs)),
            dataset,
            PolicyConfig::default(),
        );
        let daemon = RetrainDaemon::new(
            Config::default(),
            args,
            Arc::new(orch),
            SignalHandler::unregistered(),
        );
        (daemon, runs, dir)
    }

    #[test]
    fn first_check_runs_immediately() {
        let (mut daemon, runs, _dir) = daemon_with(
            MemoryStateStore::new(),
            DaemonArgs {
                max_checks: Some(1),
                ..DaemonArgs::default()
            },
        );
        daemon.run().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(daemon.orchestrator().store().load().unwrap().retrain_count, 1);
    }

    #[test]
    fn forced_check_respects_cooldown() {
        let (mut daemon, runs, _dir) = daemon_with(
            MemoryStateStore::new(),
            DaemonArgs {
                max_checks: Some(2),
                ..DaemonArgs::default()
            },
        );
        daemon.signal_handler().request_check();
        daemon.run().unwrap();
        // Second check lands inside the cooldown window.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let state = daemon.orchestrator().store().load().unwrap();
        assert_eq!(state.retrain_count, 1);
        assert!(state.last_check_time.is_some());
    }

    #[test]
    fn shutdown_signal_stops_loop() {
        let (mut daemon, runs, _dir) = daemon_with(MemoryStateStore::new(), DaemonArgs::default());
        let signals = daemon.signal_handler();
        let orch = daemon.orchestrator();
        let worker = thread::spawn(move || daemon.run());

        let deadline = Instant::now() + Duration::from_secs(10);
        while orch.store().load().unwrap().retrain_count == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        signals.request_shutdown();
        worker.join().unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn store_fault_stops_daemon() {
        let store = MemoryStateStore::new();
        store.set_fail_saves(true);
        let (mut daemon, runs, _dir) = daemon_with(store, DaemonArgs::default());
        let err = daemon.run().unwrap_err();
        assert_eq!(err.code(), "RG-3001");
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reload_applies_policy_section() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("config.toml");
        std::fs::write(
            &cfg_path,
            "[policy]\nauto_retrain_enabled = false\nmin_quality_threshold = 0.8\n",
        )
        .unwrap();
        let (mut daemon, runs, _dir) = daemon_with(
            MemoryStateStore::new(),
            DaemonArgs {
                config_path: Some(cfg_path),
                max_checks: Some(1),
            },
        );
        daemon.signal_handler().request_reload();
        daemon.run().unwrap();
        let policy = daemon.orchestrator().policy();
        assert!(!policy.auto_retrain_enabled);
        assert!((policy.min_quality_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
