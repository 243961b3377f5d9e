//! Script scheduler
//!
//! The [`Runner`] drives every loaded script either once or on a repeating
//! tick. Each run gets a fresh sandboxed interpreter with the capability
//! modules installed, a deadline, and an abort signal shared with `stop`.
//! Runs of different scripts proceed concurrently; runs of the same script
//! never overlap.

pub mod result;
pub mod sandbox;

pub use result::{RunResult, RunStatus, RunSummary, ScriptStatus};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{ScriptsConfig, DEFAULT_LUA_MODULES_PATH};
use crate::modules::{install, Module, RunContext};
use crate::script::Script;

/// What to do when a script is due while its previous run is unfinished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Drop the tick and count a skip
    #[default]
    Skip,
    /// Keep at most one pending run, started when the current one ends
    Queue,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub update_interval: Duration,
    pub timeout: Duration,
    pub shutdown_grace: Duration,
    pub overlap: OverlapPolicy,
    pub lua_modules_path: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
            overlap: OverlapPolicy::Skip,
            lua_modules_path: DEFAULT_LUA_MODULES_PATH.to_string(),
        }
    }
}

impl From<&ScriptsConfig> for RunnerConfig {
    fn from(config: &ScriptsConfig) -> Self {
        Self {
            update_interval: config.update_interval,
            timeout: config.timeout,
            shutdown_grace: config.shutdown_grace,
            overlap: config.overlap,
            lua_modules_path: config.lua_modules_path.clone(),
        }
    }
}

/// Scheduling state of one script
#[derive(Debug, Default)]
struct Slot {
    running: bool,
    queued: bool,
    skips: u64,
    last_start: Option<Instant>,
}

enum RunError {
    Fault(String),
    Deadline,
    Aborted,
}

pub struct Runner {
    scripts: Vec<Arc<Script>>,
    config: RunnerConfig,
    modules: Vec<Arc<dyn Module>>,
    results: DashMap<String, RunResult>,
    slots: DashMap<String, Slot>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    abort: CancellationToken,
}

impl Runner {
    /// Fails when an interpreter cannot be built with this configuration.
    pub fn new(
        scripts: Vec<Script>,
        config: RunnerConfig,
        modules: Vec<Arc<dyn Module>>,
    ) -> Result<Self, RunnerError> {
        sandbox::interpreter("startup", &config.lua_modules_path)
            .map_err(|e| RunnerError::Interpreter(e.to_string()))?;

        Ok(Self {
            scripts: scripts.into_iter().map(Arc::new).collect(),
            config,
            modules,
            results: DashMap::new(),
            slots: DashMap::new(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
        })
    }

    pub fn scripts(&self) -> &[Arc<Script>] {
        &self.scripts
    }

    /// Run every script once and report, or tick until `cancel` fires.
    pub async fn watch(
        self: Arc<Self>,
        cancel: CancellationToken,
        once: bool,
    ) -> Option<RunSummary> {
        if once {
            return Some(self.run_once().await);
        }

        if self.config.update_interval.is_zero() {
            tracing::info!("Update interval is zero, running a single pass");
            self.tick(Instant::now());
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.shutdown.cancelled() => {}
            }
            return None;
        }

        let period = self.tick_period();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(scripts = self.scripts.len(), period = ?period, "Runner started");

        loop {
            tokio::select! {
                at = ticker.tick() => self.tick(at),
                _ = cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
            }
        }

        tracing::info!("Runner loop finished");
        None
    }

    /// Smallest configured interval; per-script overrides are honored at
    /// this granularity.
    fn tick_period(&self) -> Duration {
        self.scripts
            .iter()
            .filter_map(|s| s.interval)
            .fold(self.config.update_interval, Duration::min)
    }

    async fn run_once(self: &Arc<Self>) -> RunSummary {
        let handles: Vec<(String, JoinHandle<()>)> = self
            .scripts
            .iter()
            .filter(|script| self.try_start(&script.name, Instant::now()))
            .map(|script| (script.name.clone(), self.spawn_run(Arc::clone(script))))
            .collect();

        let mut summary = RunSummary::default();
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!(script = %name, error = %e, "Script task failed");
            }
            summary.total += 1;
            match self.results.get(&name) {
                Some(result) if result.is_success() => summary.succeeded += 1,
                _ => summary.failed += 1,
            }
        }

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Single pass finished"
        );
        summary
    }

    /// `at` is the scheduled tick instant, so due checks do not drift with
    /// wake-up latency.
    fn tick(self: &Arc<Self>, at: Instant) {
        if self.shutdown.is_cancelled() {
            return;
        }

        for script in &self.scripts {
            if self.is_due(script, at) && self.try_start(&script.name, at) {
                self.spawn_run(Arc::clone(script));
            }
        }
    }

    fn is_due(&self, script: &Script, now: Instant) -> bool {
        let interval = script.interval.unwrap_or(self.config.update_interval);
        self.slots
            .get(&script.name)
            .and_then(|slot| slot.last_start)
            .map(|last| now.duration_since(last) >= interval)
            .unwrap_or(true)
    }

    /// Mark the script running as of `at`, or apply the overlap policy when
    /// it already is.
    fn try_start(&self, name: &str, at: Instant) -> bool {
        let mut slot = self.slots.entry(name.to_string()).or_default();
        if !slot.running {
            slot.running = true;
            slot.last_start = Some(at);
            return true;
        }

        match self.config.overlap {
            OverlapPolicy::Queue if !slot.queued => {
                slot.queued = true;
                tracing::debug!(script = %name, "Script still running, run queued");
            }
            _ => {
                slot.skips += 1;
                tracing::warn!(
                    script = %name,
                    skips = slot.skips,
                    "Script still running, tick skipped"
                );
            }
        }
        false
    }

    /// Release the slot, or start the queued run. Returns true to run again.
    fn finish(&self, name: &str) -> bool {
        let mut slot = self.slots.entry(name.to_string()).or_default();
        if slot.queued && !self.shutdown.is_cancelled() {
            slot.queued = false;
            slot.last_start = Some(Instant::now());
            return true;
        }
        slot.queued = false;
        slot.running = false;
        false
    }

    fn spawn_run(self: &Arc<Self>, script: Arc<Script>) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        self.tracker.spawn(async move {
            loop {
                if let Some(result) = runner.run_script(&script).await {
                    runner.results.insert(script.name.clone(), result);
                }
                if !runner.finish(&script.name) {
                    break;
                }
            }
        })
    }

    /// Execute one run. Aborted runs produce no result.
    async fn run_script(&self, script: &Arc<Script>) -> Option<RunResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start + script.timeout.unwrap_or(self.config.timeout);

        tracing::debug!(script = %script.name, "Script run started");
        let outcome = self.execute(script, deadline).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    script = %script.name,
                    duration_ms = elapsed.as_millis() as u64,
                    "Script run succeeded"
                );
                Some(RunResult::success(&script.name, started_at, elapsed))
            }
            Err(RunError::Aborted) => {
                tracing::warn!(script = %script.name, "Script run aborted");
                None
            }
            Err(RunError::Deadline) => {
                tracing::error!(script = %script.name, "Script run deadline exceeded");
                Some(RunResult::failure(
                    &script.name,
                    started_at,
                    elapsed,
                    sandbox::DEADLINE_EXCEEDED,
                ))
            }
            Err(RunError::Fault(message)) => {
                tracing::error!(script = %script.name, error = %message, "Script run failed");
                Some(RunResult::failure(&script.name, started_at, elapsed, message))
            }
        }
    }

    async fn execute(&self, script: &Arc<Script>, deadline: Instant) -> Result<(), RunError> {
        let lua = sandbox::interpreter(&script.name, &self.config.lua_modules_path)
            .map_err(|e| RunError::Fault(e.to_string()))?;
        let ctx = RunContext::new(Arc::clone(script));
        install(&lua, &self.modules, &ctx).map_err(|e| RunError::Fault(e.to_string()))?;

        let run = sandbox::execute(&lua, script, deadline, self.abort.clone());
        let result = tokio::select! {
            result = tokio::time::timeout_at(deadline, run) => result,
            _ = self.abort.cancelled() => return Err(RunError::Aborted),
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Err(_) => Err(RunError::Deadline),
            Ok(Err(_)) if self.abort.is_cancelled() => Err(RunError::Aborted),
            Ok(Err(_)) if Instant::now() >= deadline => Err(RunError::Deadline),
            Ok(Err(e)) => Err(RunError::Fault(e.to_string())),
        }
    }

    /// Forced run of one script (or all), subject to the overlap policy.
    /// Returns the number of runs started.
    pub fn trigger(self: &Arc<Self>, name: Option<&str>) -> Result<usize, RunnerError> {
        if self.shutdown.is_cancelled() {
            return Err(RunnerError::Stopped);
        }

        let selected: Vec<&Arc<Script>> = match name {
            Some(name) => {
                let script = self
                    .scripts
                    .iter()
                    .find(|s| s.name == name)
                    .ok_or_else(|| RunnerError::UnknownScript(name.to_string()))?;
                vec![script]
            }
            None => self.scripts.iter().collect(),
        };

        let now = Instant::now();
        let mut started = 0;
        for script in selected {
            if self.try_start(&script.name, now) {
                self.spawn_run(Arc::clone(script));
                started += 1;
            }
        }
        tracing::info!(script = ?name, started, "Manual run triggered");
        Ok(started)
    }

    /// Stop scheduling, give in-flight runs the grace period, then abort
    /// whatever is left and wait for it to unwind.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();

        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                in_flight = self.tracker.len(),
                grace = ?grace,
                "Runs still in flight after grace period, aborting"
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }
        tracing::info!("Runner stopped");
    }

    pub fn results(&self) -> Vec<RunResult> {
        let mut results: Vec<RunResult> =
            self.results.iter().map(|r| r.value().clone()).collect();
        results.sort_by(|a, b| a.script.cmp(&b.script));
        results
    }

    pub fn result(&self, name: &str) -> Option<RunResult> {
        self.results.get(name).map(|r| r.value().clone())
    }

    pub fn skips(&self, name: &str) -> u64 {
        self.slots.get(name).map(|s| s.skips).unwrap_or(0)
    }

    pub fn status(&self, name: &str) -> Option<ScriptStatus> {
        let script = self.scripts.iter().find(|s| s.name == name)?;
        let (running, skips) = self
            .slots
            .get(name)
            .map(|s| (s.running, s.skips))
            .unwrap_or((false, 0));

        Some(ScriptStatus {
            name: script.name.clone(),
            channels: script.channels.clone(),
            interval: script.interval,
            timeout: script.timeout,
            running,
            skips,
            last_run: self.result(name),
        })
    }

    pub fn statuses(&self) -> Vec<ScriptStatus> {
        self.scripts
            .iter()
            .filter_map(|s| self.status(&s.name))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("error create interpreter: {0}")]
    Interpreter(String),

    #[error("script '{0}' not found")]
    UnknownScript(String),

    #[error("runner is stopped")]
    Stopped,
}
