//! Process supervisor: dependency-ordered start, health polling with
//! per-process restart policy, and graceful-then-forced shutdown.
//!
//! Process declarations ([`ProcessSpec`]) are immutable and built once.
//! Run state lives in handles owned by [`Supervisor`] and is only touched by
//! its control loop, which is single-threaded: a health tick always
//! completes before the next one starts.

pub mod plan;
pub mod policy;
pub mod ports;
pub mod status;
pub mod terminate;

pub use plan::{
    default_restart, CommandLine, PortBinding, ProcessPlan, ProcessSpec, SupervisorError,
};
pub use policy::{should_restart, ProcessState};
pub use status::{status_line, SystemSnapshot};

use crate::signals::ShutdownSignal;
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::process::Child;
use std::time::{Duration, Instant};
use tp_config::{Role, SupervisorSection};
use tracing::{debug, error, info, warn};

/// Capacity of the recent-event ring.
const MAX_EVENTS: usize = 100;

/// Poll interval while waiting for children to exit during shutdown.
const EXIT_POLL: Duration = Duration::from_millis(25);

/// How long to wait for the kernel to reap a SIGKILLed child.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Timing and restart limits of the control loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorSettings {
    pub tick_interval: Duration,
    pub shutdown_grace: Duration,
    /// A fresh process must survive this long before dependents launch.
    pub settle: Duration,
    /// Restarts allowed per process; `None` is unlimited.
    pub max_restarts: Option<u32>,
    pub status_interval: Duration,
    pub resource_report_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        SupervisorSettings::from_section(&SupervisorSection::default())
    }
}

impl SupervisorSettings {
    pub fn from_section(section: &SupervisorSection) -> Self {
        SupervisorSettings {
            tick_interval: Duration::from_millis(section.tick_interval_ms),
            shutdown_grace: Duration::from_millis(section.shutdown_grace_ms),
            settle: Duration::from_millis(section.settle_ms),
            max_restarts: section.max_restarts,
            status_interval: Duration::from_millis(section.status_interval_ms),
            resource_report_interval: Duration::from_millis(section.resource_report_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorEventKind {
    Started,
    SpawnFailed,
    Unstartable,
    Exited,
    Restarted,
    RestartLimitReached,
    PortUnavailable,
    ShutdownRequested,
    Stopped,
    Killed,
    Unresponsive,
}

/// One entry of the recent-event ring.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorEvent {
    pub timestamp: String,
    pub kind: SupervisorEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub detail: String,
}

/// Outcome of [`Supervisor::start_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub started: Vec<Role>,
    pub failed: Vec<Role>,
    pub unstartable: Vec<Role>,
    /// Not attempted because shutdown was requested mid-start.
    pub skipped: Vec<Role>,
}

/// Outcome of one [`Supervisor::poll_health`] tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Processes observed to have terminated during this tick.
    pub exits: Vec<(Role, ProcessState)>,
    pub restarted: Vec<Role>,
    /// Previously unstartable processes launched now that their dependencies run.
    pub launched: Vec<Role>,
    pub restart_failures: Vec<(Role, String)>,
    /// Restartable or unstartable processes still waiting on a dependency.
    pub waiting: Vec<Role>,
}

/// Outcome of [`Supervisor::shutdown_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub graceful: Vec<Role>,
    pub forced: Vec<Role>,
    pub unresponsive: Vec<Role>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEnd {
    /// Nothing left running or restartable.
    Settled,
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub end: RunEnd,
    pub shutdown: ShutdownReport,
}

/// Mutable run state of one managed process.
#[derive(Debug)]
struct ProcessHandle {
    child: Option<Child>,
    state: ProcessState,
    restarts: u32,
    limit_logged: bool,
}

impl ProcessHandle {
    fn new() -> Self {
        ProcessHandle {
            child: None,
            state: ProcessState::Pending,
            restarts: 0,
            limit_logged: false,
        }
    }
}

#[derive(Debug)]
pub struct Supervisor {
    plan: ProcessPlan,
    handles: Vec<ProcessHandle>,
    settings: SupervisorSettings,
    shutdown: ShutdownSignal,
    events: VecDeque<SupervisorEvent>,
    run_id: Option<String>,
    shut_down: bool,
}

impl Supervisor {
    pub fn new(plan: ProcessPlan, settings: SupervisorSettings, shutdown: ShutdownSignal) -> Self {
        let handles = plan.specs().iter().map(|_| ProcessHandle::new()).collect();
        Supervisor {
            plan,
            handles,
            settings,
            shutdown,
            events: VecDeque::with_capacity(MAX_EVENTS),
            run_id: None,
            shut_down: false,
        }
    }

    /// Exported to children as `TP_RUN_ID`.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn plan(&self) -> &ProcessPlan {
        &self.plan
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn state(&self, role: Role) -> Option<&ProcessState> {
        self.index_of(role).map(|i| &self.handles[i].state)
    }

    /// States in start order.
    pub fn states(&self) -> impl Iterator<Item = (Role, &ProcessState)> + '_ {
        self.plan
            .specs()
            .iter()
            .zip(&self.handles)
            .map(|(spec, handle)| (spec.role, &handle.state))
    }

    pub fn restarts(&self, role: Role) -> u32 {
        self.index_of(role)
            .map(|i| self.handles[i].restarts)
            .unwrap_or(0)
    }

    pub fn events(&self) -> impl Iterator<Item = &SupervisorEvent> {
        self.events.iter()
    }

    pub fn status_line(&self) -> String {
        status_line(self.states())
    }

    fn index_of(&self, role: Role) -> Option<usize> {
        self.plan.specs().iter().position(|s| s.role == role)
    }

    fn record_event(&mut self, kind: SupervisorEventKind, role: Option<Role>, detail: impl Into<String>) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SupervisorEvent {
            timestamp: Utc::now().to_rfc3339(),
            kind,
            role,
            detail: detail.into(),
        });
    }

    /// Dependencies of `idx` that are not RUNNING.
    fn blocked_by(&self, idx: usize) -> Vec<Role> {
        self.plan.specs()[idx]
            .depends_on
            .iter()
            .copied()
            .filter(|dep| !self.state(*dep).is_some_and(ProcessState::is_running))
            .collect()
    }

    /// Spawn the process at `idx`. On failure the handle becomes FailedToStart.
    fn launch(&mut self, idx: usize) -> Result<u32, String> {
        let spec = &self.plan.specs()[idx];
        let role = spec.role;
        let mut cmd = spec.command.to_command();
        if let Some(run_id) = &self.run_id {
            cmd.env("TP_RUN_ID", run_id);
        }
        debug!(%role, command = %spec.command, "spawning");

        match cmd.spawn() {
            Ok(child) => {
                let pid = child.id();
                let handle = &mut self.handles[idx];
                handle.child = Some(child);
                handle.state = ProcessState::Running { pid };
                info!(%role, pid, "process started");
                self.record_event(SupervisorEventKind::Started, Some(role), format!("pid {}", pid));
                Ok(pid)
            }
            Err(e) => {
                let reason = e.to_string();
                self.handles[idx].state = ProcessState::FailedToStart {
                    reason: reason.clone(),
                };
                error!(%role, error = %reason, "failed to start process");
                self.record_event(SupervisorEventKind::SpawnFailed, Some(role), reason.clone());
                Err(reason)
            }
        }
    }

    /// Reap `idx` if it has exited. Returns the new terminal state.
    fn reap(&mut self, idx: usize) -> Option<ProcessState> {
        let role = self.plan.specs()[idx].role;
        let handle = &mut self.handles[idx];
        let child = handle.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                let state = ProcessState::from_exit_status(status);
                handle.child = None;
                handle.state = state.clone();
                match &state {
                    ProcessState::Exited { .. } => info!(%role, state = %state, "process exited"),
                    _ => warn!(%role, state = %state, "process crashed"),
                }
                self.record_event(SupervisorEventKind::Exited, Some(role), state.to_string());
                Some(state)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(%role, error = %e, "failed to check process status");
                None
            }
        }
    }

    /// Check every required port, then launch all processes in dependency order.
    ///
    /// An occupied port aborts before anything launches. A process whose
    /// dependency did not reach RUNNING is marked unstartable and skipped;
    /// the rest of the set still starts.
    pub fn start_all(&mut self) -> Result<StartReport, SupervisorError> {
        if let Err(err) = ports::preflight(self.plan.specs()) {
            error!(error = %err, "startup aborted: required port is unavailable");
            let role = match &err {
                SupervisorError::PortInUse { role, .. } => Some(*role),
                _ => None,
            };
            self.record_event(SupervisorEventKind::PortUnavailable, role, err.to_string());
            return Err(err);
        }

        let mut report = StartReport::default();
        for idx in 0..self.handles.len() {
            let role = self.plan.specs()[idx].role;
            if self.shutdown.is_requested() {
                report.skipped.push(role);
                continue;
            }

            let blocked_by = self.blocked_by(idx);
            if !blocked_by.is_empty() {
                warn!(%role, ?blocked_by, "dependency not running, skipping");
                self.record_event(
                    SupervisorEventKind::Unstartable,
                    Some(role),
                    format!("waiting on {:?}", blocked_by),
                );
                self.handles[idx].state = ProcessState::Unstartable { blocked_by };
                report.unstartable.push(role);
                continue;
            }

            if self.launch(idx).is_err() {
                report.failed.push(role);
                continue;
            }
            report.started.push(role);

            if !self.settings.settle.is_zero() {
                self.shutdown.wait_timeout(self.settings.settle);
            }
            self.reap(idx);
        }

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            unstartable = report.unstartable.len(),
            "startup complete"
        );
        Ok(report)
    }

    /// One health tick: reap exited processes, then restart or launch in
    /// dependency order where the policy allows.
    pub fn poll_health(&mut self) -> HealthReport {
        let mut report = HealthReport::default();

        for idx in 0..self.handles.len() {
            if let Some(state) = self.reap(idx) {
                report.exits.push((self.plan.specs()[idx].role, state));
            }
        }

        if self.shutdown.is_requested() || self.shut_down {
            return report;
        }

        for idx in 0..self.handles.len() {
            let spec = &self.plan.specs()[idx];
            let role = spec.role;
            let policy = spec.restart;
            let state = self.handles[idx].state.clone();

            match state {
                ProcessState::Pending | ProcessState::Unstartable { .. } => {
                    let blocked_by = self.blocked_by(idx);
                    if blocked_by.is_empty() {
                        if self.launch(idx).is_ok() {
                            report.launched.push(role);
                        } else {
                            report.restart_failures.push((role, self.failure_reason(idx)));
                        }
                    } else {
                        self.handles[idx].state = ProcessState::Unstartable { blocked_by };
                        report.waiting.push(role);
                    }
                }
                ProcessState::Exited { .. }
                | ProcessState::Crashed { .. }
                | ProcessState::FailedToStart { .. } => {
                    if !should_restart(policy, &state) {
                        continue;
                    }
                    if let Some(max) = self.settings.max_restarts {
                        if self.handles[idx].restarts >= max {
                            if !self.handles[idx].limit_logged {
                                warn!(%role, max, "restart limit reached, leaving process down");
                                self.handles[idx].limit_logged = true;
                                self.record_event(
                                    SupervisorEventKind::RestartLimitReached,
                                    Some(role),
                                    format!("{} restarts", max),
                                );
                            }
                            continue;
                        }
                    }
                    if !self.blocked_by(idx).is_empty() {
                        report.waiting.push(role);
                        continue;
                    }

                    self.handles[idx].restarts += 1;
                    let attempt = self.handles[idx].restarts;
                    match self.launch(idx) {
                        Ok(pid) => {
                            info!(%role, pid, attempt, "process restarted");
                            self.record_event(
                                SupervisorEventKind::Restarted,
                                Some(role),
                                format!("attempt {}", attempt),
                            );
                            report.restarted.push(role);
                        }
                        Err(reason) => report.restart_failures.push((role, reason)),
                    }
                }
                ProcessState::Running { .. } | ProcessState::Stopped => {}
            }
        }

        report
    }

    fn failure_reason(&self, idx: usize) -> String {
        match &self.handles[idx].state {
            ProcessState::FailedToStart { reason } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Whether nothing is running and nothing can run again.
    ///
    /// Walks the start order, treating a process as live when it runs, or
    /// when it could still be (re)started because every dependency is live.
    pub fn is_settled(&self) -> bool {
        let mut live: Vec<Role> = Vec::new();
        for (spec, handle) in self.plan.specs().iter().zip(&self.handles) {
            let deps_live = spec.depends_on.iter().all(|d| live.contains(d));
            let can_run = match &handle.state {
                ProcessState::Running { .. } => true,
                ProcessState::Pending | ProcessState::Unstartable { .. } => deps_live,
                ProcessState::Exited { .. }
                | ProcessState::Crashed { .. }
                | ProcessState::FailedToStart { .. } => {
                    let under_limit = self
                        .settings
                        .max_restarts
                        .is_none_or(|max| handle.restarts < max);
                    deps_live && under_limit && should_restart(spec.restart, &handle.state)
                }
                ProcessState::Stopped => false,
            };
            if can_run {
                live.push(spec.role);
            }
        }
        live.is_empty()
    }

    /// Stop every running process: SIGTERM, wait up to `grace` (shared by
    /// all), then SIGKILL whatever is left. Calling it again does nothing.
    pub fn shutdown_all(&mut self, grace: Duration) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down {
            return report;
        }
        self.shut_down = true;

        // Dependents first.
        let mut pending: Vec<usize> = (0..self.handles.len())
            .rev()
            .filter(|&i| self.handles[i].child.is_some())
            .collect();
        if pending.is_empty() {
            return report;
        }

        info!(processes = pending.len(), grace_ms = grace.as_millis() as u64, "stopping processes");
        self.record_event(
            SupervisorEventKind::ShutdownRequested,
            None,
            format!("{} processes", pending.len()),
        );

        for &idx in &pending {
            let role = self.plan.specs()[idx].role;
            if let Some(child) = self.handles[idx].child.as_mut() {
                if let Err(e) = terminate::request_stop(child) {
                    warn!(%role, error = %e, "failed to send termination request");
                }
            }
        }

        let deadline = Instant::now() + grace;
        loop {
            pending.retain(|&idx| {
                let exited = self.handles[idx]
                    .child
                    .as_mut()
                    .is_none_or(|child| !matches!(child.try_wait(), Ok(None)));
                if exited {
                    report.graceful.push(self.plan.specs()[idx].role);
                }
                !exited
            });
            if pending.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(EXIT_POLL.min(deadline.saturating_duration_since(Instant::now())));
        }
        for role in report.graceful.clone() {
            self.mark_stopped(role, SupervisorEventKind::Stopped);
        }

        for idx in pending {
            let role = self.plan.specs()[idx].role;
            warn!(%role, "grace period expired, forcing termination");
            let reaped = match self.handles[idx].child.as_mut() {
                Some(child) => {
                    if let Err(e) = terminate::force_kill(child) {
                        warn!(%role, error = %e, "failed to kill process");
                    }
                    wait_reaped(child, KILL_REAP_TIMEOUT)
                }
                None => true,
            };
            if reaped {
                report.forced.push(role);
                self.mark_stopped(role, SupervisorEventKind::Killed);
            } else {
                error!(%role, "process could not be stopped");
                self.record_event(SupervisorEventKind::Unresponsive, Some(role), "survived SIGKILL");
                report.unresponsive.push(role);
            }
        }

        info!(
            graceful = report.graceful.len(),
            forced = report.forced.len(),
            unresponsive = report.unresponsive.len(),
            "shutdown complete"
        );
        report
    }

    fn mark_stopped(&mut self, role: Role, kind: SupervisorEventKind) {
        if let Some(idx) = self.index_of(role) {
            self.handles[idx].child = None;
            self.handles[idx].state = ProcessState::Stopped;
            self.record_event(kind, Some(role), "stopped");
        }
    }

    /// Log the host snapshot and the RSS of every running process.
    pub fn report_resources(&self) {
        let snapshot = SystemSnapshot::collect();
        info!(
            load = ?snapshot.load_averages,
            memory_used_percent = snapshot.memory_used_percent(),
            "system resources"
        );
        for (role, state) in self.states() {
            if let ProcessState::Running { pid } = state {
                if let Some(rss_kb) = status::process_rss_kb(*pid) {
                    info!(%role, pid, rss_kb, "process resources");
                }
            }
        }
    }

    /// Start everything, then tick until the set settles or shutdown is
    /// requested, then stop everything.
    pub fn run(&mut self) -> Result<RunOutcome, SupervisorError> {
        self.start_all()?;
        info!(status = %self.status_line(), "status");

        let mut last_status = Instant::now();
        let mut last_resources = Instant::now();

        let end = loop {
            if self.is_settled() {
                info!("no process left to run");
                break RunEnd::Settled;
            }
            if self.shutdown.wait_timeout(self.settings.tick_interval) {
                info!("shutdown requested");
                break RunEnd::Interrupted;
            }

            let health = self.poll_health();
            for (role, reason) in &health.restart_failures {
                warn!(%role, %reason, "restart failed, retrying next tick");
            }

            if last_status.elapsed() >= self.settings.status_interval {
                info!(status = %self.status_line(), "status");
                last_status = Instant::now();
            }
            if last_resources.elapsed() >= self.settings.resource_report_interval {
                self.report_resources();
                last_resources = Instant::now();
            }
        };

        let shutdown = self.shutdown_all(self.settings.shutdown_grace);
        Ok(RunOutcome { end, shutdown })
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.shut_down {
            return;
        }
        for handle in &mut self.handles {
            if let Some(child) = handle.child.as_mut() {
                let _ = terminate::force_kill(child);
                let _ = child.wait();
            }
        }
    }
}

fn wait_reaped(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => std::thread::sleep(EXIT_POLL),
            Ok(None) => return false,
            Err(_) => return false,
        }
    }
}
