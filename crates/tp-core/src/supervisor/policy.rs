//! Per-process state machine and the restart decision.

use serde::Serialize;
use std::fmt;
use std::process::ExitStatus;
use tp_config::{RestartPolicy, Role};

/// Lifecycle state of a managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    /// Not launched yet, or queued for relaunch.
    Pending,
    Running {
        pid: u32,
    },
    /// Exited with status 0.
    Exited {
        code: i32,
    },
    /// Exited non-zero or was killed by a signal.
    Crashed {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Spawn failed (missing executable, permissions). A process that dies
    /// inside the settle window is reaped as `Exited` or `Crashed` instead.
    FailedToStart {
        reason: String,
    },
    /// A dependency never reached RUNNING.
    Unstartable {
        blocked_by: Vec<Role>,
    },
    /// Terminated by the supervisor during shutdown.
    Stopped,
}

impl ProcessState {
    /// Classify an exit status: zero is a normal exit, anything else a crash.
    pub fn from_exit_status(status: ExitStatus) -> Self {
        Self::from_exit(status.code(), exit_signal(&status))
    }

    pub fn from_exit(code: Option<i32>, signal: Option<i32>) -> Self {
        match code {
            Some(0) => ProcessState::Exited { code: 0 },
            _ => ProcessState::Crashed { code, signal },
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }

    /// Upper-case label used in status output.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessState::Pending => "PENDING",
            ProcessState::Running { .. } => "RUNNING",
            ProcessState::Exited { .. } => "EXITED",
            ProcessState::Crashed { .. } => "CRASHED",
            ProcessState::FailedToStart { .. } => "FAILED_TO_START",
            ProcessState::Unstartable { .. } => "UNSTARTABLE",
            ProcessState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Running { pid } => write!(f, "RUNNING (pid {})", pid),
            ProcessState::Exited { code } => write!(f, "EXITED ({})", code),
            ProcessState::Crashed {
                signal: Some(sig), ..
            } => write!(f, "CRASHED (signal {})", sig),
            ProcessState::Crashed { code: Some(code), .. } => write!(f, "CRASHED ({})", code),
            ProcessState::FailedToStart { reason } => write!(f, "FAILED_TO_START ({})", reason),
            ProcessState::Unstartable { blocked_by } => {
                let names: Vec<&str> = blocked_by.iter().map(|r| r.name()).collect();
                write!(f, "UNSTARTABLE (waiting on {})", names.join(", "))
            }
            other => f.write_str(other.label()),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Whether a process in `state` is launched again under `policy`.
///
/// Only terminal outcomes of a process that was (or tried to be) launched
/// are considered; pending, running, unstartable and stopped processes are
/// never "restarted".
pub fn should_restart(policy: RestartPolicy, state: &ProcessState) -> bool {
    match (policy, state) {
        (RestartPolicy::Never, _) => false,
        (RestartPolicy::Always, ProcessState::Exited { .. })
        | (RestartPolicy::Always, ProcessState::Crashed { .. })
        | (RestartPolicy::Always, ProcessState::FailedToStart { .. }) => true,
        (RestartPolicy::OnCrashOnly, ProcessState::Crashed { .. })
        | (RestartPolicy::OnCrashOnly, ProcessState::FailedToStart { .. }) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean() -> ProcessState {
        ProcessState::from_exit(Some(0), None)
    }

    fn failed() -> ProcessState {
        ProcessState::from_exit(Some(3), None)
    }

    fn killed() -> ProcessState {
        ProcessState::from_exit(None, Some(9))
    }

    #[test]
    fn exit_classification() {
        assert_eq!(clean(), ProcessState::Exited { code: 0 });
        assert_eq!(
            failed(),
            ProcessState::Crashed {
                code: Some(3),
                signal: None
            }
        );
        assert!(matches!(killed(), ProcessState::Crashed { signal: Some(9), .. }));
    }

    #[test]
    fn never_policy_stays_terminal() {
        for state in [clean(), failed(), killed()] {
            assert!(!should_restart(RestartPolicy::Never, &state));
        }
        let spawn_failure = ProcessState::FailedToStart {
            reason: "missing".into(),
        };
        assert!(!should_restart(RestartPolicy::Never, &spawn_failure));
    }

    #[test]
    fn on_crash_only_ignores_clean_exit() {
        assert!(!should_restart(RestartPolicy::OnCrashOnly, &clean()));
        assert!(should_restart(RestartPolicy::OnCrashOnly, &failed()));
        assert!(should_restart(RestartPolicy::OnCrashOnly, &killed()));
    }

    #[test]
    fn always_restarts_any_exit() {
        for state in [clean(), failed(), killed()] {
            assert!(should_restart(RestartPolicy::Always, &state));
        }
    }

    #[test]
    fn live_and_blocked_states_never_restart() {
        for state in [
            ProcessState::Pending,
            ProcessState::Running { pid: 1 },
            ProcessState::Stopped,
            ProcessState::Unstartable {
                blocked_by: vec![Role::Receiver],
            },
        ] {
            assert!(!should_restart(RestartPolicy::Always, &state));
        }
    }

    #[test]
    fn display_includes_detail() {
        assert_eq!(ProcessState::Running { pid: 42 }.to_string(), "RUNNING (pid 42)");
        assert_eq!(killed().to_string(), "CRASHED (signal 9)");
        assert_eq!(ProcessState::Pending.to_string(), "PENDING");
        assert_eq!(
            ProcessState::Unstartable {
                blocked_by: vec![Role::Receiver]
            }
            .to_string(),
            "UNSTARTABLE (waiting on receiver)"
        );
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_value(ProcessState::Exited { code: 0 }).unwrap();
        assert_eq!(json["state"], "exited");
        assert_eq!(json["code"], 0);
    }
}
