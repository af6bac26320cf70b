//! Managed process roles and per-process settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of processes a pipeline deployment runs.
///
/// Declaration order doubles as the tie-break for start order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Receiver,
    Simulator,
    Visualizer,
    Dashboard,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Receiver,
        Role::Simulator,
        Role::Visualizer,
        Role::Dashboard,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Role::Receiver => "receiver",
            Role::Simulator => "simulator",
            Role::Visualizer => "visualizer",
            Role::Dashboard => "dashboard",
        }
    }

    /// Dependency edges used when the configuration does not override them.
    pub fn default_dependencies(self) -> &'static [Role] {
        match self {
            Role::Receiver => &[],
            Role::Simulator | Role::Visualizer | Role::Dashboard => &[Role::Receiver],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown role: {}", s))
    }
}

/// Whether a terminated process is launched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Restart after any exit.
    Always,
    /// Never restart.
    Never,
    /// Restart only after a non-zero exit or a signal.
    OnCrashOnly,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::Never => write!(f, "never"),
            RestartPolicy::OnCrashOnly => write!(f, "on_crash_only"),
        }
    }
}

/// Transport of a port a process binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// A port that must be free before a process launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BindEntry {
    pub port: u16,
    pub protocol: Protocol,
}

/// An externally provided process (simulator, visualizer, dashboard).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessEntry {
    /// Program followed by its arguments. `{receiver_port}` and
    /// `{dashboard_port}` are substituted at launch.
    pub command: Vec<String>,

    /// Restart policy; the role default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,

    /// Dependency override; the role default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<Role>>,

    /// Extra ports to check before launch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<BindEntry>,
}

impl ProcessEntry {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProcessEntry {
            command: command.into_iter().map(Into::into).collect(),
            restart: None,
            depends_on: None,
            binds: Vec::new(),
        }
    }
}
