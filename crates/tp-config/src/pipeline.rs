//! supervisor.json document types.

use crate::process::{ProcessEntry, RestartPolicy};
use crate::CONFIG_SCHEMA_VERSION;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tp_common::{DEFAULT_DASHBOARD_PORT, DEFAULT_RECEIVER_PORT, DEFAULT_STORE_PATH};

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    pub schema_version: String,

    #[serde(default)]
    pub receiver: ReceiverSection,

    #[serde(default)]
    pub supervisor: SupervisorSection,

    #[serde(default)]
    pub dashboard: DashboardSection,

    #[serde(default)]
    pub processes: ProcessesSection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            receiver: ReceiverSection::default(),
            supervisor: SupervisorSection::default(),
            dashboard: DashboardSection::default(),
            processes: ProcessesSection::default(),
        }
    }
}

/// Datagram receiver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReceiverSection {
    /// Address to bind (all interfaces by default).
    pub bind: String,
    pub port: u16,
    /// Location of the durable log.
    pub store_path: PathBuf,
    /// Largest datagram accepted; longer payloads are truncated and rejected.
    pub max_datagram_bytes: usize,
    /// `sync_data` after every append.
    pub fsync: bool,
    /// Receive timeout used to re-check for shutdown (250 ms when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

impl Default for ReceiverSection {
    fn default() -> Self {
        ReceiverSection {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_RECEIVER_PORT,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            max_datagram_bytes: 1024,
            fsync: false,
            read_timeout_ms: None,
        }
    }
}

/// Supervisor loop timing and restart limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SupervisorSection {
    /// Reset the store at start and stop ingestion on the sentinel.
    pub bounded: bool,
    pub tick_interval_ms: u64,
    pub status_interval_ms: u64,
    pub resource_report_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    /// How long a fresh process must stay alive to count as running.
    pub settle_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        SupervisorSection {
            bounded: false,
            tick_interval_ms: 1000,
            status_interval_ms: 5000,
            resource_report_interval_ms: 10_000,
            shutdown_grace_ms: 5000,
            settle_ms: 1000,
            max_restarts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DashboardSection {
    pub port: u16,
}

impl Default for DashboardSection {
    fn default() -> Self {
        DashboardSection {
            port: DEFAULT_DASHBOARD_PORT,
        }
    }
}

/// Per-role process declarations.
///
/// The receiver always runs; the other roles are started only when configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProcessesSection {
    pub receiver: ReceiverProcess,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulator: Option<ProcessEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualizer: Option<ProcessEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<ProcessEntry>,
}

/// The receiver runs as the supervisor's own `receive` subcommand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReceiverProcess {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,
}
