//! Configuration validation errors and semantic validation.

use crate::pipeline::{PipelineConfig, ReceiverSection};
use crate::process::{ProcessEntry, Role};
use std::net::IpAddr;
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Largest UDP payload over IPv4.
const MAX_UDP_PAYLOAD: usize = 65_507;

/// Smallest datagram buffer that fits one encoded record.
const MIN_DATAGRAM_BYTES: usize = 64;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Validate a pipeline configuration semantically.
pub fn validate_config(config: &PipelineConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    validate_receiver(&config.receiver)?;
    let receiver = &config.receiver;

    // Supervisor timing
    let supervisor = &config.supervisor;
    for (field, value) in [
        ("supervisor.tick_interval_ms", supervisor.tick_interval_ms),
        ("supervisor.status_interval_ms", supervisor.status_interval_ms),
        (
            "supervisor.resource_report_interval_ms",
            supervisor.resource_report_interval_ms,
        ),
        ("supervisor.shutdown_grace_ms", supervisor.shutdown_grace_ms),
    ] {
        if value == 0 {
            return Err(invalid(field, "Must be positive"));
        }
    }

    // Dashboard
    if config.dashboard.port == 0 {
        return Err(invalid("dashboard.port", "Must be non-zero"));
    }
    if config.dashboard.port == receiver.port {
        return Err(ValidationError::SemanticError(format!(
            "receiver.port and dashboard.port must differ (both {})",
            receiver.port
        )));
    }

    // Processes
    let processes = &config.processes;
    for (role, entry) in [
        (Role::Simulator, &processes.simulator),
        (Role::Visualizer, &processes.visualizer),
        (Role::Dashboard, &processes.dashboard),
    ] {
        if let Some(entry) = entry {
            validate_process(config, role, entry)?;
        }
    }

    Ok(())
}

/// Validate the receiver section on its own, as the standalone `receive`
/// command does after applying its flags.
pub fn validate_receiver(receiver: &ReceiverSection) -> ValidationResult<()> {
    if receiver.bind.parse::<IpAddr>().is_err() {
        return Err(invalid(
            "receiver.bind",
            format!("Must be an IP address, got {:?}", receiver.bind),
        ));
    }
    if receiver.port == 0 {
        return Err(invalid("receiver.port", "Must be non-zero"));
    }
    if receiver.store_path.as_os_str().is_empty() {
        return Err(invalid("receiver.store_path", "Must not be empty"));
    }
    if !(MIN_DATAGRAM_BYTES..=MAX_UDP_PAYLOAD).contains(&receiver.max_datagram_bytes) {
        return Err(invalid(
            "receiver.max_datagram_bytes",
            format!(
                "Must be in [{}, {}], got {}",
                MIN_DATAGRAM_BYTES, MAX_UDP_PAYLOAD, receiver.max_datagram_bytes
            ),
        ));
    }
    if receiver.read_timeout_ms == Some(0) {
        return Err(invalid("receiver.read_timeout_ms", "Must be positive"));
    }
    Ok(())
}

fn validate_process(
    config: &PipelineConfig,
    role: Role,
    entry: &ProcessEntry,
) -> ValidationResult<()> {
    let prefix = format!("processes.{}", role);

    match entry.command.first() {
        None => return Err(invalid(format!("{}.command", prefix), "Must not be empty")),
        Some(program) if program.trim().is_empty() => {
            return Err(invalid(
                format!("{}.command", prefix),
                "Program name must not be blank",
            ))
        }
        Some(_) => {}
    }

    if let Some(deps) = &entry.depends_on {
        for dep in deps {
            if *dep == role {
                return Err(invalid(
                    format!("{}.depends_on", prefix),
                    "A process cannot depend on itself",
                ));
            }
            if !is_configured(config, *dep) {
                return Err(invalid(
                    format!("{}.depends_on", prefix),
                    format!("Depends on {}, which is not configured", dep),
                ));
            }
        }
    }

    for (i, bind) in entry.binds.iter().enumerate() {
        if bind.port == 0 {
            return Err(invalid(
                format!("{}.binds[{}].port", prefix, i),
                "Must be non-zero",
            ));
        }
    }

    Ok(())
}

fn is_configured(config: &PipelineConfig, role: Role) -> bool {
    match role {
        Role::Receiver => true,
        Role::Simulator => config.processes.simulator.is_some(),
        Role::Visualizer => config.processes.visualizer.is_some(),
        Role::Dashboard => config.processes.dashboard.is_some(),
    }
}
