//! Telemetry pipeline configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for supervisor.json
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation
//! - Provenance (source path and SHA-256) for the loaded file

pub mod load;
pub mod pipeline;
pub mod process;
pub mod resolve;
pub mod validate;

pub use load::{config_schema, load_config, load_config_file, ConfigError, ResolvedConfig};
pub use pipeline::{
    DashboardSection, PipelineConfig, ProcessesSection, ReceiverProcess, ReceiverSection,
    SupervisorSection,
};
pub use process::{BindEntry, ProcessEntry, Protocol, RestartPolicy, Role};
pub use resolve::{resolve_config_path, resolve_config_path_with, ConfigSource};
pub use validate::{validate_config, validate_receiver, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "supervisor.json";
