//! Telemetry pipeline core library.
//!
//! This library provides the runtime components of the pipeline:
//! - The UDP telemetry receiver that feeds the log store
//! - The process supervisor (dependency-ordered start, restart policy,
//!   graceful-then-forced shutdown)
//! - Termination signal handling
//! - Flight analysis over stored samples
//! - Exit codes and logging for the CLI
//!
//! The binary entry point is in `main.rs`.

pub mod analysis;
pub mod exit_codes;
pub mod logging;
pub mod receiver;
pub mod signals;
pub mod supervisor;
