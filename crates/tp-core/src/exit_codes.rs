//! Process exit codes of the `tp-core` binary.
//!
//! Launch scripts rely on these values:
//! - 0 and 1 describe how a run ended
//! - 10-19 are problems the user can fix (arguments, configuration)
//! - 20-29 are failures inside the pipeline (store I/O, internal errors)

use crate::receiver::ReceiverError;
use crate::supervisor::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Finished or interrupted, and every child was stopped.
    Clean = 0,

    /// A required port was taken; nothing was launched.
    StartupAborted = 1,

    ArgsError = 10,

    /// Configuration missing, unparsable or rejected by validation.
    ConfigError = 11,

    InternalError = 20,

    /// The store or another file could not be read or written.
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    pub fn is_user_error(self) -> bool {
        (10..20).contains(&self.as_i32())
    }

    pub fn is_internal_error(self) -> bool {
        self.as_i32() >= 20
    }

    /// Stable name used in JSON error output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::StartupAborted => "ERR_STARTUP_ABORTED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<&ReceiverError> for ExitCode {
    fn from(err: &ReceiverError) -> Self {
        match err {
            ReceiverError::Bind { .. } => ExitCode::StartupAborted,
            ReceiverError::InvalidBind(_) => ExitCode::ArgsError,
            ReceiverError::Store(_) | ReceiverError::Socket(_) => ExitCode::IoError,
        }
    }
}

impl From<&SupervisorError> for ExitCode {
    fn from(err: &SupervisorError) -> Self {
        match err {
            SupervisorError::PortInUse { .. } => ExitCode::StartupAborted,
            // Plan errors come from configuration.
            SupervisorError::DuplicateRole(_)
            | SupervisorError::UnknownDependency { .. }
            | SupervisorError::DependencyCycle { .. } => ExitCode::ConfigError,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
