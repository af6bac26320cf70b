//! Structured logging for the pipeline binary.
//!
//! Events go to stderr, either human-readable or as JSON lines; stdout is
//! reserved for command payloads. Supervised children inherit stderr, so a
//! `run` in jsonl mode yields one interleaved JSON event stream.

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Workspace crates that log; everything else stays at `warn`.
const LOG_TARGETS: [&str; 3] = ["tp_core", "tp_store", "tp_config"];

fn filter_directives(level: LogLevel) -> String {
    let mut directives = vec![format!("{}", LogLevel::Warn.max(level))];
    directives.extend(LOG_TARGETS.iter().map(|target| format!("{}={}", target, level)));
    directives.join(",")
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer(config: &LogConfig) -> BoxedLayer {
    match config.format {
        LogFormat::Jsonl => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
    }
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init_logging(config: &LogConfig) -> bool {
    tracing_subscriber::registry()
        .with(output_layer(config))
        .with(EnvFilter::new(filter_directives(config.level)))
        .try_init()
        .is_ok()
}

/// Identifier attached to one supervised run, `run-` plus 12 hex digits.
pub fn generate_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &id[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique_and_short() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.strip_prefix("run-").unwrap().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn directives_cap_foreign_crates_at_warn() {
        assert_eq!(
            filter_directives(LogLevel::Debug),
            "warn,tp_core=debug,tp_store=debug,tp_config=debug"
        );
        assert_eq!(
            filter_directives(LogLevel::Error),
            "error,tp_core=error,tp_store=error,tp_config=error"
        );
    }
}
