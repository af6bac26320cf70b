//! Telemetry pipeline - receiver, supervisor and store tools
//!
//! The main entry point for tp-core, handling:
//! - Supervised pipeline runs (receiver plus configured processes)
//! - The standalone UDP receiver
//! - Following and analyzing the telemetry store
//! - Configuration inspection

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tp_common::{OutputFormat, TelemetrySample};
use tp_config::{
    config_schema, load_config, load_config_file, validate_config, validate_receiver, ConfigError,
    PipelineConfig,
    ResolvedConfig, CONFIG_SCHEMA_VERSION,
};
use tp_core::analysis::{summarize, FlightSummary};
use tp_core::exit_codes::ExitCode;
use tp_core::logging::{generate_run_id, init_logging, LogConfig, LogFormat, LogLevel};
use tp_core::receiver::{Receiver, ReceiverConfig, RunMode};
use tp_core::signals::ShutdownSignal;
use tp_core::supervisor::{ProcessPlan, RunEnd, Supervisor, SupervisorError, SupervisorSettings};
use tp_store::{IncrementalReader, SampleHistory};
use tracing::{error, info, info_span, warn};

/// Telemetry pipeline - UDP ingestion, durable store and process supervision
#[derive(Parser)]
#[command(name = "tp-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to supervisor.json (otherwise TP_CONFIG, TP_CONFIG_DIR, XDG, defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "human")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr (human or jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline: start the receiver and configured processes in dependency order
    Run(RunArgs),

    /// Receive telemetry datagrams and append them to the store
    Receive(ReceiveArgs),

    /// Follow the store and print new samples
    Tail(TailArgs),

    /// Summarize the flight recorded in the store
    Analyze(AnalyzeArgs),

    /// Inspect and validate configuration
    Config(ConfigArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Bounded run: reset the store at start and stop ingestion on END
    #[arg(long)]
    bounded: bool,

    /// Receiver UDP port
    #[arg(long)]
    port: Option<u16>,

    /// Dashboard service port
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Store location
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReceiveArgs {
    /// Bounded run: reset the store at start and stop on END
    #[arg(long, conflicts_with = "open")]
    bounded: bool,

    /// Open run: keep the store and ignore END (overrides supervisor.bounded)
    #[arg(long)]
    open: bool,

    /// UDP port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Store location
    #[arg(long)]
    store: Option<PathBuf>,

    /// Largest datagram accepted
    #[arg(long)]
    max_datagram_bytes: Option<usize>,

    /// sync_data after every append
    #[arg(long)]
    fsync: bool,

    /// Receive timeout in milliseconds, bounds how long a shutdown goes unnoticed
    #[arg(long)]
    read_timeout_ms: Option<u64>,
}

impl ReceiveArgs {
    /// Explicit mode flag first, then the configuration.
    fn mode(&self, config: &PipelineConfig) -> RunMode {
        if self.bounded {
            RunMode::Bounded
        } else if self.open {
            RunMode::Open
        } else {
            RunMode::from_bounded(config.supervisor.bounded)
        }
    }
}

#[derive(Args, Debug)]
struct TailArgs {
    /// Store location
    #[arg(long)]
    store: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Print what is stored now and exit
    #[arg(long)]
    once: bool,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Store location
    #[arg(long)]
    store: Option<PathBuf>,

    /// Time between consecutive samples in milliseconds
    #[arg(long, default_value_t = 100)]
    sample_interval_ms: u64,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the resolved configuration and where it came from
    Show,
    /// Print the JSON schema of supervisor.json
    Schema,
    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the resolved configuration)
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Clean
            };
            let _ = err.print();
            std::process::exit(code.as_i32());
        }
    };

    let level = LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet);
    init_logging(&LogConfig::from_env(level, cli.global.log_format));

    let exit_code = match &cli.command {
        Commands::Run(args) => run_pipeline(&cli.global, args),
        Commands::Receive(args) => run_receive(&cli.global, args),
        Commands::Tail(args) => run_tail(&cli.global, args),
        Commands::Analyze(args) => run_analyze(&cli.global, args),
        Commands::Config(args) => run_config(&cli.global, args),
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_structured<T: Serialize>(format: OutputFormat, value: &T) {
    let text = match format {
        OutputFormat::Jsonl => serde_json::to_string(value),
        _ => serde_json::to_string_pretty(value),
    };
    match text {
        Ok(text) => println!("{}", text),
        Err(e) => error!(error = %e, "failed to serialize output"),
    }
}

/// Report a failure: JSON on stdout for structured formats, a message on stderr otherwise.
fn report_error(global: &GlobalOpts, code: ExitCode, message: &str) -> ExitCode {
    if global.format.is_structured() {
        print_structured(
            global.format,
            &serde_json::json!({
                "error": {
                    "code": code.as_i32(),
                    "name": code.code_name(),
                    "message": message,
                }
            }),
        );
    } else {
        eprintln!("tp-core: {}", message);
    }
    code
}

fn load_resolved(global: &GlobalOpts) -> Result<ResolvedConfig, ExitCode> {
    load_config(global.config.as_deref()).map_err(|e| config_failure(global, &e))
}

fn config_failure(global: &GlobalOpts, err: &ConfigError) -> ExitCode {
    error!(error = %err, "configuration error");
    report_error(global, ExitCode::ConfigError, &err.to_string())
}

/// Store path from the flag, else from the resolved configuration.
fn resolve_store(global: &GlobalOpts, store: Option<&Path>) -> Result<PathBuf, ExitCode> {
    match store {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(load_resolved(global)?.config.receiver.store_path),
    }
}

fn install_shutdown(global: &GlobalOpts) -> Result<ShutdownSignal, ExitCode> {
    ShutdownSignal::install().map_err(|e| {
        report_error(
            global,
            ExitCode::InternalError,
            &format!("failed to install signal handlers: {}", e),
        )
    })
}

// ============================================================================
// run
// ============================================================================

fn run_pipeline(global: &GlobalOpts, args: &RunArgs) -> ExitCode {
    let resolved = match load_resolved(global) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let mut config = resolved.config.clone();
    apply_run_overrides(&mut config, args);
    if let Err(e) = validate_config(&config) {
        return config_failure(global, &ConfigError::from(e));
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            return report_error(
                global,
                ExitCode::IoError,
                &format!("cannot locate own executable: {}", e),
            )
        }
    };
    let plan = match ProcessPlan::from_config(&config, &exe, resolved.path.as_deref()) {
        Ok(plan) => plan,
        Err(e) => return report_error(global, ExitCode::from(&e), &e.to_string()),
    };
    let shutdown = match install_shutdown(global) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let run_id = generate_run_id();
    let span = info_span!("run", run_id = %run_id);
    let _enter = span.enter();
    info!(
        source = %resolved.source,
        path = ?resolved.path,
        hash = resolved.hash.as_deref().unwrap_or("-"),
        bounded = config.supervisor.bounded,
        processes = plan.len(),
        "starting pipeline"
    );

    let settings = SupervisorSettings::from_section(&config.supervisor);
    let mut supervisor = Supervisor::new(plan, settings, shutdown).with_run_id(run_id.clone());

    match supervisor.run() {
        Ok(outcome) => {
            if !outcome.shutdown.unresponsive.is_empty() {
                warn!(unresponsive = ?outcome.shutdown.unresponsive, "some processes could not be stopped");
            }
            if global.format.is_structured() {
                let processes: Vec<serde_json::Value> = supervisor
                    .states()
                    .map(|(role, state)| {
                        serde_json::json!({
                            "role": role,
                            "state": state,
                            "restarts": supervisor.restarts(role),
                        })
                    })
                    .collect();
                print_structured(
                    global.format,
                    &serde_json::json!({
                        "run_id": run_id,
                        "end": outcome.end,
                        "shutdown": outcome.shutdown,
                        "processes": processes,
                    }),
                );
            } else {
                let end = match outcome.end {
                    RunEnd::Settled => "all processes finished",
                    RunEnd::Interrupted => "interrupted",
                };
                println!("pipeline stopped ({}): {}", end, supervisor.status_line());
            }
            ExitCode::Clean
        }
        Err(e @ SupervisorError::PortInUse { .. }) => report_error(
            global,
            ExitCode::from(&e),
            &format!("startup aborted, no process was launched: {}", e),
        ),
        Err(e) => report_error(global, ExitCode::from(&e), &e.to_string()),
    }
}

fn apply_run_overrides(config: &mut PipelineConfig, args: &RunArgs) {
    if args.bounded {
        config.supervisor.bounded = true;
    }
    if let Some(port) = args.port {
        config.receiver.port = port;
    }
    if let Some(port) = args.dashboard_port {
        config.dashboard.port = port;
    }
    if let Some(store) = &args.store {
        config.receiver.store_path = store.clone();
    }
}

// ============================================================================
// receive
// ============================================================================

fn run_receive(global: &GlobalOpts, args: &ReceiveArgs) -> ExitCode {
    let resolved = match load_resolved(global) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let mut section = resolved.config.receiver.clone();
    if let Some(port) = args.port {
        section.port = port;
    }
    if let Some(bind) = &args.bind {
        section.bind = bind.clone();
    }
    if let Some(store) = &args.store {
        section.store_path = store.clone();
    }
    if let Some(max) = args.max_datagram_bytes {
        section.max_datagram_bytes = max;
    }
    if args.fsync {
        section.fsync = true;
    }
    if let Some(timeout_ms) = args.read_timeout_ms {
        section.read_timeout_ms = Some(timeout_ms);
    }
    if let Err(e) = validate_receiver(&section) {
        return config_failure(global, &ConfigError::from(e));
    }

    let mode = args.mode(&resolved.config);
    let config = match ReceiverConfig::from_section(&section, mode) {
        Ok(c) => c,
        Err(e) => return report_error(global, ExitCode::from(&e), &e.to_string()),
    };
    let shutdown = match install_shutdown(global) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let mut receiver = match Receiver::bind(config) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "receiver failed to start");
            return report_error(global, ExitCode::from(&e), &e.to_string());
        }
    };

    match receiver.run(&shutdown) {
        Ok(summary) => {
            if global.format.is_structured() {
                print_structured(global.format, &summary);
            } else {
                println!(
                    "received {} records ({} rejected, {} END markers), stopped on {:?}",
                    summary.accepted, summary.rejected, summary.sentinels, summary.stop_reason
                );
            }
            ExitCode::Clean
        }
        Err(e) => {
            error!(error = %e, "receiver failed");
            report_error(global, ExitCode::IoError, &e.to_string())
        }
    }
}

// ============================================================================
// tail
// ============================================================================

fn run_tail(global: &GlobalOpts, args: &TailArgs) -> ExitCode {
    let path = match resolve_store(global, args.store.as_deref()) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let shutdown = if args.once {
        ShutdownSignal::new()
    } else {
        match install_shutdown(global) {
            Ok(s) => s,
            Err(code) => return code,
        }
    };

    let mut reader = IncrementalReader::new(&path);
    let mut printed: u64 = 0;
    let mut resets: u64 = 0;
    let interval = Duration::from_millis(args.interval_ms.max(1));

    loop {
        let batch = match reader.poll_batch() {
            Ok(batch) => batch,
            Err(e) => return report_error(global, ExitCode::IoError, &e.to_string()),
        };
        if batch.reset {
            resets += 1;
            info!(path = %path.display(), "store was reset");
            if !global.format.is_structured() {
                println!("-- store reset --");
            }
        }
        for sample in &batch.samples {
            print_sample(global.format, sample);
        }
        printed += batch.samples.len() as u64;

        if args.once || shutdown.wait_timeout(interval) {
            break;
        }
    }

    info!(samples = printed, resets, "tail finished");
    ExitCode::Clean
}

fn print_sample(format: OutputFormat, sample: &TelemetrySample) {
    match format {
        OutputFormat::Human => println!(
            "lat={:.6} lon={:.6} alt={:.2} rate={:.2}",
            sample.latitude, sample.longitude, sample.altitude, sample.rate
        ),
        // One object per line even for json: the output is a stream.
        OutputFormat::Json | OutputFormat::Jsonl => print_structured(OutputFormat::Jsonl, sample),
    }
}

// ============================================================================
// analyze
// ============================================================================

fn run_analyze(global: &GlobalOpts, args: &AnalyzeArgs) -> ExitCode {
    let path = match resolve_store(global, args.store.as_deref()) {
        Ok(p) => p,
        Err(code) => return code,
    };
    if !path.exists() {
        return report_error(
            global,
            ExitCode::IoError,
            &format!("store not found: {}", path.display()),
        );
    }

    let mut history = SampleHistory::new();
    match IncrementalReader::new(&path).poll_batch() {
        Ok(batch) => history.apply(&batch),
        Err(e) => return report_error(global, ExitCode::IoError, &e.to_string()),
    };
    let summary = summarize(history.samples(), Duration::from_millis(args.sample_interval_ms));

    if global.format.is_structured() {
        print_structured(
            global.format,
            &serde_json::json!({
                "store": path.display().to_string(),
                "summary": summary,
            }),
        );
    } else {
        match &summary {
            Some(summary) => print_summary(summary),
            None => println!("no samples to analyze in {}", path.display()),
        }
    }
    ExitCode::Clean
}

fn print_summary(summary: &FlightSummary) {
    println!("samples:              {}", summary.samples);
    for (name, stats) in [
        ("altitude (m)", &summary.altitude),
        ("rate (m/s)", &summary.rate),
        ("latitude", &summary.latitude),
        ("longitude", &summary.longitude),
    ] {
        println!(
            "{:<21} min {:.2}  max {:.2}  mean {:.2}",
            format!("{}:", name),
            stats.min,
            stats.max,
            stats.mean
        );
    }
    match summary.max_acceleration {
        Some(acc) => println!("max acceleration:     {:.2} m/s²", acc),
        None => println!("max acceleration:     -"),
    }
    println!("duration:             {:.1} s", summary.duration_secs);
    println!("peak rate at:         t={:.1} s", summary.peak_rate_at_secs);
    println!("horizontal distance:  {:.2} m", summary.horizontal_distance_m);
}

// ============================================================================
// config
// ============================================================================

fn run_config(global: &GlobalOpts, args: &ConfigArgs) -> ExitCode {
    match &args.command {
        ConfigCommands::Show => {
            let resolved = match load_resolved(global) {
                Ok(r) => r,
                Err(code) => return code,
            };
            if global.format.is_structured() {
                print_structured(global.format, &resolved);
            } else {
                println!("source: {}", resolved.source);
                if let Some(path) = &resolved.path {
                    println!("path:   {}", path.display());
                }
                if let Some(hash) = &resolved.hash {
                    println!("sha256: {}", hash);
                }
                print_structured(OutputFormat::Json, &resolved.config);
            }
            ExitCode::Clean
        }
        ConfigCommands::Schema => {
            print_structured(global.format, &config_schema());
            ExitCode::Clean
        }
        ConfigCommands::Validate { path } => {
            let result = match path {
                Some(path) => load_config_file(path).map(|(_, hash)| (Some(path.clone()), Some(hash))),
                None => load_config(global.config.as_deref()).map(|r| (r.path, r.hash)),
            };
            match result {
                Ok((path, hash)) => {
                    if global.format.is_structured() {
                        print_structured(
                            global.format,
                            &serde_json::json!({
                                "valid": true,
                                "path": path,
                                "hash": hash,
                            }),
                        );
                    } else {
                        match path {
                            Some(path) => println!("{}: valid", path.display()),
                            None => println!("builtin defaults: valid"),
                        }
                    }
                    ExitCode::Clean
                }
                Err(e) => config_failure(global, &e),
            }
        }
    }
}

// ============================================================================
// version
// ============================================================================

fn print_version(global: &GlobalOpts) {
    if global.format.is_structured() {
        print_structured(
            global.format,
            &serde_json::json!({
                "tp_core_version": env!("CARGO_PKG_VERSION"),
                "rust_version": env!("CARGO_PKG_RUST_VERSION"),
                "config_schema_version": CONFIG_SCHEMA_VERSION,
            }),
        );
    } else {
        println!("tp-core {}", env!("CARGO_PKG_VERSION"));
        println!("config schema version: {}", CONFIG_SCHEMA_VERSION);
    }
}
