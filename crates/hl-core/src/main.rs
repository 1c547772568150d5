//! hostlog - host telemetry agent
//!
//! The main entry point, handling:
//! - The long-running agent (sampling, process events, rollups, delivery)
//! - One-shot rollup and delivery passes
//! - Decrypting sealed reports and showing the effective configuration

use clap::{Args, Parser, Subcommand};
use chrono::Local;
use hl_common::Classify;
use hl_core::config::{load_config, ConfigError, ConfigOptions, ResolvedConfig};
use hl_core::delivery::CycleOutcome;
use hl_core::exit_codes::ExitCode;
use hl_core::layout::StorageLayout;
use hl_core::lifecycle::{install_signal_handler, Agent, AgentError, Services, ShutdownSignal};
use hl_core::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use hl_core::report::unseal;
use hl_core::collect::{SnapshotSource, SysinfoProbe, SysinfoSource};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

/// hostlog - samples host telemetry and process events, seals daily reports
/// and delivers them by mail
#[derive(Parser)]
#[command(name = "hostlog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (default: hostlog.toml in the standard locations)
    #[arg(long, global = true, env = "HOSTLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the base directory for caches, reports and delivery state
    #[arg(long, global = true, env = "HOSTLOG_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted (default)
    Run,

    /// Roll up every cached day before today into sealed reports
    Rollup,

    /// Run one delivery cycle now
    Deliver,

    /// Decrypt a sealed report to JSON
    Decrypt(DecryptArgs),

    /// Print the effective configuration with secrets masked
    Config,

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct DecryptArgs {
    /// Sealed report artifact (.hlr)
    artifact: PathBuf,

    /// Write the JSON document here instead of stdout
    #[arg(long, short)]
    out: Option<PathBuf>,

    /// Passphrase (default: report.passphrase from the configuration)
    #[arg(long, env = "HOSTLOG_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,
}

// ============================================================================
// Main entry point
// ============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version also arrive here and go to stdout
            let code = if err.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Clean
            };
            let _ = err.print();
            std::process::exit(code.as_i32());
        }
    };

    let exit_code = match cli.command {
        None | Some(Commands::Run) => run_agent(&cli.global),
        Some(Commands::Rollup) => run_rollup(&cli.global),
        Some(Commands::Deliver) => run_deliver(&cli.global),
        Some(Commands::Decrypt(ref args)) => run_decrypt(&cli.global, args),
        Some(Commands::Config) => run_config(&cli.global),
        Some(Commands::Version) => {
            println!("hostlog {}", env!("CARGO_PKG_VERSION"));
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

fn log_config(global: &GlobalOpts) -> LogConfig {
    let level = if global.quiet {
        Some(LogLevel::Error)
    } else {
        match global.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    };
    LogConfig::from_env(level, global.log_format).with_file(global.log_file.clone())
}

fn start_logging(config: &LogConfig) {
    if let Err(e) = init_logging(config) {
        eprintln!("hostlog: cannot open log file: {}", e);
        let fallback = LogConfig {
            file: None,
            ..config.clone()
        };
        let _ = init_logging(&fallback);
    }
}

fn load(global: &GlobalOpts) -> Result<ResolvedConfig, ExitCode> {
    let options = ConfigOptions {
        config_path: global.config.clone(),
        base_dir: global.base_dir.clone(),
    };
    load_config(&options).map_err(|e| {
        error!(error = %e, class = %e.class(), "Failed to load configuration");
        config_exit(&e)
    })
}

fn config_exit(e: &ConfigError) -> ExitCode {
    match e {
        ConfigError::Render(_) => ExitCode::InternalError,
        _ => ExitCode::ConfigError,
    }
}

fn agent_exit(e: &AgentError) -> ExitCode {
    match e {
        AgentError::Storage { .. } | AgentError::Cache(_) => ExitCode::IoError,
        AgentError::Spawn { .. } | AgentError::Signal(_) => ExitCode::InternalError,
    }
}

fn layout_for(resolved: &ResolvedConfig) -> Result<StorageLayout, ExitCode> {
    StorageLayout::resolve(resolved.config.storage.base_dir.as_deref()).map_err(|e| {
        error!(error = %e, "No usable base directory");
        ExitCode::IoError
    })
}

/// Load config, prepare storage and open the shared services.
fn open_services(resolved: &ResolvedConfig) -> Result<(Services, SysinfoSource), ExitCode> {
    let layout = layout_for(resolved)?;
    let identity = Services::prepare(&resolved.config, &layout).map_err(|e| {
        error!(error = %e, class = %e.class(), "Failed to prepare storage");
        agent_exit(&e)
    })?;
    let mut source = SysinfoSource::new(&identity.device_name);
    let host = source.host_info();
    let services = Services::open(&resolved.config, layout, identity, host).map_err(|e| {
        error!(error = %e, class = %e.class(), "Failed to open stores");
        agent_exit(&e)
    })?;
    Ok((services, source))
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::Clean
        }
        Err(e) => {
            error!(error = %e, "Failed to render output");
            ExitCode::InternalError
        }
    }
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_agent(global: &GlobalOpts) -> ExitCode {
    let mut logging = log_config(global);
    let resolved = match load(global) {
        Ok(resolved) => resolved,
        Err(code) => {
            start_logging(&logging);
            return code;
        }
    };
    let layout = match layout_for(&resolved) {
        Ok(layout) => layout,
        Err(code) => {
            start_logging(&logging);
            return code;
        }
    };
    logging = logging.with_default_file(layout.log_path());
    start_logging(&logging);

    let (services, source) = match open_services(&resolved) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let shutdown = ShutdownSignal::new();
    if let Err(e) = install_signal_handler(&shutdown) {
        error!(error = %e, "Failed to install signal handler");
        return agent_exit(&e);
    }

    let agent = Agent::new(
        resolved.config,
        services,
        Box::new(source),
        Box::new(SysinfoProbe::new()),
    );
    match agent.run(&shutdown) {
        Ok(summary) if summary.panicked.is_empty() => ExitCode::Clean,
        Ok(summary) => {
            error!(threads = ?summary.panicked, "Agent stopped with failed background threads");
            ExitCode::PartialFail
        }
        Err(e) => {
            error!(error = %e, class = %e.class(), "Agent failed");
            agent_exit(&e)
        }
    }
}

fn run_rollup(global: &GlobalOpts) -> ExitCode {
    start_logging(&log_config(global));
    let resolved = match load(global) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    let (services, _) = match open_services(&resolved) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let summary = services.aggregator().run(Local::now().date_naive());
    info!(days = summary.days.len(), failed = summary.failed_days(), "Rollup finished");
    match print_json(&summary) {
        ExitCode::Clean if !summary.is_clean() => ExitCode::PartialFail,
        code => code,
    }
}

fn run_deliver(global: &GlobalOpts) -> ExitCode {
    start_logging(&log_config(global));
    let resolved = match load(global) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    let (services, _) = match open_services(&resolved) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let outcome = services.dispatcher(&resolved.config).run_cycle();
    match print_json(&outcome) {
        ExitCode::Clean if !outcome.is_complete() => ExitCode::PartialFail,
        ExitCode::Clean => {
            if let CycleOutcome::Delivered { count, .. } = &outcome {
                info!(count, "Delivery finished");
            }
            ExitCode::Clean
        }
        code => code,
    }
}

fn run_decrypt(global: &GlobalOpts, args: &DecryptArgs) -> ExitCode {
    start_logging(&log_config(global));
    let passphrase = match &args.passphrase {
        Some(passphrase) => passphrase.clone(),
        None => match load(global) {
            Ok(resolved) => resolved.config.report.passphrase,
            Err(code) => return code,
        },
    };

    let data = match std::fs::read(&args.artifact) {
        Ok(data) => data,
        Err(e) => {
            error!(artifact = %args.artifact.display(), error = %e, "Cannot read artifact");
            return ExitCode::IoError;
        }
    };
    let document = match unseal(&data, &passphrase) {
        Ok(document) => document,
        Err(e) => {
            error!(artifact = %args.artifact.display(), error = %e, "Cannot decrypt artifact");
            return ExitCode::IoError;
        }
    };

    match &args.out {
        None => print_json(&document),
        Some(out) => {
            let written = serde_json::to_vec_pretty(&document)
                .map_err(|e| e.to_string())
                .and_then(|bytes| std::fs::write(out, bytes).map_err(|e| e.to_string()));
            match written {
                Ok(()) => {
                    info!(out = %out.display(), rows = document.record_count, "Report decrypted");
                    ExitCode::Clean
                }
                Err(e) => {
                    error!(out = %out.display(), error = %e, "Cannot write output");
                    ExitCode::IoError
                }
            }
        }
    }
}

fn run_config(global: &GlobalOpts) -> ExitCode {
    start_logging(&log_config(global));
    let resolved = match load(global) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    match resolved.config.masked().to_toml() {
        Ok(text) => {
            match &resolved.path {
                Some(path) => println!("# source: {}", path.display()),
                None => println!("# source: built-in defaults"),
            }
            print!("{}", text);
            ExitCode::Clean
        }
        Err(e) => {
            error!(error = %e, "Failed to render configuration");
            config_exit(&e)
        }
    }
}
