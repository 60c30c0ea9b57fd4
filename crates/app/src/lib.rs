use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use weft_core::catalog::builtin_library;
use weft_core::config::{config_path, data_dir, initialize_data_dir, AppConfig};
use weft_core::logging::{
    self, FileSinkPlan, LoggingInitOptions, PanicHookInstallPlan, RuntimeLogMode,
    DEFAULT_LOG_FILTER,
};
use weft_core::model::Workflow;
use weft_core::preview;
use weft_core::server::{app_router, app_state_with_config};

#[derive(Parser)]
#[command(
    name = "weft",
    about = "Workflow-authoring backend for node-graph editors",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the normalized 300x200 preview layout of a workflow snapshot
    Preview(PreviewArgs),
    /// List the widget templates the server would offer
    Library,
}

#[derive(Args)]
struct PreviewArgs {
    #[arg(help = "Path to a workflow snapshot JSON file")]
    workflow: PathBuf,
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let mode = if cli.command.is_some() {
        RuntimeLogMode::Cli
    } else {
        RuntimeLogMode::Server
    };
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(
        mode,
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    log_startup_metadata(mode, resolved_data_dir.as_path());

    match cli.command {
        Some(Commands::Preview(args)) => run_preview(&args.workflow),
        Some(Commands::Library) => run_library(),
        None => run_server(cli.port, cli.host, resolved_data_dir).await,
    }
}

fn init_logging(
    mode: RuntimeLogMode,
    data_dir: Option<&Path>,
    verbose: u8,
    cli_log_filter: Option<&str>,
) {
    let panic_hook_plan = logging::install_panic_hook(data_dir);

    let init_options = LoggingInitOptions {
        mode,
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let filter = logging::select_log_filter(&init_options);

    match logging::build_file_sink_plan(&init_options) {
        FileSinkPlan::Ready(ready) => {
            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(parse_env_filter_with_fallback(&filter, "console")),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(ready.appender)
                        .with_filter(parse_env_filter_with_fallback(&filter, "file")),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(parse_env_filter_with_fallback(&filter, "console")),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            warn!(
                attempted_log_dir = ?fallback.attempted_log_dir,
                reason = %fallback.reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }

    if let PanicHookInstallPlan::Fallback {
        attempted_crash_dir,
        reason,
    } = panic_hook_plan
    {
        warn!(
            attempted_crash_dir = ?attempted_crash_dir,
            reason = %reason,
            "Panic crash artifact hook unavailable; continuing without panic artifacts"
        );
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn runtime_mode_name(mode: RuntimeLogMode) -> &'static str {
    match mode {
        RuntimeLogMode::Cli => "cli",
        RuntimeLogMode::Server => "server",
    }
}

fn log_startup_metadata(mode: RuntimeLogMode, data_dir: &Path) {
    let pid = std::process::id();
    let cfg_path = config_path(data_dir);
    info!(
        mode = runtime_mode_name(mode),
        pid,
        data_dir = %data_dir.display(),
        config_path = %cfg_path.display(),
        "Runtime startup metadata"
    );
}

async fn run_server(
    port_override: Option<u16>,
    host_override: Option<String>,
    data_dir: PathBuf,
) -> Result<()> {
    if let Err(e) = initialize_data_dir(&data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }
    let cfg_path = config_path(&data_dir);
    let config = match AppConfig::load_from_path(&cfg_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config file, using defaults");
            AppConfig::default()
        }
    };

    let port = port_override
        .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(config.server.port);
    let host = host_override.unwrap_or_else(|| config.server.host.clone());

    let state = app_state_with_config(config, cfg_path, data_dir);
    let app = app_router(state);

    let addr = format!("{host}:{port}");
    info!(%addr, "Starting weft server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn run_preview(path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read workflow snapshot: {}", path.display()))?;
    let workflow: Workflow = serde_json::from_str(&raw)
        .with_context(|| format!("invalid workflow snapshot JSON: {}", path.display()))?;

    let layout = preview::normalize(&workflow);
    let rendered =
        serde_json::to_string_pretty(&layout).context("failed to serialize preview layout")?;
    println!("{rendered}");
    Ok(())
}

fn run_library() -> Result<()> {
    for template in builtin_library().list() {
        println!(
            "{}/{} ({} in, {} out)",
            template.package,
            template.name,
            template.inputs.len(),
            template.outputs.len()
        );
    }
    Ok(())
}
