use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use vidgen_core::config::{config_path, data_dir, initialize_data_dir, AppConfig};
use vidgen_core::generation::GenerationService;
use vidgen_core::logging::{
    self, FileSinkPlan, LoggingInitOptions, RedactingMakeWriter, RuntimeLogMode,
    DEFAULT_LOG_FILTER,
};
use vidgen_core::server::{app_router, AppState};
use vidgen_core::store::open_store;
use vidgen_core::templates::TemplateCatalog;

#[derive(Parser)]
#[command(
    name = "vidgen",
    about = "Product video generation service",
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

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Print the template catalog as JSON.
    Templates,
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
    log_startup_metadata(mode, &resolved_data_dir);

    match cli.command {
        Some(Commands::Templates) => print_templates(),
        None => run_server(cli.port, cli.host, resolved_data_dir).await,
    }
}

fn init_logging(
    mode: RuntimeLogMode,
    data_dir: Option<&Path>,
    verbose: u8,
    cli_log_filter: Option<&str>,
) {
    let init_options = LoggingInitOptions {
        mode,
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let plan = logging::compose_logging_init_plan(&init_options);
    let console_env_filter =
        parse_env_filter_with_fallback(&plan.filters.console_filter, "console");
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_env_filter);

    match plan.file_sink {
        FileSinkPlan::Ready { appender, .. } => {
            let file_env_filter =
                parse_env_filter_with_fallback(&plan.filters.file_filter, "file");
            let subscriber = tracing_subscriber::registry().with(console_layer).with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(RedactingMakeWriter::new(appender))
                    .with_filter(file_env_filter),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Disabled {
            attempted_log_dir,
            reason,
        } => {
            let subscriber = tracing_subscriber::registry().with(console_layer);
            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            warn!(
                attempted_log_dir = ?attempted_log_dir,
                reason = %reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
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

fn log_startup_metadata(mode: RuntimeLogMode, data_dir: &Path) {
    info!(
        mode = mode.as_str(),
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}

fn print_templates() -> Result<()> {
    let catalog = TemplateCatalog::builtin();
    let json = serde_json::to_string_pretty(catalog.all()).context("failed to encode templates")?;
    println!("{json}");
    Ok(())
}

fn load_config(data_dir: &Path) -> AppConfig {
    if let Err(e) = initialize_data_dir(data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }
    match AppConfig::load_from_path(&config_path(data_dir)) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config file, using defaults");
            AppConfig::default()
        }
    }
}

/// Must run inside a tokio runtime; the retention sweeper starts here.
fn build_state(config: AppConfig, data_dir: &Path) -> Result<AppState> {
    let store = open_store(&config, data_dir).context("failed to open video store")?;
    let service = Arc::new(GenerationService::new(
        store,
        TemplateCatalog::builtin(),
        config.jobs.clone(),
    ));
    service.spawn_retention_sweeper();
    Ok(AppState::new(service))
}

async fn run_server(
    port_override: Option<u16>,
    host_override: Option<String>,
    data_dir: PathBuf,
) -> Result<()> {
    let config = load_config(&data_dir);
    let port = port_override
        .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(config.server.port);
    let host = host_override.unwrap_or_else(|| config.server.host.clone());

    let backend = config.storage.backend;

    let state = build_state(config, &data_dir)?;
    let service = Arc::clone(state.service());
    let app = app_router(state);

    let addr = format!("{host}:{port}");
    info!(%addr, ?backend, "Starting vidgen server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
