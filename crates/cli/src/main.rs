mod channel_commands;
mod config_commands;
mod doctor_commands;
mod run_commands;
mod run_lock;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    streamsaver_config::StreamSaverConfig,
    streamsaver_recorder::{RecorderService, store_file::FileStore},
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "streamsaver", about = "StreamSaver: record live streams of tracked channels")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/streamsaver/).
    #[arg(long, global = true, env = "STREAMSAVER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan channels and record live streams until interrupted (default).
    Run(run_commands::RunArgs),
    /// Manage tracked channels.
    Channels {
        #[command(subcommand)]
        action: channel_commands::ChannelAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Check config, external tools and storage.
    Doctor,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Resolve the config from `--config` or discovery.
fn resolve_config(path: Option<&Path>) -> anyhow::Result<StreamSaverConfig> {
    let config = streamsaver_config::load_or_discover(path)?;
    debug!(?config, "configuration resolved");
    Ok(config)
}

/// Facade over the channels file, using the process backend for captures.
fn open_service(config: &StreamSaverConfig) -> anyhow::Result<Arc<RecorderService>> {
    let store = Arc::new(FileStore::new(config.storage.channels_file.clone()));
    RecorderService::with_process_backend(config, store).context("failed to set up the recorder")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "streamsaver starting");

    let config_path = cli.config.as_deref();
    match cli.command {
        None => run_commands::handle_run(config_path, run_commands::RunArgs::default()).await,
        Some(Commands::Run(args)) => run_commands::handle_run(config_path, args).await,
        Some(Commands::Channels { action }) => {
            channel_commands::handle_channels(config_path, action).await
        },
        Some(Commands::Config { action }) => config_commands::handle_config(config_path, action),
        Some(Commands::Doctor) => doctor_commands::handle_doctor(config_path).await,
    }
}
