//! `streamsaver run`: the long-running scan-and-record loop.

use std::path::Path;

use {
    anyhow::{Result, bail},
    clap::Args,
    streamsaver_config::{Severity, StreamSaverConfig, validate_config},
    tokio::sync::broadcast::error::RecvError,
    tracing::{error, info, warn},
};

use crate::run_lock::ChannelsLock;

#[derive(Args, Default)]
pub struct RunArgs {
    /// Override `recorder.max_concurrent_downloads`.
    #[arg(long)]
    max_concurrent: Option<usize>,
    /// Override `scanner.idle_interval_minutes`.
    #[arg(long)]
    interval_minutes: Option<f64>,
    /// Print every recorder event as a JSON line on stdout.
    #[arg(long, default_value_t = false)]
    events: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut StreamSaverConfig) {
        if let Some(max) = self.max_concurrent {
            config.recorder.max_concurrent_downloads = max;
        }
        if let Some(minutes) = self.interval_minutes {
            config.scanner.idle_interval_minutes = minutes;
        }
    }
}

pub async fn handle_run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let mut config = crate::resolve_config(config_path)?;
    args.apply(&mut config);

    let diagnostics = validate_config(&config);
    for d in &diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
            Severity::Info => info!(path = %d.path, "{}", d.message),
        }
    }
    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    if errors > 0 {
        bail!("configuration has {errors} error(s); run `streamsaver config check` for details");
    }

    let mut channels_lock = ChannelsLock::open(&config.storage.channels_file)?;
    let _held = channels_lock.lock_for_run()?;

    let service = crate::open_service(&config)?;
    service.start().await?;
    if service.list_channels().is_empty() {
        warn!("no channels tracked; add one with `streamsaver channels add <id>`");
    }

    let mut events = service.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                break;
            },
            ev = events.recv() => match ev {
                Ok(event) if args.events => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "failed to serialize event"),
                },
                Ok(_) => {},
                Err(RecvError::Lagged(missed)) => warn!(missed, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("shutting down, cancelling in-flight recordings");
    service.stop().await;
    let status = service.status();
    info!(
        cycles = status.cycles_completed,
        channels = status.channel_count,
        "streamsaver stopped"
    );
    Ok(())
}
