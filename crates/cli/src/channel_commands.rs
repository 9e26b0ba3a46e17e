//! CLI subcommands for the tracked channel list.

use std::path::Path;

use {
    anyhow::{Context, Result},
    clap::{Args, Subcommand},
    streamsaver_config::{ChannelConfig, Quality},
    streamsaver_recorder::types::{Channel, ChannelPatch},
};

use crate::run_lock::ChannelsLock;

#[derive(Subcommand)]
pub enum ChannelAction {
    /// Start tracking a channel.
    Add {
        /// Platform tag of the channel (e.g. the handle after `@`).
        id: String,
        /// Display name used for the recordings folder.
        #[arg(long)]
        alias: Option<String>,
        /// best, 2160, 1440, 1080, 720, 480, 360, 240 or 144.
        #[arg(long, default_value = "best")]
        quality: String,
    },
    /// Stop tracking a channel.
    Remove { id: String },
    /// Change a channel's alias or quality.
    Update(UpdateArgs),
    /// List tracked channels.
    List {
        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Args)]
pub struct UpdateArgs {
    id: String,
    /// New display name.
    #[arg(long, conflicts_with = "clear_alias")]
    alias: Option<String>,
    /// Remove the display name; recordings fall back to the id.
    #[arg(long, default_value_t = false)]
    clear_alias: bool,
    /// New quality.
    #[arg(long)]
    quality: Option<String>,
}

impl UpdateArgs {
    fn patch(&self) -> Result<ChannelPatch> {
        let alias = match (&self.alias, self.clear_alias) {
            (_, true) => Some(None),
            (Some(alias), false) => Some(Some(alias.clone())),
            (None, false) => None,
        };
        let quality = self.quality.as_deref().map(parse_quality).transpose()?;
        Ok(ChannelPatch { alias, quality })
    }
}

fn parse_quality(raw: &str) -> Result<Quality> {
    raw.parse::<Quality>()
        .with_context(|| format!("invalid --quality '{raw}'"))
}

pub async fn handle_channels(config_path: Option<&Path>, action: ChannelAction) -> Result<()> {
    let config = crate::resolve_config(config_path)?;
    let mut channels_lock = ChannelsLock::open(&config.storage.channels_file)?;
    let _held = match action {
        ChannelAction::List { .. } => None,
        _ => Some(channels_lock.lock_for_edit()?),
    };
    let service = crate::open_service(&config)?;
    service.load().await?;

    match action {
        ChannelAction::Add { id, alias, quality } => {
            let mut channel = ChannelConfig::new(id);
            channel.alias = alias.filter(|a| !a.trim().is_empty());
            channel.quality = parse_quality(&quality)?;
            let added = service.add_channel(channel).await?;
            println!(
                "Tracking '{}' ({}, quality {})",
                added.id(),
                added.display_name(),
                added.config.quality
            );
        },
        ChannelAction::Remove { id } => {
            service.remove_channel(&id).await?;
            println!("Stopped tracking '{id}'.");
        },
        ChannelAction::Update(args) => {
            let patch = args.patch()?;
            if patch.is_empty() {
                println!("Nothing to change; pass --alias, --clear-alias or --quality.");
                return Ok(());
            }
            let updated = service.update_channel(&args.id, patch).await?;
            println!(
                "Updated '{}' ({}, quality {})",
                updated.id(),
                updated.display_name(),
                updated.config.quality
            );
        },
        ChannelAction::List { json } => {
            let channels = service.list_channels();
            if json {
                println!("{}", serde_json::to_string_pretty(&channels)?);
            } else if channels.is_empty() {
                println!("No channels tracked.");
            } else {
                print!("{}", render_table(&channels));
            }
        },
    }
    Ok(())
}

fn render_table(channels: &[Channel]) -> String {
    let id_width = channels
        .iter()
        .map(|c| c.id().len())
        .max()
        .unwrap_or(0)
        .max("ID".len());
    let name_width = channels
        .iter()
        .map(|c| c.display_name().len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = format!("{:id_width$}  {:name_width$}  QUALITY\n", "ID", "NAME");
    for c in channels {
        out.push_str(&format!(
            "{:id_width$}  {:name_width$}  {}\n",
            c.id(),
            c.display_name(),
            c.config.quality
        ));
    }
    out
}
