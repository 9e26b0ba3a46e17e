//! Configuration loading, validation and env substitution.
//!
//! Config files: `streamsaver.toml`, `streamsaver.yaml`, or `streamsaver.json`
//! Searched in `./` then `~/.config/streamsaver/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    loader::{
        config_dir, discover_and_load, find_or_default_config_path, load_config,
        load_or_discover, save_config, save_config_to,
    },
    schema::{
        ChannelConfig, CycleAnchor, Quality, RecorderConfig, ScannerConfig, StorageConfig,
        StreamSaverConfig, ToolsConfig, UnknownQuality,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate_channels, validate_config},
};
