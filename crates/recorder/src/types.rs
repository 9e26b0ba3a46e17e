//! Core data types for the channel recorder.

use std::{
    fmt,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    streamsaver_config::{ChannelConfig, Quality},
};

/// Lifecycle state of a tracked channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelState {
    #[default]
    Idle,
    Probing,
    Recording,
    Error,
}

impl ChannelState {
    /// Whether `self -> to` is an edge of the lifecycle graph.
    #[must_use]
    pub fn can_transition_to(self, to: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, to),
            (Idle, Probing)
                | (Probing, Recording | Idle | Error)
                | (Recording, Idle | Error)
                | (Error, Idle)
        )
    }

    /// Probing and Recording channels hold a worker slot.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Probing | Self::Recording)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Probing => "probing",
            Self::Recording => "recording",
            Self::Error => "error",
        })
    }
}

/// A tracked channel with its runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(flatten)]
    pub config: ChannelConfig,
    pub state: ChannelState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Set only while `state == Recording`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_started_at_ms: Option<u64>,
    /// Whether the last completed probe saw the channel live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_live: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_recording: Option<PathBuf>,
    /// Start hint of an announced stream, reported once until it changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_start: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Self {
        let now = now_ms();
        Self {
            config,
            state: ChannelState::Idle,
            last_error: None,
            recording_started_at_ms: None,
            last_live: None,
            last_recording: None,
            scheduled_start: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn display_name(&self) -> &str {
        self.config.display_name()
    }

    /// Immutable copy handed to capture backends.
    #[must_use]
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            id: self.config.id.clone(),
            display_name: self.display_name().to_string(),
            quality: self.config.quality,
        }
    }
}

/// What a capture run needs to know about its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub id: String,
    pub display_name: String,
    pub quality: Quality,
}

/// Patch for updating a channel's configuration.
///
/// `alias: Some(None)` clears the alias; in JSON that is `"alias": null`,
/// while an absent key leaves it alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPatch {
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub alias: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
}

/// Present (even if null) becomes `Some(inner)`; absent stays `None` through
/// `#[serde(default)]`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

impl ChannelPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alias.is_none() && self.quality.is_none()
    }

    pub fn apply(&self, config: &mut ChannelConfig) {
        if let Some(alias) = &self.alias {
            config.alias = alias.clone();
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
    }
}

/// Persisted form of a channel: configuration plus bookkeeping timestamps.
/// Runtime state is never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChannel {
    #[serde(flatten)]
    pub config: ChannelConfig,
    #[serde(default)]
    pub created_at_ms: u64,
    #[serde(default)]
    pub updated_at_ms: u64,
}

impl From<&Channel> for StoredChannel {
    fn from(ch: &Channel) -> Self {
        Self {
            config: ch.config.clone(),
            created_at_ms: ch.created_at_ms,
            updated_at_ms: ch.updated_at_ms,
        }
    }
}

impl From<StoredChannel> for Channel {
    fn from(stored: StoredChannel) -> Self {
        let mut ch = Channel::new(stored.config);
        if stored.created_at_ms > 0 {
            ch.created_at_ms = stored.created_at_ms;
        }
        if stored.updated_at_ms > 0 {
            ch.updated_at_ms = stored.updated_at_ms;
        }
        ch
    }
}

/// Summary status of the recorder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStatus {
    pub running: bool,
    pub channel_count: usize,
    pub recording_count: usize,
    pub error_count: usize,
    pub pool_capacity: usize,
    pub pool_running: usize,
    pub pool_queued: usize,
    pub cycles_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_started_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_scan_at_ms: Option<u64>,
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
