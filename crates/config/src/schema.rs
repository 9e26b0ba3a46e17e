/// Config schema types (tools, scanner, recorder, storage, channels).
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSaverConfig {
    pub tools: ToolsConfig,
    pub scanner: ScannerConfig,
    pub recorder: RecorderConfig,
    pub storage: StorageConfig,
}

/// External executables driven by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Path to the ffmpeg binary. Required at the first recording attempt.
    pub ffmpeg: String,
    /// Command line of the stream tool (e.g. `yt-dlp` or `python -m yt_dlp`).
    /// Split on whitespace. Required at the first probe attempt.
    pub stream_tool: String,
    /// Browser to borrow cookies from (passed as `--cookies-from-browser`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies_from_browser: Option<String>,
    /// User agent sent along with borrowed cookies. Defaults to a desktop UA
    /// of the same browser family, since sites tie sessions to the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            stream_tool: "yt-dlp".into(),
            cookies_from_browser: None,
            user_agent: None,
        }
    }
}

/// Where the idle interval between scan cycles is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleAnchor {
    /// Next cycle starts `idle_interval` after the previous cycle started.
    #[default]
    CycleStart,
    /// Next cycle starts `idle_interval` after all submissions were issued.
    SubmissionEnd,
}

/// Scan loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Minimum delay between consecutive scan cycles, in minutes.
    pub idle_interval_minutes: f64,
    pub cycle_anchor: CycleAnchor,
    /// Live page of a channel. `{id}` is replaced with the channel id.
    pub channel_url_template: String,
    /// Watchdog for the probe step. A probe running longer is a timeout.
    pub probe_timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            idle_interval_minutes: 5.0,
            cycle_anchor: CycleAnchor::CycleStart,
            channel_url_template: "https://www.youtube.com/@{id}/live".into(),
            probe_timeout_secs: 30,
        }
    }
}

/// Capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Upper bound on concurrently running probes and recordings.
    pub max_concurrent_downloads: usize,
    /// Root directory; one sub-directory per channel.
    pub records_dir: PathBuf,
    /// Output container extension handed to ffmpeg (`ts`, `mkv`, ...).
    pub container: String,
    /// Grace period between the interrupt signal and a hard kill.
    /// `0` kills immediately.
    pub termination_grace_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            records_dir: PathBuf::from("records"),
            container: "ts".into(),
            termination_grace_secs: 12,
        }
    }
}

/// Persistence of the tracked channel list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding the tracked channels.
    pub channels_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            channels_file: PathBuf::from("channels.json"),
        }
    }
}

impl StreamSaverConfig {
    /// Idle interval as a duration. Negative or non-finite values clamp to zero;
    /// validation reports them separately.
    #[must_use]
    pub fn idle_interval(&self) -> Duration {
        let minutes = self.scanner.idle_interval_minutes;
        if minutes.is_finite() && minutes > 0.0 {
            Duration::from_secs_f64(minutes * 60.0)
        } else {
            Duration::ZERO
        }
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.scanner.probe_timeout_secs)
    }

    #[must_use]
    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.recorder.termination_grace_secs)
    }
}

// ── Channels ────────────────────────────────────────────────────────────────

/// Requested capture resolution.
///
/// The fixed set is ordered from highest to lowest; `Best` walks that order
/// and takes the first resolution the live stream offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawQuality", into = "String")]
pub enum Quality {
    #[default]
    Best,
    P2160,
    P1440,
    P1080,
    P720,
    P480,
    P360,
    P240,
    P144,
}

impl Quality {
    /// Fixed resolutions in descending preference order.
    pub const FIXED: [Quality; 8] = [
        Quality::P2160,
        Quality::P1440,
        Quality::P1080,
        Quality::P720,
        Quality::P480,
        Quality::P360,
        Quality::P240,
        Quality::P144,
    ];

    /// Frame height for fixed resolutions, `None` for `Best`.
    #[must_use]
    pub fn height(self) -> Option<u32> {
        match self {
            Self::Best => None,
            Self::P2160 => Some(2160),
            Self::P1440 => Some(1440),
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P480 => Some(480),
            Self::P360 => Some(360),
            Self::P240 => Some(240),
            Self::P144 => Some(144),
        }
    }

    #[must_use]
    pub fn from_height(height: u32) -> Option<Self> {
        Self::FIXED.into_iter().find(|q| q.height() == Some(height))
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.height() {
            Some(h) => write!(f, "{h}"),
            None => f.write_str("best"),
        }
    }
}

/// Error for quality strings outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownQuality(pub String);

impl fmt::Display for UnknownQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown quality '{}' (expected best, 2160, 1440, 1080, 720, 480, 360, 240 or 144)",
            self.0
        )
    }
}

impl std::error::Error for UnknownQuality {}

impl FromStr for Quality {
    type Err = UnknownQuality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("best") {
            return Ok(Self::Best);
        }
        let digits = trimmed
            .strip_suffix('p')
            .or_else(|| trimmed.strip_suffix('P'))
            .unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .ok()
            .and_then(Self::from_height)
            .ok_or_else(|| UnknownQuality(s.to_string()))
    }
}

impl From<Quality> for String {
    fn from(q: Quality) -> Self {
        q.to_string()
    }
}

/// Accepts `"best"`, `"1080"`, `"1080p"` and bare numbers (`1080`).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuality {
    Text(String),
    Number(u32),
}

impl TryFrom<RawQuality> for Quality {
    type Error = UnknownQuality;

    fn try_from(raw: RawQuality) -> Result<Self, Self::Error> {
        match raw {
            RawQuality::Text(s) => s.parse(),
            RawQuality::Number(n) => {
                Self::from_height(n).ok_or_else(|| UnknownQuality(n.to_string()))
            },
        }
    }
}

/// Per-channel configuration as persisted in the channels file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Platform tag of the channel. Immutable primary key.
    pub id: String,
    /// Readable alias, used for display and the recordings directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub quality: Quality,
}

impl ChannelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alias: None,
            quality: Quality::Best,
        }
    }

    /// Alias when set and non-empty, otherwise the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.alias
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(&self.id)
    }
}
