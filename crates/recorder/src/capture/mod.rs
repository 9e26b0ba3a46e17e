//! Probe-then-record capture of one channel.
//!
//! [`CaptureBackend`] is the seam to the external tools: it probes a channel
//! for a live stream and records a chosen format to a file. [`CaptureAdapter`]
//! drives one backend invocation end to end: probe watchdog, format
//! selection, output path and mapping of the result to an [`Outcome`].

pub mod format;
pub mod process;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    chrono::Local,
    streamsaver_config::{Quality, StreamSaverConfig},
    thiserror::Error,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

pub use {format::select_format, process::ProcessBackend};

use crate::types::ChannelSnapshot;

/// One downloadable rendition of a live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub format_id: String,
    pub height: Option<u32>,
}

impl StreamFormat {
    pub fn new(format_id: impl Into<String>, height: Option<u32>) -> Self {
        Self {
            format_id: format_id.into(),
            height,
        }
    }
}

/// Result of probing a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub live: bool,
    pub title: Option<String>,
    /// Page or manifest URL to hand to the recorder.
    pub url: Option<String>,
    /// Available formats, highest-ranked first.
    pub formats: Vec<StreamFormat>,
    /// Start hint for a scheduled but not yet started stream.
    pub scheduled: Option<String>,
}

impl ProbeReport {
    pub fn offline() -> Self {
        Self::default()
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("requested quality {requested} not offered (available: {})", format_heights(.available))]
    FormatUnavailable {
        requested: Quality,
        available: Vec<u32>,
    },

    #[error("failed to start {program}: {source}")]
    ProcessSpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}{}", exit_label(.code), diagnostics_suffix(.diagnostics))]
    ProcessFailure {
        program: String,
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("probe timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("unreadable probe output: {message}")]
    ProbeParse { message: String },

    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_heights(heights: &[u32]) -> String {
    if heights.is_empty() {
        return "none".into();
    }
    heights
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "a signal".into(),
    }
}

fn diagnostics_suffix(diagnostics: &str) -> String {
    match diagnostics.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => format!(": {}", last.trim()),
        None => String::new(),
    }
}

/// How a record call ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEnd {
    /// The stream ended and both tools exited cleanly.
    Completed,
    /// The cancel token fired; the pipeline was terminated.
    Cancelled,
}

/// Everything a backend needs to record one stream.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub channel: ChannelSnapshot,
    pub url: String,
    pub format: StreamFormat,
    pub output: PathBuf,
}

/// External probe/record tooling.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Ask the platform whether the channel is live. Dropping the returned
    /// future must stop any spawned process.
    async fn probe(&self, channel: &ChannelSnapshot) -> Result<ProbeReport, CaptureError>;

    /// Record until the stream ends or `cancel` fires.
    async fn record(
        &self,
        request: &RecordRequest,
        cancel: CancellationToken,
    ) -> Result<RecordEnd, CaptureError>;
}

/// Final result of one capture run.
#[derive(Debug)]
pub enum Outcome {
    /// Not live; `scheduled` carries the start hint of an upcoming stream.
    NotLive { scheduled: Option<String> },
    Recorded { path: PathBuf, duration: Duration },
    Failed(CaptureError),
    Cancelled,
}

/// Details of a live stream about to be recorded.
#[derive(Debug, Clone)]
pub struct LiveCapture {
    pub title: Option<String>,
    pub format: StreamFormat,
    pub path: PathBuf,
}

/// Adapter settings resolved from the config.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub records_dir: PathBuf,
    pub container: String,
    pub probe_timeout: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &StreamSaverConfig) -> Self {
        Self {
            records_dir: config.recorder.records_dir.clone(),
            container: config.recorder.container.trim().to_string(),
            probe_timeout: config.probe_timeout(),
        }
    }
}

/// Runs probe-then-record against a backend.
pub struct CaptureAdapter {
    backend: Arc<dyn CaptureBackend>,
    settings: CaptureSettings,
}

impl CaptureAdapter {
    pub fn new(backend: Arc<dyn CaptureBackend>, settings: CaptureSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Probe `channel` and, when live, record it.
    ///
    /// `on_live` runs after the format is resolved and the output directory
    /// exists, right before recording starts. Returning `false` aborts the run
    /// with [`Outcome::Cancelled`].
    pub async fn run<F>(
        &self,
        channel: &ChannelSnapshot,
        cancel: CancellationToken,
        on_live: F,
    ) -> Outcome
    where
        F: FnOnce(&LiveCapture) -> bool + Send,
    {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let limit = self.settings.probe_timeout;
        let probed = tokio::select! {
            () = cancel.cancelled() => return Outcome::Cancelled,
            res = tokio::time::timeout(limit, self.backend.probe(channel)) => res,
        };
        let report = match probed {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => return Outcome::Failed(e),
            Err(_) => return Outcome::Failed(CaptureError::Timeout { after: limit }),
        };
        if !report.live {
            return Outcome::NotLive {
                scheduled: report.scheduled,
            };
        }

        let format = match select_format(channel.quality, &report.formats) {
            Ok(f) => f,
            Err(e) => return Outcome::Failed(e),
        };
        debug!(
            channel = %channel.id,
            format = %format.format_id,
            height = ?format.height,
            "format selected"
        );

        let path = match self.prepare_output(channel, report.title.as_deref()) {
            Ok(p) => p,
            Err(e) => return Outcome::Failed(e.into()),
        };
        let live = LiveCapture {
            title: report.title.clone(),
            format: format.clone(),
            path: path.clone(),
        };
        if !on_live(&live) {
            return Outcome::Cancelled;
        }

        let request = RecordRequest {
            channel: channel.clone(),
            url: report.url.unwrap_or_default(),
            format,
            output: path.clone(),
        };
        let started = Instant::now();
        match self.backend.record(&request, cancel).await {
            Ok(RecordEnd::Completed) => Outcome::Recorded {
                path,
                duration: started.elapsed(),
            },
            Ok(RecordEnd::Cancelled) => Outcome::Cancelled,
            Err(e) => Outcome::Failed(e),
        }
    }

    /// Create `<records>/<channel>/` and pick a fresh file name in it.
    fn prepare_output(
        &self,
        channel: &ChannelSnapshot,
        title: Option<&str>,
    ) -> std::io::Result<PathBuf> {
        let dir = self
            .settings
            .records_dir
            .join(sanitize_file_name(&channel.display_name));
        std::fs::create_dir_all(&dir)?;
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        Ok(unique_path(
            &dir,
            &recording_stem(&stamp, title),
            &self.settings.container,
        ))
    }
}

fn recording_stem(stamp: &str, title: Option<&str>) -> String {
    match title.map(sanitize_file_name) {
        Some(t) if !t.is_empty() => format!("{stamp}_{t}"),
        _ => stamp.to_string(),
    }
}

fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

const MAX_FILE_NAME_CHARS: usize = 120;

/// Make `name` safe as a single path component on common file systems.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "_".into()
    } else {
        trimmed.to_string()
    }
}
