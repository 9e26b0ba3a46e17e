//! Stream tool (yt-dlp compatible) + ffmpeg capture backend.
//!
//! Probing runs `<tool> -J <url>` and reads the JSON description of the live
//! page. Recording pipes `<tool> -f <format> -o - <url>` into
//! `ffmpeg -i pipe:0 -c copy <file>`. Both children run in their own process
//! group so cancellation reaches anything they spawn.

use std::{
    collections::VecDeque,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Deserialize,
    streamsaver_config::{StreamSaverConfig, ToolsConfig},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use super::{CaptureBackend, CaptureError, ProbeReport, RecordEnd, RecordRequest, StreamFormat};
use crate::types::ChannelSnapshot;

/// Marker the stream tool prints for an announced but not yet started stream.
const SCHEDULED_MARKER: &str = "live event will begin in ";

/// Diagnostics meaning "reachable, just not live right now".
const NOT_LIVE_MARKERS: &[&str] = &[
    "not currently live",
    "UserNotLive",
    "is not live",
    "HTTP Error 404",
];

/// Stderr lines kept for failure diagnostics.
const MAX_TAIL_LINES: usize = 20;

/// Longest stderr line kept, in bytes.
const MAX_LINE_BYTES: usize = 4096;

/// Max bytes of probe stderr carried in a failure.
const MAX_PROBE_DIAGNOSTICS: usize = 2000;

const FIREFOX_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
const CHROMIUM_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

pub struct ProcessBackend {
    stream_tool: String,
    ffmpeg: String,
    url_template: String,
    cookies_from_browser: Option<String>,
    user_agent: Option<String>,
    grace: Duration,
}

impl ProcessBackend {
    pub fn from_config(config: &StreamSaverConfig) -> Self {
        Self {
            stream_tool: config.tools.stream_tool.clone(),
            ffmpeg: config.tools.ffmpeg.clone(),
            url_template: config.scanner.channel_url_template.clone(),
            cookies_from_browser: config
                .tools
                .cookies_from_browser
                .clone()
                .filter(|b| !b.trim().is_empty()),
            user_agent: config
                .tools
                .user_agent
                .clone()
                .filter(|ua| !ua.trim().is_empty()),
            grace: config.termination_grace(),
        }
    }

    /// Live page URL of a channel.
    pub fn channel_url(&self, channel_id: &str) -> String {
        self.url_template.replace("{id}", channel_id)
    }

    /// The stream tool command line with cookie passthrough applied.
    fn tool_command(&self) -> Result<(String, Command), CaptureError> {
        let mut parts = self.stream_tool.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| CaptureError::Config("stream tool command is empty".into()))?
            .to_string();
        let mut cmd = Command::new(&program);
        cmd.args(parts);
        if let Some(browser) = &self.cookies_from_browser {
            let agent = self
                .user_agent
                .as_deref()
                .unwrap_or_else(|| default_user_agent(browser));
            cmd.arg("--cookies-from-browser")
                .arg(browser)
                .arg("--user-agent")
                .arg(agent);
        }
        Ok((program, cmd))
    }
}

/// Desktop user agent of the browser family cookies are borrowed from.
fn default_user_agent(browser: &str) -> &'static str {
    // yt-dlp accepts `BROWSER[+KEYRING][:PROFILE][::CONTAINER]`.
    let name = browser
        .split(['+', ':'])
        .next()
        .unwrap_or(browser)
        .trim()
        .to_ascii_lowercase();
    match name.as_str() {
        "firefox" | "librewolf" | "waterfox" => FIREFOX_USER_AGENT,
        _ => CHROMIUM_USER_AGENT,
    }
}

#[async_trait]
impl CaptureBackend for ProcessBackend {
    async fn probe(&self, channel: &ChannelSnapshot) -> Result<ProbeReport, CaptureError> {
        let url = self.channel_url(&channel.id);
        let (program, mut cmd) = self.tool_command()?;
        cmd.args(["-J", "--no-warnings", "--no-playlist"])
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);

        debug!(channel = %channel.id, %url, "probing");
        let child = cmd
            .spawn()
            .map_err(|source| CaptureError::ProcessSpawnFailure {
                program: program.clone(),
                source,
            })?;
        // The probe watchdog drops this future; take the tool's helpers down too.
        let mut group = GroupGuard::new(&child);
        let output = child.wait_with_output().await?;
        group.disarm();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            if let Some(when) = scheduled_start(&stderr) {
                return Ok(ProbeReport {
                    scheduled: Some(when),
                    ..ProbeReport::offline()
                });
            }
            if NOT_LIVE_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Ok(ProbeReport::offline());
            }
            return Err(CaptureError::ProcessFailure {
                program,
                code: output.status.code(),
                diagnostics: truncate_tail(stderr.trim(), MAX_PROBE_DIAGNOSTICS),
            });
        }

        let mut report = parse_probe_json(&output.stdout)?;
        if report.live && report.url.is_none() {
            report.url = Some(url);
        }
        Ok(report)
    }

    async fn record(
        &self,
        request: &RecordRequest,
        cancel: CancellationToken,
    ) -> Result<RecordEnd, CaptureError> {
        let tail = Arc::new(Mutex::new(VecDeque::new()));

        let (tool_name, mut tool_cmd) = self.tool_command()?;
        tool_cmd
            .args(["--no-part", "--no-progress", "--hls-use-mpegts"])
            .args(["--retries", "10", "--socket-timeout", "10"])
            .args(["-f", request.format.format_id.as_str(), "-o", "-"])
            .arg(&request.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut tool_cmd);

        let mut tool = tool_cmd
            .spawn()
            .map_err(|source| CaptureError::ProcessSpawnFailure {
                program: tool_name.clone(),
                source,
            })?;
        let mut pumps = vec![pump_stderr(&mut tool, &tool_name, &tail)];

        let pipe: Stdio = match tool.stdout.take().map(TryInto::try_into) {
            Some(Ok(stdio)) => stdio,
            Some(Err(e)) => {
                terminate(&mut [&mut tool], Duration::ZERO).await;
                return Err(e.into());
            },
            None => {
                terminate(&mut [&mut tool], Duration::ZERO).await;
                return Err(CaptureError::Config("stream tool stdout unavailable".into()));
            },
        };

        let mut ffmpeg_cmd = Command::new(&self.ffmpeg);
        ffmpeg_cmd
            .args(["-hide_banner", "-nostdin", "-loglevel", "warning", "-stats"])
            .args(["-i", "pipe:0", "-c", "copy"])
            .arg(&request.output)
            .stdin(pipe)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut ffmpeg_cmd);

        let spawned = ffmpeg_cmd.spawn();
        // The command still holds the read end of the pipe. Close it so the
        // tool sees EPIPE once ffmpeg is gone.
        drop(ffmpeg_cmd);
        let mut ffmpeg = match spawned {
            Ok(child) => child,
            Err(source) => {
                terminate(&mut [&mut tool], Duration::ZERO).await;
                return Err(CaptureError::ProcessSpawnFailure {
                    program: self.ffmpeg.clone(),
                    source,
                });
            },
        };
        pumps.push(pump_stderr(&mut ffmpeg, &self.ffmpeg, &tail));

        info!(
            channel = %request.channel.id,
            output = %request.output.display(),
            tool_pid = ?tool.id(),
            ffmpeg_pid = ?ffmpeg.id(),
            "capture pipeline started"
        );

        let first = tokio::select! {
            status = tool.wait() => Some(FirstExit::Tool(status)),
            status = ffmpeg.wait() => Some(FirstExit::Ffmpeg(status)),
            () = cancel.cancelled() => None,
        };

        // Exit statuses in reporting order: the first failure wins.
        let mut statuses = match first {
            None => {
                terminate(&mut [&mut tool, &mut ffmpeg], self.grace).await;
                drain_pumps(pumps).await;
                return Ok(RecordEnd::Cancelled);
            },
            Some(FirstExit::Tool(tool_status)) => {
                // ffmpeg finishes on its own once the pipe hits EOF.
                let ffmpeg_status = tokio::select! {
                    status = ffmpeg.wait() => status,
                    () = cancel.cancelled() => {
                        terminate(&mut [&mut ffmpeg], self.grace).await;
                        drain_pumps(pumps).await;
                        return Ok(RecordEnd::Cancelled);
                    },
                };
                vec![
                    (&tool_name, tool_status),
                    (&self.ffmpeg, ffmpeg_status),
                ]
            },
            Some(FirstExit::Ffmpeg(ffmpeg_status)) => match tool.try_wait() {
                Ok(Some(tool_status)) => vec![
                    (&tool_name, Ok(tool_status)),
                    (&self.ffmpeg, ffmpeg_status),
                ],
                _ => {
                    debug!(
                        channel = %request.channel.id,
                        "muxer exited first, stopping stream tool"
                    );
                    terminate(&mut [&mut tool], self.grace).await;
                    vec![(&self.ffmpeg, ffmpeg_status)]
                },
            },
        };
        drain_pumps(pumps).await;
        statuses.sort_by_key(|(_, status)| status.as_ref().is_ok_and(broken_pipe));

        let diagnostics = || {
            let tail = tail.lock().unwrap_or_else(|e| e.into_inner());
            tail.iter().cloned().collect::<Vec<_>>().join("\n")
        };
        for (program, status) in statuses {
            let status = status?;
            if !status.success() {
                return Err(CaptureError::ProcessFailure {
                    program: program.clone(),
                    code: status.code(),
                    diagnostics: diagnostics(),
                });
            }
        }
        Ok(RecordEnd::Completed)
    }
}

// ── Probe parsing ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProbeJson {
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    live_status: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    formats: Vec<FormatJson>,
}

#[derive(Deserialize)]
struct FormatJson {
    format_id: String,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    vcodec: Option<String>,
}

fn parse_probe_json(stdout: &[u8]) -> Result<ProbeReport, CaptureError> {
    let parsed: ProbeJson =
        serde_json::from_slice(stdout).map_err(|e| CaptureError::ProbeParse {
            message: e.to_string(),
        })?;
    let live = parsed.is_live.unwrap_or(false) || parsed.live_status.as_deref() == Some("is_live");
    if !live {
        let scheduled = (parsed.live_status.as_deref() == Some("is_upcoming"))
            .then(|| "an announced time".to_string());
        return Ok(ProbeReport {
            scheduled,
            ..ProbeReport::offline()
        });
    }
    // The tool lists formats worst first.
    let formats = parsed
        .formats
        .into_iter()
        .rev()
        .filter(|f| f.vcodec.as_deref() != Some("none"))
        .map(|f| StreamFormat::new(f.format_id, f.height))
        .collect();
    Ok(ProbeReport {
        live,
        title: parsed.title,
        url: parsed.webpage_url,
        formats,
        scheduled: None,
    })
}

/// Start hint from "... This live event will begin in 3 hours."
fn scheduled_start(diagnostics: &str) -> Option<String> {
    let at = diagnostics.find(SCHEDULED_MARKER)?;
    let rest = &diagnostics[at + SCHEDULED_MARKER.len()..];
    let when = rest.lines().next().unwrap_or("").trim().trim_end_matches('.');
    Some(if when.is_empty() {
        "an announced time".to_string()
    } else {
        when.to_string()
    })
}

/// Keep the last `max` bytes of `s` on a char boundary.
fn truncate_tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}

// ── Process plumbing ────────────────────────────────────────────────────────

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

enum FirstExit {
    Tool(std::io::Result<ExitStatus>),
    Ffmpeg(std::io::Result<ExitStatus>),
}

/// Interrupt each child's process group, then kill whatever is still alive
/// after `grace`. A zero grace kills immediately.
///
/// The groups are always swept with SIGKILL at the end: background jobs of a
/// shell ignore SIGINT and would outlive their parent.
async fn terminate(children: &mut [&mut Child], grace: Duration) {
    let groups: Vec<u32> = children.iter().filter_map(|c| c.id()).collect();
    if !grace.is_zero() {
        for &pgid in &groups {
            signal_group(pgid, Signal::Interrupt);
        }
        let all_exited = tokio::time::timeout(grace, async {
            for child in children.iter_mut() {
                let _ = child.wait().await;
            }
        })
        .await;
        if all_exited.is_err() {
            warn!(grace_secs = grace.as_secs_f64(), "capture did not stop after interrupt, killing");
        }
    }
    for &pgid in &groups {
        signal_group(pgid, Signal::Kill);
    }
    for child in children.iter_mut() {
        let _ = child.kill().await;
    }
}

/// The stream tool dies of SIGPIPE when ffmpeg goes away first. That is
/// never the cause of a failure.
#[cfg(unix)]
fn broken_pipe(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;

    status.signal() == Some(nix::sys::signal::Signal::SIGPIPE as i32)
}

#[cfg(not(unix))]
fn broken_pipe(_status: &ExitStatus) -> bool {
    false
}

/// Kills a child's process group when dropped before [`GroupGuard::disarm`].
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(pgid, "killing abandoned process group");
            signal_group(pgid, Signal::Kill);
        }
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Interrupt,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: u32, which: Signal) {
    use nix::{
        errno::Errno,
        sys::signal::{Signal as NixSignal, killpg},
        unistd::Pid,
    };

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    let sig = match which {
        Signal::Interrupt => NixSignal::SIGINT,
        Signal::Kill => NixSignal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => {},
        Err(e) => debug!(pgid, error = %e, "killpg failed"),
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _signal: Signal) {}

/// Forward a child's stderr to `debug!` and keep the last lines in `tail`.
fn pump_stderr(
    child: &mut Child,
    program: &str,
    tail: &Arc<Mutex<VecDeque<String>>>,
) -> Option<JoinHandle<()>> {
    let stderr = child.stderr.take()?;
    let program = program.to_string();
    let tail = Arc::clone(tail);
    Some(tokio::spawn(forward_lines(stderr, program, tail)))
}

/// Progress output separates updates with `\r`; both `\r` and `\n` end a line.
async fn forward_lines(
    reader: impl AsyncRead + Unpin,
    program: String,
    tail: Arc<Mutex<VecDeque<String>>>,
) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        let consumed = match reader.fill_buf().await {
            Ok([]) | Err(_) => break,
            Ok(chunk) => {
                for &b in chunk {
                    if b == b'\n' || b == b'\r' {
                        flush_line(&mut line, &program, &tail);
                    } else if line.len() < MAX_LINE_BYTES {
                        line.push(b);
                    }
                }
                chunk.len()
            },
        };
        reader.consume(consumed);
    }
    flush_line(&mut line, &program, &tail);
}

fn flush_line(line: &mut Vec<u8>, program: &str, tail: &Mutex<VecDeque<String>>) {
    let text = String::from_utf8_lossy(line).trim().to_string();
    line.clear();
    if text.is_empty() {
        return;
    }
    debug!(target: "streamsaver::capture", program, "{text}");
    let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
    if tail.len() >= MAX_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(format!("{program}: {text}"));
}

async fn drain_pumps(pumps: Vec<Option<JoinHandle<()>>>) {
    for pump in pumps.into_iter().flatten() {
        // A grandchild may keep the pipe open; don't wait on it forever.
        let _ = tokio::time::timeout(Duration::from_secs(2), pump).await;
    }
}

// ── Tool discovery ──────────────────────────────────────────────────────────

/// Where a configured tool resolves on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCheck {
    pub name: &'static str,
    pub command: String,
    pub resolved: Option<PathBuf>,
}

/// Resolve the configured tools through `PATH`.
pub fn check_tools(tools: &ToolsConfig) -> Vec<ToolCheck> {
    let resolve = |cmd: &str| {
        cmd.split_whitespace()
            .next()
            .and_then(|program| which::which(program).ok())
    };
    vec![
        ToolCheck {
            name: "stream_tool",
            command: tools.stream_tool.clone(),
            resolved: resolve(&tools.stream_tool),
        },
        ToolCheck {
            name: "ffmpeg",
            command: tools.ffmpeg.clone(),
            resolved: resolve(&tools.ffmpeg),
        },
    ]
}
