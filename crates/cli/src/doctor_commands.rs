//! `streamsaver doctor`: config validation, tool discovery and storage audit.
//!
//! Runs a series of checks against the local installation and prints a
//! structured report with `[ok]`, `[warn]`, `[fail]` or `[info]` status
//! indicators per item.

use std::path::Path;

use {
    anyhow::Result,
    streamsaver_config::{
        Diagnostic, Severity, StreamSaverConfig, validate::validate, validate_channels,
    },
    streamsaver_recorder::{
        capture::process::check_tools, store::ChannelStore, store_file::FileStore,
    },
};

// ── ANSI helpers ────────────────────────────────────────────────────────────

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
    Info,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Info => "info",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Ok => GREEN,
            Self::Warn => YELLOW,
            Self::Fail => RED,
            Self::Info => CYAN,
        }
    }

    fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Error => Self::Fail,
            Severity::Warning => Self::Warn,
            Severity::Info => Self::Info,
        }
    }
}

struct CheckItem {
    status: Status,
    message: String,
}

struct Section {
    title: String,
    items: Vec<CheckItem>,
}

impl Section {
    fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push(CheckItem {
            status,
            message: message.into(),
        });
    }

    fn push_diagnostic(&mut self, d: &Diagnostic) {
        let msg = if d.path.is_empty() {
            d.message.clone()
        } else {
            format!("{}: {}", d.path, d.message)
        };
        self.push(Status::from_severity(d.severity), msg);
    }
}

// ── Printing ────────────────────────────────────────────────────────────────

fn print_report(sections: &[Section]) -> (usize, usize) {
    let mut errors = 0usize;
    let mut warnings = 0usize;

    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for item in &section.items {
            let color = item.status.color();
            let label = item.status.label();
            eprintln!("  [{color}{label}{RESET}]  {}", item.message);
            match item.status {
                Status::Fail => errors += 1,
                Status::Warn => warnings += 1,
                _ => {},
            }
        }
        eprintln!();
    }

    (errors, warnings)
}

// ── Entry point ─────────────────────────────────────────────────────────────

pub async fn handle_doctor(config_path: Option<&Path>) -> Result<()> {
    eprintln!("{BOLD}streamsaver doctor{RESET}");
    eprintln!("{BOLD}=================={RESET}\n");

    let mut sections = vec![check_config(config_path)];

    // Later checks need a config; fall back to defaults when it is unreadable.
    let config = crate::resolve_config(config_path).unwrap_or_default();

    sections.push(check_external_tools(&config));
    sections.push(check_storage(&config).await);

    let (errors, warnings) = print_report(&sections);

    eprintln!("{BOLD}Summary:{RESET} {errors} error(s), {warnings} warning(s)");

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

// ── Config validation ───────────────────────────────────────────────────────

fn check_config(config_path: Option<&Path>) -> Section {
    let result = validate(config_path);
    let label = result
        .config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".into());
    let mut section = Section::new(format!("Config ({label})"));

    let syntax: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.category == "syntax")
        .collect();
    if !syntax.is_empty() {
        for d in syntax {
            section.push(Status::Fail, format!("syntax: {}", d.message));
        }
        return section;
    }
    section.push(Status::Ok, "Syntax valid");

    let unknown = result
        .diagnostics
        .iter()
        .filter(|d| d.category == "unknown-field")
        .count();
    if unknown == 0 {
        section.push(Status::Ok, "All fields recognized");
    }

    for d in result
        .diagnostics
        .iter()
        .filter(|d| d.category != "syntax" && d.severity != Severity::Info)
    {
        section.push_diagnostic(d);
    }
    section
}

// ── External tools ──────────────────────────────────────────────────────────

fn check_external_tools(config: &StreamSaverConfig) -> Section {
    let mut section = Section::new("External tools");
    for tool in check_tools(&config.tools) {
        match tool.resolved {
            Some(path) => section.push(
                Status::Ok,
                format!("{} ({}) -> {}", tool.name, tool.command, path.display()),
            ),
            None => section.push(
                Status::Fail,
                format!(
                    "{} ({}) not found on PATH; probes and recordings will fail",
                    tool.name, tool.command
                ),
            ),
        }
    }
    if let Some(browser) = &config.tools.cookies_from_browser {
        section.push(Status::Info, format!("cookies borrowed from {browser}"));
    }
    section
}

// ── Storage ─────────────────────────────────────────────────────────────────

async fn check_storage(config: &StreamSaverConfig) -> Section {
    let mut section = Section::new("Storage");

    let records = &config.recorder.records_dir;
    if records.is_dir() {
        let probe = records.join(".streamsaver-write-test");
        match std::fs::write(&probe, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                section.push(
                    Status::Ok,
                    format!("records dir {} is writable", records.display()),
                );
            },
            Err(e) => section.push(
                Status::Fail,
                format!("records dir {} is not writable: {e}", records.display()),
            ),
        }
    } else {
        section.push(
            Status::Info,
            format!(
                "records dir {} does not exist yet; it is created on the first recording",
                records.display()
            ),
        );
    }

    let store = FileStore::new(config.storage.channels_file.clone());
    match store.load_channels().await {
        Ok(channels) => {
            section.push(
                Status::Ok,
                format!(
                    "{} channel(s) in {}",
                    channels.len(),
                    store.path().display()
                ),
            );
            let configs: Vec<_> = channels.into_iter().map(|c| c.config).collect();
            for d in validate_channels(&configs) {
                section.push_diagnostic(&d);
            }
        },
        Err(e) => section.push(Status::Fail, format!("channels file: {e}")),
    }
    section
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_reports_duplicates_and_missing_records_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let channels = tmp.path().join("channels.json");
        std::fs::write(&channels, r#"[{"id":"a"},{"id":"a"}]"#).unwrap();

        let mut config = StreamSaverConfig::default();
        config.storage.channels_file = channels;
        config.recorder.records_dir = tmp.path().join("missing");

        let section = check_storage(&config).await;
        let statuses: Vec<Status> = section.items.iter().map(|i| i.status).collect();
        assert_eq!(statuses, [Status::Info, Status::Ok, Status::Fail]);
        assert!(section.items[2].message.contains("duplicate"));
    }

    #[test]
    fn missing_tool_fails() {
        let mut config = StreamSaverConfig::default();
        config.tools.ffmpeg = "definitely-not-a-real-binary-xyz".into();
        let section = check_external_tools(&config);
        assert!(
            section
                .items
                .iter()
                .any(|i| i.status == Status::Fail && i.message.contains("ffmpeg"))
        );
    }
}
