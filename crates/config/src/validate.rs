//! Configuration validation engine.
//!
//! Validates TOML configuration files against the known schema, detects
//! unknown/misspelled fields, and reports values the recorder cannot run with.

use std::{collections::HashMap, path::Path};

use crate::schema::{ChannelConfig, StreamSaverConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "value", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "scanner.idle_interval_minutes"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Represents the expected shape of the configuration schema.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// Scalar value, stop recursion.
    Leaf,
}

fn leaves(names: &[&'static str]) -> KnownKeys {
    KnownKeys::Struct(names.iter().map(|n| (*n, KnownKeys::Leaf)).collect())
}

/// Build the full schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    KnownKeys::Struct(HashMap::from([
        (
            "tools",
            leaves(&["ffmpeg", "stream_tool", "cookies_from_browser", "user_agent"]),
        ),
        (
            "scanner",
            leaves(&[
                "idle_interval_minutes",
                "cycle_anchor",
                "channel_url_template",
                "probe_timeout_secs",
            ]),
        ),
        (
            "recorder",
            leaves(&[
                "max_concurrent_downloads",
                "records_dir",
                "container",
                "termination_grace_secs",
            ]),
        ),
        ("storage", leaves(&["channels_file"])),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = if ca == cb {
                0
            } else {
                1
            };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Find the best match for `needle` among `candidates` using Levenshtein
/// distance. Returns `Some(best)` if the distance is <= `max_distance`.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = if let Some(p) = path {
        Some(p.to_path_buf())
    } else {
        crate::loader::find_config_file()
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");

    let mut result = if is_toml {
        match std::fs::read_to_string(actual_path) {
            Ok(content) => {
                let expanded = crate::env_subst::expand_env(&content);
                let mut result = validate_toml_str(&expanded.text);
                result
                    .diagnostics
                    .extend(expanded.unresolved.into_iter().map(|name| Diagnostic {
                        severity: Severity::Warning,
                        category: "value",
                        path: String::new(),
                        message: format!("environment variable {name} is not set"),
                    }));
                result
            },
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    category: "syntax",
                    path: String::new(),
                    message: format!("failed to read config file: {e}"),
                }],
                config_path: None,
            },
        }
    } else {
        // YAML / JSON: no unknown-field walk, semantic checks only.
        match crate::loader::load_config(actual_path) {
            Ok(config) => ValidationResult {
                diagnostics: validate_config(&config),
                config_path: None,
            },
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    category: "type-error",
                    path: String::new(),
                    message: format!("{e:#}"),
                }],
                config_path: None,
            },
        }
    };
    result.config_path = Some(actual_path.clone());
    result
}

/// Validate a TOML string without file-system side effects.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax: parse raw TOML
    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields: walk the TOML tree against KnownKeys
    let schema = build_schema_map();
    check_unknown_fields(&toml_value, &schema, "", &mut diagnostics);

    // 3. Type check, then semantic checks on the parsed config
    match toml::from_str::<StreamSaverConfig>(toml_str) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Walk the TOML value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        // Leaf or type mismatch: stop recursion (type errors caught later)
        return;
    };
    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let level = if prefix.is_empty() {
            "at top level "
        } else {
            ""
        };
        let msg = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field {level}(did you mean \"{s}\"?)"),
            None => format!("unknown field {level}"),
        };
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "unknown-field",
            path,
            message: msg.trim().to_string(),
        });
    }
}

/// Semantic checks on a parsed config.
#[must_use]
pub fn validate_config(config: &StreamSaverConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut push = |severity, path: &str, message: String| {
        diagnostics.push(Diagnostic {
            severity,
            category: "value",
            path: path.into(),
            message,
        });
    };

    if config.recorder.max_concurrent_downloads == 0 {
        push(
            Severity::Error,
            "recorder.max_concurrent_downloads",
            "must be at least 1".into(),
        );
    }

    let minutes = config.scanner.idle_interval_minutes;
    if !minutes.is_finite() || minutes < 0.0 {
        push(
            Severity::Error,
            "scanner.idle_interval_minutes",
            format!("must be a non-negative number, got {minutes}"),
        );
    } else if minutes == 0.0 {
        push(
            Severity::Warning,
            "scanner.idle_interval_minutes",
            "0 disables throttling between scan cycles; the platform may rate-limit probes"
                .into(),
        );
    }

    if config.tools.stream_tool.split_whitespace().next().is_none() {
        push(
            Severity::Error,
            "tools.stream_tool",
            "stream tool command is empty".into(),
        );
    }
    if config.tools.ffmpeg.trim().is_empty() {
        push(Severity::Error, "tools.ffmpeg", "ffmpeg path is empty".into());
    }

    if !config.scanner.channel_url_template.contains("{id}") {
        push(
            Severity::Error,
            "scanner.channel_url_template",
            "template must contain the {id} placeholder".into(),
        );
    }

    if config.scanner.probe_timeout_secs == 0 {
        push(
            Severity::Error,
            "scanner.probe_timeout_secs",
            "probe watchdog must be at least 1 second".into(),
        );
    }

    let container = config.recorder.container.trim();
    if container.is_empty() || container.contains(['/', '\\', '.']) {
        push(
            Severity::Error,
            "recorder.container",
            format!("invalid container extension \"{container}\""),
        );
    }

    if config.recorder.termination_grace_secs == 0 {
        push(
            Severity::Info,
            "recorder.termination_grace_secs",
            "recordings are killed immediately on stop; the last segment may be truncated".into(),
        );
    }

    let ffmpeg = Path::new(&config.tools.ffmpeg);
    if ffmpeg.components().count() > 1 && !ffmpeg.exists() {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "file-ref",
            path: "tools.ffmpeg".into(),
            message: format!("file not found: {}", ffmpeg.display()),
        });
    }

    diagnostics
}

/// Check a channel list: ids must be non-empty and unique after trimming.
pub fn validate_channels(channels: &[ChannelConfig]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (i, channel) in channels.iter().enumerate() {
        let id = channel.id.trim();
        let path = format!("channels[{i}].id");
        if id.is_empty() {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "value",
                path,
                message: "channel id is empty".into(),
            });
            continue;
        }
        if let Some(&first) = seen.get(id) {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "value",
                path,
                message: format!("duplicate channel id \"{id}\" (first at channels[{first}])"),
            });
        } else {
            seen.insert(id, i);
        }
    }
    diagnostics
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("", ""), 0);
    }

    #[test]
    fn levenshtein_single_edit() {
        assert_eq!(levenshtein("scanner", "scaner"), 1);
        assert_eq!(levenshtein("ffmpeg", "ffmpg"), 1);
    }

    #[test]
    fn default_config_is_clean() {
        let result = validate_toml_str("");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = validate_toml_str("[scaner]\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field" && d.path == "scaner")
            .expect("expected unknown-field diagnostic for 'scaner'");
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("scanner"), "{}", d.message);
    }

    #[test]
    fn unknown_nested_key_with_suggestion() {
        let toml = r#"
[recorder]
max_concurent_downloads = 3
"#;
        let result = validate_toml_str(toml);
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.path == "recorder.max_concurent_downloads")
            .expect("expected unknown-field diagnostic");
        assert!(d.message.contains("max_concurrent_downloads"));
    }

    #[test]
    fn duplicate_channel_ids_are_errors() {
        let channels = vec![
            ChannelConfig::new("a"),
            ChannelConfig::new(" b "),
            ChannelConfig::new("b"),
            ChannelConfig::new(""),
        ];
        let diags = validate_channels(&channels);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].path, "channels[2].id");
        assert!(diags[0].message.contains("channels[1]"));
        assert_eq!(diags[1].path, "channels[3].id");
        assert!(validate_channels(&channels[..2]).is_empty());
    }

    #[test]
    fn zero_concurrency_is_an_error() {
        let result = validate_toml_str("[recorder]\nmax_concurrent_downloads = 0\n");
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "recorder.max_concurrent_downloads")
        );
    }

    #[test]
    fn negative_interval_is_an_error_zero_is_a_warning() {
        let negative = validate_toml_str("[scanner]\nidle_interval_minutes = -2.0\n");
        assert!(negative.has_errors());

        let zero = validate_toml_str("[scanner]\nidle_interval_minutes = 0.0\n");
        assert!(!zero.has_errors());
        assert_eq!(zero.count(Severity::Warning), 1);
    }

    #[test]
    fn url_template_requires_placeholder() {
        let result =
            validate_toml_str("[scanner]\nchannel_url_template = \"https://example.com/live\"\n");
        assert!(result.has_errors());
    }

    #[test]
    fn type_error_is_reported() {
        let result = validate_toml_str("[recorder]\nmax_concurrent_downloads = \"two\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn syntax_error_short_circuits() {
        let result = validate_toml_str("[recorder\n");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn validate_missing_file_reports_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = validate(Some(&dir.path().join("nope.toml")));
        assert!(result.has_errors());
        assert!(result.config_path.is_some());
    }

    #[test]
    fn unset_env_var_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamsaver.toml");
        std::fs::write(
            &path,
            "[tools]\nffmpeg = \"${STREAMSAVER_UNSET_FFMPEG_9F2C}\"\n\
             stream_tool = \"${STREAMSAVER_UNSET_TOOL_9F2C:-yt-dlp}\"\n",
        )
        .unwrap();
        let result = validate(Some(&path));
        let warnings: Vec<_> = result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .map(|d| d.message.as_str())
            .collect();
        assert_eq!(warnings, [
            "environment variable STREAMSAVER_UNSET_FFMPEG_9F2C is not set"
        ]);
    }
}
