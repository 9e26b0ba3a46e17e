use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result, bail},
    clap::Subcommand,
    streamsaver_config::{
        Diagnostic, Severity, template::default_config_template,
        validate::{self, ValidationResult},
    },
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the resolved configuration.
    Show {
        /// Print JSON instead of TOML.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write a documented config file with every option at its default.
    Init {
        /// Where to write (defaults to the user config directory).
        path: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

pub fn handle_config(config_path: Option<&Path>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(config_path, verbose),
        ConfigAction::Show { json } => show(config_path, json),
        ConfigAction::Init { path, force } => init(path, force),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(config_path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let shown = print_diagnostics(&result.diagnostics, verbose);
    if shown > 0 {
        eprintln!();
    }
    print_summary(&result);

    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

/// Print diagnostics to stderr. Returns how many were shown.
pub(crate) fn print_diagnostics(diagnostics: &[Diagnostic], verbose: bool) -> usize {
    let mut shown = 0;
    for d in diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }
    shown
}

fn print_summary(result: &ValidationResult) {
    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }
}

fn show(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = crate::resolve_config(config_path)?;
    let rendered = if json {
        serde_json::to_string_pretty(&config)?
    } else {
        toml::to_string_pretty(&config).context("failed to render config as TOML")?
    };
    println!("{rendered}");
    Ok(())
}

fn init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(streamsaver_config::find_or_default_config_path);
    write_template(&path, force)?;
    eprintln!("Wrote {}", path.display());
    Ok(())
}

fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, default_config_template("records"))
        .with_context(|| format!("failed to write {}", path.display()))
}
