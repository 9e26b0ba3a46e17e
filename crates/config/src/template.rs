//! Default configuration template with all options documented.
//!
//! This template is used when creating a new config file. It includes all
//! available options with descriptions, allowing users to see everything
//! that can be configured even if they don't change the defaults.

/// Generate the default config template, rooting recordings at `records_dir`.
pub fn default_config_template(records_dir: &str) -> String {
    format!(
        r##"# StreamSaver Configuration
# =========================
# This file contains all available configuration options.
# Uncomment and modify settings as needed.
# Changes require a restart to take effect.
#
# Environment variable substitution is supported: ${{ENV_VAR}}
# Example: records_dir = "${{HOME}}/Videos/streams"

# ══════════════════════════════════════════════════════════════════════════════
# TOOLS
# ══════════════════════════════════════════════════════════════════════════════
# External programs. Their presence is checked lazily, on the first probe or
# recording that needs them. Run `streamsaver doctor` to check up front.

[tools]
ffmpeg = "ffmpeg"                 # Path to ffmpeg, or a name resolved via PATH
stream_tool = "yt-dlp"            # Stream tool command line (split on spaces),
                                  #   e.g. "python3 -m yt_dlp"
# cookies_from_browser = "firefox"  # Borrow login cookies from a browser
# user_agent = "Mozilla/5.0 ..."    # Sent with the cookies (default: matches browser)

# ══════════════════════════════════════════════════════════════════════════════
# SCANNER
# ══════════════════════════════════════════════════════════════════════════════

[scanner]
idle_interval_minutes = 5.0       # Minimum gap between scan cycles (0 = 1 second)
cycle_anchor = "cycle_start"      # Measure the gap from:
                                  #   "cycle_start"    - start of the previous cycle
                                  #   "submission_end" - after all probes were queued
channel_url_template = "https://www.youtube.com/@{{id}}/live"   # {{id}} = channel id
probe_timeout_secs = 30           # Probes running longer than this fail

# ══════════════════════════════════════════════════════════════════════════════
# RECORDER
# ══════════════════════════════════════════════════════════════════════════════

[recorder]
max_concurrent_downloads = 2      # Probes + recordings running at once (>= 1)
records_dir = "{records_dir}"
container = "ts"                  # Output extension: ts, mkv, mp4, ...
termination_grace_secs = 12       # Wait this long after SIGINT before SIGKILL
                                  # (0 = kill immediately)

# ══════════════════════════════════════════════════════════════════════════════
# STORAGE
# ══════════════════════════════════════════════════════════════════════════════

[storage]
channels_file = "channels.json"   # Tracked channels (managed via `streamsaver channels`)
"##
    )
}
