//! Gateway configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Gateway settings outside the HTTP listener.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Shared directory for disk deliveries.
    pub download_dir: PathBuf,
    pub log_dir: PathBuf,
    pub ffmpeg_path: String,
    pub ytdlp_path: String,
    /// Server-wide switch, AND-ed with the per-request flag.
    pub allow_external_mux: bool,
    /// How long a secondary transform input waits for the process to attach.
    pub transform_connect_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            log_dir: PathBuf::from("logs"),
            ffmpeg_path: "ffmpeg".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            allow_external_mux: true,
            transform_connect_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `DOWNLOAD_DIR`, `LOG_DIR`
    /// - `FFMPEG_PATH`, `YTDLP_PATH`
    /// - `ALLOW_EXTERNAL_MUX` (true/false)
    /// - `TRANSFORM_CONNECT_TIMEOUT_SECS`
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = non_empty(lookup("DOWNLOAD_DIR")) {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty(lookup("LOG_DIR")) {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(path) = non_empty(lookup("FFMPEG_PATH")) {
            config.ffmpeg_path = path;
        }
        if let Some(path) = non_empty(lookup("YTDLP_PATH")) {
            config.ytdlp_path = path;
        }
        if let Some(value) = parse_bool_var("ALLOW_EXTERNAL_MUX", lookup("ALLOW_EXTERNAL_MUX")) {
            config.allow_external_mux = value;
        }
        if let Some(secs) = parse_var::<u64>(
            "TRANSFORM_CONNECT_TIMEOUT_SECS",
            lookup("TRANSFORM_CONNECT_TIMEOUT_SECS"),
        ) && secs > 0
        {
            config.transform_connect_timeout = Duration::from_secs(secs);
        }

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a variable, warning and returning `None` on invalid input.
pub(crate) fn parse_var<T: FromStr>(name: &str, value: Option<String>) -> Option<T> {
    let value = non_empty(value)?;
    let parsed = value.parse().ok();
    if parsed.is_none() {
        warn!(name, value = %value, "Ignoring invalid configuration value");
    }
    parsed
}

/// Boolean variant of [`parse_var`] accepting [`parse_flag`] spellings.
pub(crate) fn parse_bool_var(name: &str, value: Option<String>) -> Option<bool> {
    let value = non_empty(value)?;
    let parsed = parse_flag(&value);
    if parsed.is_none() {
        warn!(name, value = %value, "Ignoring invalid configuration value");
    }
    parsed
}

/// Lenient boolean: `true/false`, `1/0`, `yes/no`, `on/off`.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
