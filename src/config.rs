//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::index::RetryPolicy;
use crate::plan::ChannelPreference;
use crate::sources::Credential;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub waveform: WaveformConfig,

    #[serde(default)]
    pub event: EventConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub credentials: Vec<Credential>,
}

/// Archive tree configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_root")]
    pub root: String,
}

fn default_archive_root() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("seisarc").join("archive").to_string_lossy().to_string())
        .unwrap_or_else(|| "./seisarc_archive".to_string())
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: default_archive_root(),
        }
    }
}

/// Availability index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_jitter")]
    pub retry_jitter_ms: u64,
}

fn default_index_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("seisarc").join("index.sqlite").to_string_lossy().to_string())
        .unwrap_or_else(|| "./seisarc_index.sqlite".to_string())
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    100
}

fn default_retry_jitter() -> u64 {
    100
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_jitter_ms: default_retry_jitter(),
        }
    }
}

impl IndexConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: std::time::Duration::from_millis(self.retry_base_delay_ms),
            jitter: std::time::Duration::from_millis(self.retry_jitter_ms),
        }
    }
}

/// What to download
#[derive(Debug, Clone, Deserialize)]
pub struct WaveformConfig {
    /// "continuous" or "event"
    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default = "default_networks")]
    pub networks: String,

    #[serde(default = "default_wildcard")]
    pub stations: String,

    #[serde(default = "default_wildcard")]
    pub locations: String,

    #[serde(default = "default_channels")]
    pub channels: String,

    /// Range start, RFC 3339. Required for a run; no sensible default.
    pub start: Option<String>,

    /// Range end, RFC 3339.
    pub end: Option<String>,

    #[serde(default = "default_window_days")]
    pub window_days: i64,

    #[serde(default = "default_min_window")]
    pub min_window_secs: i64,
}

fn default_mode() -> String {
    "continuous".to_string()
}

fn default_networks() -> String {
    "IU".to_string()
}

fn default_wildcard() -> String {
    "*".to_string()
}

fn default_channels() -> String {
    "?H?".to_string()
}

fn default_window_days() -> i64 {
    1
}

fn default_min_window() -> i64 {
    30
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            networks: default_networks(),
            stations: default_wildcard(),
            locations: default_wildcard(),
            channels: default_channels(),
            start: None,
            end: None,
            window_days: default_window_days(),
            min_window_secs: default_min_window(),
        }
    }
}

/// Event-mode selection and windowing
#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_min_magnitude")]
    pub min_magnitude: f64,

    #[serde(default)]
    pub min_radius_deg: f64,

    #[serde(default = "default_max_radius")]
    pub max_radius_deg: f64,

    #[serde(default = "default_before_p")]
    pub seconds_before_p: f64,

    #[serde(default = "default_after_p")]
    pub seconds_after_p: f64,

    /// Keep only each station's highest-sample-rate channels.
    #[serde(default)]
    pub highest_samplerate_only: bool,
}

fn default_min_magnitude() -> f64 {
    5.5
}

fn default_max_radius() -> f64 {
    90.0
}

fn default_before_p() -> f64 {
    20.0
}

fn default_after_p() -> f64 {
    160.0
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            min_magnitude: default_min_magnitude(),
            min_radius_deg: 0.0,
            max_radius_deg: default_max_radius(),
            seconds_before_p: default_before_p(),
            seconds_after_p: default_after_p(),
            highest_samplerate_only: false,
        }
    }
}

/// Pipeline behavior
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Re-download even where the index says the data exists.
    #[serde(default)]
    pub force_redownload: bool,

    /// Sleep between fetches, milliseconds.
    #[serde(default = "default_pacing")]
    pub pacing_ms: u64,

    /// Gap tolerance for index compaction, seconds.
    #[serde(default = "default_gap_tolerance")]
    pub gap_tolerance_secs: i64,

    /// Channel band preference, best first.
    #[serde(default = "default_channel_pref")]
    pub channel_preference: Vec<String>,

    /// Location code preference, best first.
    #[serde(default = "default_location_pref")]
    pub location_preference: Vec<String>,
}

fn default_pacing() -> u64 {
    500
}

fn default_gap_tolerance() -> i64 {
    60
}

fn default_channel_pref() -> Vec<String> {
    ChannelPreference::default().bands
}

fn default_location_pref() -> Vec<String> {
    ChannelPreference::default().locations
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            force_redownload: false,
            pacing_ms: default_pacing(),
            gap_tolerance_secs: default_gap_tolerance(),
            channel_preference: default_channel_pref(),
            location_preference: default_location_pref(),
        }
    }
}

impl ProcessingConfig {
    pub fn channel_preference(&self) -> ChannelPreference {
        ChannelPreference {
            bands: self.channel_preference.clone(),
            locations: self.location_preference.clone(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("seisarc").join("config.toml")),
            Some(PathBuf::from("/etc/seisarc/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("SEISARC_ARCHIVE_ROOT") {
            self.archive.root = root;
        }
        if let Ok(path) = std::env::var("SEISARC_INDEX_PATH") {
            self.index.path = path;
        }
        if let Ok(mode) = std::env::var("SEISARC_MODE") {
            self.waveform.mode = mode;
        }
        if let Ok(level) = std::env::var("SEISARC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SEISARC_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive: ArchiveConfig::default(),
            index: IndexConfig::default(),
            waveform: WaveformConfig::default(),
            event: EventConfig::default(),
            processing: ProcessingConfig::default(),
            logging: LoggingConfig::default(),
            credentials: Vec::new(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content. Paths are resolved to the
/// platform data directory, not left as `~` shorthand the loader would
/// take literally.
pub fn generate_default_config() -> String {
    format!(
        r#"# Seisarc Configuration
#
# Environment variables override these settings:
# - SEISARC_ARCHIVE_ROOT
# - SEISARC_INDEX_PATH
# - SEISARC_MODE
# - SEISARC_LOG_LEVEL
# - SEISARC_LOG_FORMAT

[archive]
# Root of the day-file archive tree
root = '{root}'

[index]
# Availability index database
path = '{index}'

# Attempts to open a locked index before giving up
max_retries = 3

# Backoff before a retry (ms); doubles each attempt, plus jitter
retry_base_delay_ms = 100
retry_jitter_ms = 100

[waveform]
# "continuous" or "event"
mode = "continuous"

# Stream selection (comma lists and ?/* wildcards allowed)
networks = "IU"
stations = "*"
locations = "*"
channels = "?H?"

# Time range, RFC 3339
# start = "2020-01-01T00:00:00Z"
# end = "2020-02-01T00:00:00Z"

# Continuous-mode chunk length (days)
window_days = 1

# Gaps at or below this length are not re-fetched (seconds)
min_window_secs = 30

[event]
# Catalog selection
min_magnitude = 5.5

# Station distance band from the epicenter (degrees)
min_radius_deg = 0.0
max_radius_deg = 90.0

# Download window around the predicted P arrival (seconds)
seconds_before_p = 20.0
seconds_after_p = 160.0

# Keep only each station's highest-sample-rate channels
highest_samplerate_only = false

[processing]
# Re-download even where the index shows coverage
force_redownload = false

# Sleep between fetches (ms)
pacing_ms = 500

# Index compaction gap tolerance (seconds)
gap_tolerance_secs = 60

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Restricted-network credentials; repeat the block per network
# [[credentials]]
# nslc_code = "XX"
# username = ""
# password = ""
"#,
        root = default_archive_root(),
        index = default_index_path(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.waveform.mode, "continuous");
        assert_eq!(config.index.max_retries, 3);
        assert_eq!(config.processing.gap_tolerance_secs, 60);
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [archive]
            root = "/data/waves"

            [waveform]
            mode = "event"
            networks = "IU,GE"
            start = "2020-01-01T00:00:00Z"

            [[credentials]]
            nslc_code = "XX"
            username = "user"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.archive.root, "/data/waves");
        assert_eq!(config.waveform.mode, "event");
        assert_eq!(config.waveform.networks, "IU,GE");
        assert_eq!(config.waveform.window_days, 1);
        assert_eq!(config.credentials.len(), 1);
        assert_eq!(config.credentials[0].network(), "XX");
    }

    #[test]
    fn test_default_template_parses() {
        let template = generate_default_config();
        let config: Config = toml::from_str(&template).unwrap();
        assert_eq!(config.waveform.networks, "IU");
        assert_eq!(config.event.max_radius_deg, 90.0);
        assert!(!config.event.highest_samplerate_only);
    }

    #[test]
    fn test_default_template_paths_are_resolved() {
        let template = generate_default_config();
        let config: Config = toml::from_str(&template).unwrap();
        // The loader does no tilde expansion, so the template must not
        // rely on it.
        assert!(!config.archive.root.starts_with('~'));
        assert!(!config.index.path.starts_with('~'));
        assert_eq!(config.archive.root, default_archive_root());
        assert_eq!(config.index.path, default_index_path());
    }

    #[test]
    fn test_retry_policy_conversion() {
        let config = IndexConfig {
            max_retries: 5,
            retry_base_delay_ms: 50,
            retry_jitter_ms: 10,
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, std::time::Duration::from_millis(50));
    }
}
