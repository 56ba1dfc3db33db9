//! Configuration module for strmsync.
//!
//! Typed configuration structs that map to the YAML configuration file,
//! with loading, validation and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for strmsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub rate_limiting: RateLimitingConfig,
    pub drive115: Drive115Config,
    pub openlist: OpenListConfig,
    pub logging: LoggingConfig,
}

/// Traversal and file acceptance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of traversal workers.
    pub workers: usize,
    /// Attempts per directory listing before the run fails.
    pub max_attempts: u32,
    /// Delay between listing attempts (milliseconds).
    pub retry_delay_ms: u64,
    /// Root of the local mirror tree.
    pub local_root: PathBuf,
    /// Names (or glob patterns) skipped during traversal.
    pub exclude_names: Vec<String>,
    /// Media files smaller than this (in MiB) are rejected.
    pub min_file_size_mb: u64,
    /// Extensions treated as media, with leading dot.
    pub media_extensions: Vec<String>,
    /// Extensions treated as metadata sidecars, with leading dot.
    pub metadata_extensions: Vec<String>,
}

/// Request quota, throttle and executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    pub per_second: u32,
    pub per_minute: u32,
    pub per_hour: u32,
    /// Capacity of the bounded request queue.
    pub queue_capacity: usize,
    /// Seconds the throttle gate stays closed after a rejection.
    pub throttle_cooldown_secs: u64,
    /// Polling interval while waiting for the gate (milliseconds).
    pub throttle_poll_ms: u64,
    /// Adapter-local sleep after a "frequency too high" page (seconds).
    pub frequency_backoff_secs: u64,
    /// Number of request records kept for statistics.
    pub stats_window: usize,
    /// Per-request timeout (seconds).
    pub request_timeout_secs: u64,
    /// Whether quota-bypassing requests still wait for the throttle gate.
    pub bypass_waits_for_throttle: bool,
}

/// Pick-code cloud drive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Drive115Config {
    pub base_url: String,
    /// Entries per listing page.
    pub page_size: u32,
    /// Base URL written into emitted references.
    pub strm_base_url: String,
    pub user_id: String,
    /// `None` until a credential flow provides one.
    pub access_token: Option<String>,
}

/// Path-addressed cloud drive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenListConfig {
    pub base_url: String,
    pub page_size: u32,
    pub token: Option<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/strmsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("strmsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_attempts: 3,
            retry_delay_ms: 2000,
            local_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("strm"),
            exclude_names: vec![
                "@eaDir".to_string(),
                ".*".to_string(),
                "#recycle".to_string(),
            ],
            min_file_size_mb: 0,
            media_extensions: [".mkv", ".mp4", ".avi", ".ts", ".iso", ".mov", ".rmvb", ".flac"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            metadata_extensions: [".nfo", ".jpg", ".png", ".srt", ".ass", ".sub"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            per_second: 3,
            per_minute: 150,
            per_hour: 4000,
            queue_capacity: 100,
            throttle_cooldown_secs: 60,
            throttle_poll_ms: 500,
            frequency_backoff_secs: 30,
            stats_window: 1000,
            request_timeout_secs: 30,
            bypass_waits_for_throttle: true,
        }
    }
}

impl Default for Drive115Config {
    fn default() -> Self {
        Self {
            base_url: "https://proapi.115.com".to_string(),
            page_size: DRIVE115_MAX_PAGE_SIZE,
            strm_base_url: "http://127.0.0.1:12333".to_string(),
            user_id: String::new(),
            access_token: None,
        }
    }
}

impl Default for OpenListConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5244".to_string(),
            page_size: 200,
            token: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.workers"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Largest listing page the pick-code drive serves.
pub const DRIVE115_MAX_PAGE_SIZE: u32 = 1150;

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn require_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

fn require_url(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        errors.push(ValidationError {
            field: field.into(),
            message: format!("must be an http(s) URL, got '{value}'"),
        });
    }
}

fn require_extensions(errors: &mut Vec<ValidationError>, field: &str, values: &[String]) {
    for ext in values {
        if !ext.starts_with('.') || ext.len() < 2 {
            errors.push(ValidationError {
                field: field.into(),
                message: format!("extension must start with '.': '{ext}'"),
            });
        }
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        require_positive(&mut errors, "sync.workers", self.sync.workers as u64);
        require_positive(&mut errors, "sync.max_attempts", self.sync.max_attempts as u64);
        for pattern in &self.sync.exclude_names {
            if let Err(err) = glob::Pattern::new(pattern) {
                errors.push(ValidationError {
                    field: "sync.exclude_names".into(),
                    message: format!("invalid pattern '{pattern}': {err}"),
                });
            }
        }
        require_extensions(&mut errors, "sync.media_extensions", &self.sync.media_extensions);
        require_extensions(
            &mut errors,
            "sync.metadata_extensions",
            &self.sync.metadata_extensions,
        );

        // --- rate_limiting ---
        let rl = &self.rate_limiting;
        require_positive(&mut errors, "rate_limiting.per_second", rl.per_second as u64);
        require_positive(&mut errors, "rate_limiting.per_minute", rl.per_minute as u64);
        require_positive(&mut errors, "rate_limiting.per_hour", rl.per_hour as u64);
        require_positive(&mut errors, "rate_limiting.queue_capacity", rl.queue_capacity as u64);
        require_positive(&mut errors, "rate_limiting.throttle_poll_ms", rl.throttle_poll_ms);
        require_positive(&mut errors, "rate_limiting.stats_window", rl.stats_window as u64);
        require_positive(
            &mut errors,
            "rate_limiting.request_timeout_secs",
            rl.request_timeout_secs,
        );
        if rl.per_minute < rl.per_second {
            errors.push(ValidationError {
                field: "rate_limiting.per_minute".into(),
                message: "must not be lower than per_second".into(),
            });
        }
        if rl.per_hour < rl.per_minute {
            errors.push(ValidationError {
                field: "rate_limiting.per_hour".into(),
                message: "must not be lower than per_minute".into(),
            });
        }

        // --- backends ---
        require_url(&mut errors, "drive115.base_url", &self.drive115.base_url);
        require_url(&mut errors, "drive115.strm_base_url", &self.drive115.strm_base_url);
        require_positive(&mut errors, "drive115.page_size", self.drive115.page_size as u64);
        if self.drive115.page_size > DRIVE115_MAX_PAGE_SIZE {
            errors.push(ValidationError {
                field: "drive115.page_size".into(),
                message: format!("must not exceed {DRIVE115_MAX_PAGE_SIZE}"),
            });
        }
        require_url(&mut errors, "openlist.base_url", &self.openlist.base_url);
        require_positive(&mut errors, "openlist.page_size", self.openlist.page_size as u64);

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}
