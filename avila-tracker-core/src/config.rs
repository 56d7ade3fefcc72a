//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/avila-tracker/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/avila-tracker/` (~/.config/avila-tracker/)
//! - Data: `$XDG_DATA_HOME/avila-tracker/` (~/.local/share/avila-tracker/)
//! - State/Logs: `$XDG_STATE_HOME/avila-tracker/` (~/.local/state/avila-tracker/)
//!
//! The tracker section is resolved once and then treated as immutable: a
//! [`crate::Tracker`] takes its own copy at construction.

use crate::context::{ReadyState, StaticEnvironment};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable overriding `tracker.endpoint`
pub const ENDPOINT_ENV: &str = "AVILA_ENDPOINT";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Tracker behaviour (endpoint, site id, toggles)
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Simulated host environment used outside a browser
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tracker configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Base URL of the collection endpoint; envelopes go to `{endpoint}/api/v1/collect`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Site/tenant identifier. Nothing is transmitted without it.
    #[serde(default)]
    pub measurement_id: Option<String>,

    /// Verbose diagnostics
    #[serde(default)]
    pub debug: bool,

    /// Enable automatic page view, click, submit and scroll tracking
    #[serde(default = "default_auto_track")]
    pub auto_track: bool,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            measurement_id: None,
            debug: false,
            auto_track: default_auto_track(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TrackerConfig {
    /// Shorthand for a config with only the measurement id set
    pub fn for_site(measurement_id: impl Into<String>) -> Self {
        Self {
            measurement_id: Some(measurement_id.into()),
            ..Default::default()
        }
    }

    /// Measurement id, treating an empty string as unset
    pub fn measurement_id(&self) -> Option<&str> {
        self.measurement_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Full URL of the collect endpoint
    pub fn collect_url(&self) -> String {
        format!("{}/api/v1/collect", self.endpoint.trim_end_matches('/'))
    }

    /// Validate configuration, returning error message if invalid
    ///
    /// A missing measurement id is not a validation error: it suppresses
    /// transmission at runtime instead.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("tracker.endpoint must not be empty".to_string()));
        }
        reqwest::Url::parse(&self.endpoint).map_err(|e| {
            Error::Config(format!("tracker.endpoint is not a valid URL: {}", e))
        })?;
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "tracker.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_endpoint() -> String {
    "http://localhost:8080".to_string()
}

fn default_auto_track() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

/// Host environment facts for running outside a browser
#[derive(Debug, Deserialize, Clone)]
pub struct EnvironmentConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Screen size as `<width>x<height>`
    #[serde(default = "default_screen")]
    pub screen: String,
    /// Viewport size as `<width>x<height>`
    #[serde(default = "default_viewport")]
    pub viewport: String,
    #[serde(default)]
    pub page_title: String,
    #[serde(default = "default_page_location")]
    pub page_location: String,
    #[serde(default)]
    pub page_referrer: Option<String>,
    /// Document state when the tracker attaches; `loading` defers the page view to a `load` signal
    #[serde(default)]
    pub ready_state: ReadyState,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            language: default_language(),
            screen: default_screen(),
            viewport: default_viewport(),
            page_title: String::new(),
            page_location: default_page_location(),
            page_referrer: None,
            ready_state: ReadyState::default(),
        }
    }
}

impl EnvironmentConfig {
    /// Build a static environment from this section
    pub fn to_environment(&self) -> Result<StaticEnvironment> {
        Ok(StaticEnvironment {
            user_agent: self.user_agent.clone(),
            language: self.language.clone(),
            screen: parse_dimensions("environment.screen", &self.screen)?,
            viewport: parse_dimensions("environment.viewport", &self.viewport)?,
            ready_state: self.ready_state,
            page: crate::context::PageInfo {
                title: self.page_title.clone(),
                location: self.page_location.clone(),
                referrer: self.page_referrer.clone(),
            },
        })
    }
}

/// Parse `<width>x<height>`
fn parse_dimensions(field: &str, value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| Error::Config(format!("{} must look like 1280x720, got {:?}", field, value)))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|e| Error::Config(format!("{}: {}", field, e)))
    };
    Ok((parse(w)?, parse(h)?))
}

fn default_user_agent() -> String {
    format!("avila-tracker/{}", env!("CARGO_PKG_VERSION"))
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_screen() -> String {
    "1920x1080".to_string()
}

fn default_viewport() -> String {
    "1280x720".to_string()
}

fn default_page_location() -> String {
    "http://localhost/".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.tracker.validate()?;
        Ok(config)
    }

    /// Apply `AVILA_ENDPOINT` on top of whatever the file said
    ///
    /// The overridden endpoint is validated like one read from the file.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.override_endpoint(std::env::var(ENDPOINT_ENV).ok())
    }

    fn override_endpoint(&mut self, endpoint: Option<String>) -> Result<()> {
        let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) else {
            return Ok(());
        };
        tracing::debug!(endpoint = %endpoint, "Endpoint overridden from environment");
        self.tracker.endpoint = endpoint;
        self.tracker
            .validate()
            .map_err(|e| Error::Config(format!("{} is invalid: {}", ENDPOINT_ENV, e)))
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/avila-tracker/config.toml` (~/.config/avila-tracker/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("avila-tracker").join("config.toml")
    }

    /// Returns the data directory path (for durable identity storage)
    ///
    /// `$XDG_DATA_HOME/avila-tracker/` (~/.local/share/avila-tracker/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("avila-tracker")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/avila-tracker/` (~/.local/state/avila-tracker/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("avila-tracker")
    }

    /// Returns the durable storage database path
    ///
    /// `$XDG_DATA_HOME/avila-tracker/storage.db`
    pub fn storage_path() -> PathBuf {
        Self::data_dir().join("storage.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/avila-tracker/avila-tracker.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join(crate::logging::LOG_FILE_NAME)
    }
}
