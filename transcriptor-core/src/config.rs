//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/transcriptor/config.toml` (or an
//! explicit path) and validated once at process start. Components receive
//! the resulting [`Config`] by reference; there is no global mutable
//! configuration state.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/transcriptor/` (~/.config/transcriptor/)
//! - State/Logs: `$XDG_STATE_HOME/transcriptor/` (~/.local/state/transcriptor/)

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::validators::is_valid_guid;

/// Well-known Power Platform first-party public client id.
///
/// Enables interactive login without a dedicated app registration.
pub const DEFAULT_CLIENT_ID: &str = "51f81489-12ee-4a9e-aaae-a2591f45987d";

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

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// How the pipeline derives its output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPathStrategy {
    /// Write directly into `output_dir`.
    #[default]
    Fixed,
    /// Write into a run-scoped `output_dir/<YYYYmmdd_HHMMSS>/` subdirectory.
    Timestamped,
}

/// Main configuration struct
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Dynamics 365 organization URL (https)
    pub organization_url: String,

    /// Azure AD tenant id (GUID)
    pub tenant_id: String,

    /// Azure AD application client id
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Workstream whose conversations are eligible for retrieval (GUID)
    pub workstream_id: String,

    /// Email hint shown during interactive login
    #[serde(default)]
    pub login_hint: String,

    /// Dataverse Web API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Number of days to look back for conversations (1-365)
    #[serde(default = "default_days_to_fetch")]
    pub days_to_fetch: i64,

    /// Upper bound on conversations per run (required, 1-1000)
    pub max_conversations: Option<u32>,

    /// Maximum base64 document body size in bytes before decoding is skipped
    #[serde(default = "default_max_content_size")]
    pub max_content_size: usize,

    /// Operator-supplied access token (bypasses cache and interactive login)
    #[serde(default)]
    pub access_token: Option<String>,

    /// Path to the token cache file
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: PathBuf,

    /// Output directory for downloaded transcripts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Output directory layout (fixed vs per-run timestamped)
    #[serde(default)]
    pub output_path_strategy: OutputPathStrategy,

    /// Only fetch closed conversations
    #[serde(default)]
    pub closed_only: bool,

    /// Lookup field joining transcripts back to conversations.
    ///
    /// This is an external-system contract; confirm against the live schema
    /// rather than guessing.
    #[serde(default = "default_transcript_lookup_field")]
    pub transcript_lookup_field: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
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

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_api_version() -> String {
    "v9.2".to_string()
}

fn default_days_to_fetch() -> i64 {
    7
}

fn default_max_content_size() -> usize {
    50 * 1024 * 1024
}

fn default_token_cache_path() -> PathBuf {
    PathBuf::from(".token_cache.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("transcripts_output")
}

fn default_transcript_lookup_field() -> String {
    "_msdyn_liveworkitemid_value".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "no config file found at {:?}; create one or pass --config",
                config_path
            )));
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate the configuration, returning the first problem found.
    ///
    /// All fatal pre-flight checks live here: endpoint shape, GUID-typed
    /// ids, and the required `max_conversations` bound.
    pub fn validate(&self) -> Result<()> {
        if !self.organization_url.starts_with("https://") {
            return Err(Error::Config(
                "organization_url must start with https://".to_string(),
            ));
        }
        if !is_valid_guid(&self.tenant_id) {
            return Err(Error::Config(format!(
                "tenant_id is not a valid GUID: {:?}",
                self.tenant_id
            )));
        }
        if !is_valid_guid(&self.workstream_id) {
            return Err(Error::Config(format!(
                "workstream_id is not a valid GUID: {:?}",
                self.workstream_id
            )));
        }
        match self.max_conversations {
            None => {
                return Err(Error::Config(
                    "max_conversations is required (range: 1-1000); \
                     there is no fetch-everything mode"
                        .to_string(),
                ));
            }
            Some(n) if !(1..=1000).contains(&n) => {
                return Err(Error::Config(format!(
                    "max_conversations must be between 1 and 1000, got {}",
                    n
                )));
            }
            Some(_) => {}
        }
        if !(1..=365).contains(&self.days_to_fetch) {
            return Err(Error::Config(format!(
                "days_to_fetch must be between 1 and 365, got {}",
                self.days_to_fetch
            )));
        }
        if self.max_content_size < 1024 {
            return Err(Error::Config(format!(
                "max_content_size must be at least 1024 bytes, got {}",
                self.max_content_size
            )));
        }
        Ok(())
    }

    /// Organization URL with any trailing slash removed.
    pub fn organization_url_trimmed(&self) -> &str {
        self.organization_url.trim_end_matches('/')
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/transcriptor/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("transcriptor").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/transcriptor/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("transcriptor")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("transcriptor.log")
    }
}
