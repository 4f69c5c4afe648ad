//! Configuration management for filebot.
//!
//! The bot reads a single JSON file, by default `~/.filebot/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (FILEBOT_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `FILEBOT_CONFIG` → path of the config file itself
//! - `FILEBOT_BOT_TOKEN` (or `BOT_TOKEN`) → telegram.bot_token
//! - `FILEBOT_HEALTH_PORT` → health.port
//! - `FILEBOT_BIND_ADDRESS` → health.bind
//! - `FILEBOT_WORKDIR` → workspace.root
//! - `FILEBOT_LOG_LEVEL` → observability.log_level
//! - `FILEBOT_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".filebot"),
        |dirs| dirs.home_dir().join(".filebot"),
    )
}

/// Get the configuration file path.
///
/// `FILEBOT_CONFIG` takes precedence over the default location.
pub fn config_path() -> PathBuf {
    match std::env::var("FILEBOT_CONFIG") {
        Ok(path) if !path.trim().is_empty() => {
            PathBuf::from(shellexpand::tilde(path.trim()).into_owned())
        }
        _ => config_dir().join("config.json"),
    }
}

// ============================================================================
// Telegram
// ============================================================================

/// Telegram Bot API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    #[serde(default)]
    pub bot_token: String,

    /// Usernames or numeric user ids allowed to talk to the bot ("*" = everyone)
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,

    /// Bot API base URL (overridable for self-hosted API servers)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Long-poll timeout for getUpdates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_users: default_allowed_users(),
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_allowed_users() -> Vec<String> {
    vec!["*".into()]
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_poll_timeout() -> u64 {
    30
}

// ============================================================================
// Health endpoint
// ============================================================================

/// Liveness HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,

    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_health_port(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

fn default_health_port() -> u16 {
    5018
}

// ============================================================================
// Workspace
// ============================================================================

/// Scratch space configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Base directory holding one scratch root per workflow kind
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,

    /// Remove leftovers of a previous run before accepting events
    #[serde(default)]
    pub purge_on_startup: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            purge_on_startup: false,
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("Downloads")
}

// ============================================================================
// Limits
// ============================================================================

/// Size and count limits enforced before any download starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_split_max_bytes")]
    pub split_max_bytes: u64,

    #[serde(default = "default_pdf2image_max_bytes")]
    pub pdf2image_max_bytes: u64,

    #[serde(default = "default_merge_max_file_bytes")]
    pub merge_max_file_bytes: u64,

    #[serde(default = "default_merge_max_files")]
    pub merge_max_files: usize,

    #[serde(default = "default_merge_max_total_bytes")]
    pub merge_max_total_bytes: u64,

    #[serde(default = "default_archive_max_bytes")]
    pub archive_max_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            split_max_bytes: default_split_max_bytes(),
            pdf2image_max_bytes: default_pdf2image_max_bytes(),
            merge_max_file_bytes: default_merge_max_file_bytes(),
            merge_max_files: default_merge_max_files(),
            merge_max_total_bytes: default_merge_max_total_bytes(),
            archive_max_bytes: default_archive_max_bytes(),
        }
    }
}

fn default_split_max_bytes() -> u64 {
    200 * MIB
}

fn default_pdf2image_max_bytes() -> u64 {
    200 * MIB
}

fn default_merge_max_file_bytes() -> u64 {
    5 * MIB
}

fn default_merge_max_files() -> usize {
    50
}

fn default_merge_max_total_bytes() -> u64 {
    100 * MIB
}

fn default_archive_max_bytes() -> u64 {
    2 * 1024 * MIB
}

// ============================================================================
// Sessions
// ============================================================================

/// Workflow session lifetime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Evict waiting sessions idle for longer than this. `None` keeps them forever.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// How often the idle sweeper runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

// ============================================================================
// Backends
// ============================================================================

/// External conversion tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// `pdftoppm` executable used to rasterize PDF pages
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm_path: String,

    /// Zoom factor applied when rasterizing (1.0 = 72 DPI)
    #[serde(default = "default_raster_zoom")]
    pub raster_zoom: f32,

    /// `unrar` executable used for RAR archives
    #[serde(default = "default_unrar")]
    pub unrar_path: String,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            pdftoppm_path: default_pdftoppm(),
            raster_zoom: default_raster_zoom(),
            unrar_path: default_unrar(),
        }
    }
}

fn default_pdftoppm() -> String {
    "pdftoppm".into()
}

fn default_raster_zoom() -> f32 {
    2.0
}

fn default_unrar() -> String {
    "unrar".into()
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub backends: BackendsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("FILEBOT_BOT_TOKEN").or_else(|_| std::env::var("BOT_TOKEN")) {
            self.telegram.bot_token = token;
        }

        if let Ok(port) = std::env::var("FILEBOT_HEALTH_PORT") {
            if let Ok(p) = port.parse() {
                self.health.port = p;
            }
        }

        if let Ok(bind) = std::env::var("FILEBOT_BIND_ADDRESS") {
            self.health.bind = bind;
        }

        if let Ok(root) = std::env::var("FILEBOT_WORKDIR") {
            self.workspace.root = PathBuf::from(shellexpand::tilde(&root).into_owned());
        }

        if let Ok(level) = std::env::var("FILEBOT_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Ok(format) = std::env::var("FILEBOT_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Save configuration to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create config directory {}", dir.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Socket address string for the health endpoint.
    pub fn health_addr(&self) -> String {
        format!("{}:{}", self.health.bind, self.health.port)
    }

    /// Idle timeout as a `Duration`, if eviction is enabled.
    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        self.sessions
            .idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(std::time::Duration::from_secs)
    }
}
