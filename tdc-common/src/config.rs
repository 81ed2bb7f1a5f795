//! Bootstrap configuration for the survey service
//!
//! Settings are resolved in priority order:
//! 1. Command-line arguments (which also carry `TDC_*` environment variables)
//! 2. TOML configuration file
//! 3. Compiled defaults
//!
//! A missing TOML file is not fatal unless it was named explicitly; the
//! service logs a warning and starts on compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TDC_CONFIG";

/// Config file looked up in the working directory when nothing else is named
pub const LOCAL_CONFIG_FILE: &str = "tdc.toml";

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8501;
pub const DEFAULT_DESIGN_PATH: &str = "data/optimized_design.csv";
pub const DEFAULT_ASSET_DIR: &str = "door_images";
pub const DEFAULT_SECRETS_PATH: &str = "secrets.toml";
pub const DEFAULT_TICKET_PRICE: f64 = 3.8;
pub const DEFAULT_TRIP_DURATION: u32 = 60;

/// Which remote store implementation backs the survey tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Google Sheets spreadsheet (production)
    #[default]
    Sheets,
    /// Process-local tables, lost on exit
    Memory,
}

/// How the shared participant counter is advanced after demographics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterUpdate {
    /// Read the cell, write value + 1. Concurrent finishers can lose an increment.
    #[default]
    ReadModifyWrite,
    /// Delegate to the store's increment operation
    Atomic,
}

/// What happens when a door image is missing on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingAssetPolicy {
    /// Fail the page render
    #[default]
    Error,
    /// Log a warning and serve a generated placeholder image
    Placeholder,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!(
                        "unknown value '{}' (expected one of: {})",
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($ty::$variant => f.write_str($text),)+
                }
            }
        }
    };
}

str_enum!(StoreBackend { Sheets => "sheets", Memory => "memory" });
str_enum!(CounterUpdate { ReadModifyWrite => "read_modify_write", Atomic => "atomic" });
str_enum!(MissingAssetPolicy { Error => "error", Placeholder => "placeholder" });

/// Retry settings for remote store writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per store operation (1 disables retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Lifetime of in-memory participant sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Drop a session nobody has touched for this long
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Drop a finished session this long after its last request
    #[serde(default = "default_finished_grace_secs")]
    pub finished_grace_secs: u64,

    /// How often the registry is swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            finished_grace_secs: default_finished_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
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

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_idle_timeout_secs() -> u64 {
    2 * 60 * 60
}

fn default_finished_grace_secs() -> u64 {
    10 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Bootstrap configuration as written in the TOML file
///
/// Every key is optional; absent keys fall through to compiled defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// CSV question table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_path: Option<PathBuf>,

    /// Directory holding `door_d2d_{value}.png` images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_dir: Option<PathBuf>,

    /// Service-account secrets file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreBackend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_update: Option<CounterUpdate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_asset: Option<MissingAssetPolicy>,

    /// Regular ticket price shown to participants (EUR)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_price: Option<f64>,

    /// Trip duration shown to participants (minutes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_duration: Option<u32>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Values taken from the command line or `TDC_*` environment variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub design_path: Option<PathBuf>,
    pub asset_dir: Option<PathBuf>,
    pub secrets_path: Option<PathBuf>,
    pub store: Option<StoreBackend>,
    pub counter_update: Option<CounterUpdate>,
    pub missing_asset: Option<MissingAssetPolicy>,
    pub log_level: Option<String>,
}

/// Fully resolved configuration used by the service
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyConfig {
    pub bind_address: String,
    pub port: u16,
    pub design_path: PathBuf,
    pub asset_dir: PathBuf,
    pub secrets_path: PathBuf,
    pub store: StoreBackend,
    pub counter_update: CounterUpdate,
    pub missing_asset: MissingAssetPolicy,
    pub ticket_price: f64,
    pub trip_duration: u32,
    pub retry: RetryConfig,
    pub sessions: SessionConfig,
    pub logging: LoggingConfig,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            design_path: PathBuf::from(DEFAULT_DESIGN_PATH),
            asset_dir: PathBuf::from(DEFAULT_ASSET_DIR),
            secrets_path: PathBuf::from(DEFAULT_SECRETS_PATH),
            store: StoreBackend::default(),
            counter_update: CounterUpdate::default(),
            missing_asset: MissingAssetPolicy::default(),
            ticket_price: DEFAULT_TICKET_PRICE,
            trip_duration: DEFAULT_TRIP_DURATION,
            retry: RetryConfig::default(),
            sessions: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SurveyConfig {
    /// Merge overrides over the TOML file over compiled defaults, then validate
    pub fn resolve(toml: TomlConfig, overrides: ConfigOverrides) -> Result<Self> {
        let mut logging = toml.logging;
        if let Some(level) = overrides.log_level {
            logging.level = level;
        }

        let config = Self {
            bind_address: overrides
                .bind_address
                .or(toml.bind_address)
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            port: overrides.port.or(toml.port).unwrap_or(DEFAULT_PORT),
            design_path: overrides
                .design_path
                .or(toml.design_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DESIGN_PATH)),
            asset_dir: overrides
                .asset_dir
                .or(toml.asset_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSET_DIR)),
            secrets_path: overrides
                .secrets_path
                .or(toml.secrets_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRETS_PATH)),
            store: overrides.store.or(toml.store).unwrap_or_default(),
            counter_update: overrides
                .counter_update
                .or(toml.counter_update)
                .unwrap_or_default(),
            missing_asset: overrides
                .missing_asset
                .or(toml.missing_asset)
                .unwrap_or_default(),
            ticket_price: toml.ticket_price.unwrap_or(DEFAULT_TICKET_PRICE),
            trip_duration: toml.trip_duration.unwrap_or(DEFAULT_TRIP_DURATION),
            retry: toml.retry,
            sessions: toml.sessions,
            logging,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.ticket_price.is_finite() && self.ticket_price > 0.0) {
            return Err(Error::Config(format!(
                "ticket_price must be a positive number, got {}",
                self.ticket_price
            )));
        }
        if self.trip_duration == 0 {
            return Err(Error::Config("trip_duration must be at least 1 minute".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::Config(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err(Error::Config("sessions.sweep_interval_secs must be at least 1".to_string()));
        }
        if self.sessions.finished_grace_secs > self.sessions.idle_timeout_secs {
            return Err(Error::Config(format!(
                "sessions.finished_grace_secs ({}) exceeds sessions.idle_timeout_secs ({})",
                self.sessions.finished_grace_secs, self.sessions.idle_timeout_secs
            )));
        }
        Ok(())
    }

    /// `host:port` string for binding the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Find the config file to load
///
/// An explicit path (CLI, then `TDC_CONFIG`) is returned whether or not it
/// exists, so the caller can fail loudly. Otherwise `./tdc.toml`, then
/// `<user config dir>/tdc/config.toml`, are returned only if present.
pub fn locate_config_file(cli_path: Option<&Path>) -> Option<(PathBuf, bool)> {
    if let Some(path) = cli_path {
        return Some((path.to_path_buf(), true));
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some((PathBuf::from(path), true));
        }
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some((local, false));
    }

    dirs::config_dir()
        .map(|d| d.join("tdc").join("config.toml"))
        .filter(|p| p.exists())
        .map(|p| (p, false))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse TOML {}: {}", path.display(), e)))
}

/// Load the config file if one can be found, else compiled defaults
///
/// An explicitly named file that is missing or malformed is an error; a
/// discovered file that fails to parse is also an error, since silently
/// ignoring a file the operator wrote would be surprising.
pub fn load_or_default(cli_path: Option<&Path>) -> Result<TomlConfig> {
    match locate_config_file(cli_path) {
        Some((path, explicit)) => {
            if explicit && !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            let config = load_toml_config(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => {
            warn!("No config file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Serialize `value` to TOML and write it atomically (temp file + rename)
///
/// On Unix the file is created with 0600 permissions since it may hold
/// credentials.
pub fn write_toml_atomic<T: Serialize>(value: &T, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize TOML: {}", e)))?;

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp = target.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    std::fs::write(&temp, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&temp, target) {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }

    Ok(())
}
