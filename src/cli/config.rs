//! Courier configuration file handling
//!
//! Provides default configuration generation and loading for the courier
//! service. Configuration files are TOML and live next to the database in
//! the user's data directory unless `--config` points elsewhere.
//!
//! Durations are human-readable strings (`"10m"`, `"1s"`, `"2h 30m"`).
//!
//! Two environment variables override the file:
//! - `COURIER_GATEWAY_URL` replaces `[network] gateway_url`
//! - `COURIER_DATABASE` replaces `[database] path`

use courier::messenger::auth::{AuthSettings, DEFAULT_CODE_TTL, DEFAULT_SECOND_FACTOR_TTL};
use courier::messenger::gateway::GatewayConfig;
use courier::messenger::retry::{BackoffPolicy, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8081";
const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(25);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub const ENV_GATEWAY_URL: &str = "COURIER_GATEWAY_URL";
pub const ENV_DATABASE: &str = "COURIER_DATABASE";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Courier service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding accounts and received messages
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Protocol gateway connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,

    /// How long one update poll may stay open
    #[serde(default = "default_poll_timeout", with = "duration_str")]
    pub poll_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// Login flow timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_code_ttl", with = "duration_str")]
    pub code_ttl: Duration,

    #[serde(default = "default_second_factor_ttl", with = "duration_str")]
    pub second_factor_ttl: Duration,

    /// How often `serve` drops expired pending logins
    #[serde(default = "default_sweep_interval", with = "duration_str")]
    pub sweep_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            code_ttl: DEFAULT_CODE_TTL,
            second_factor_ttl: DEFAULT_SECOND_FACTOR_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Listener reconnect backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_initial_backoff", with = "duration_str")]
    pub initial_backoff: Duration,

    #[serde(default = "default_max_backoff", with = "duration_str")]
    pub max_backoff: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address the HTTP API listens on
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_poll_timeout() -> Duration {
    DEFAULT_POLL_TIMEOUT
}

fn default_code_ttl() -> Duration {
    DEFAULT_CODE_TTL
}

fn default_second_factor_ttl() -> Duration {
    DEFAULT_SECOND_FACTOR_TTL
}

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// `Duration` as a humantime string
mod duration_str {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

impl CourierConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: CourierConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing a commented default file first if it is missing.
    ///
    /// Returns the configuration and whether a new file was created.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), ConfigError> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }
        Self::create_default(path, &default_database_path())?;
        Ok((Self::load(path)?, true))
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        write_file(path, &contents)
    }

    /// Apply `COURIER_GATEWAY_URL` / `COURIER_DATABASE` from the environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_GATEWAY_URL).ok(),
            std::env::var(ENV_DATABASE).ok(),
        );
    }

    fn apply_overrides(&mut self, gateway_url: Option<String>, database: Option<String>) {
        if let Some(url) = gateway_url.filter(|v| !v.trim().is_empty()) {
            self.network.gateway_url = url;
        }
        if let Some(path) = database.filter(|v| !v.trim().is_empty()) {
            self.database.path = PathBuf::from(path);
        }
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.network.gateway_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "network.gateway_url must be an http(s) URL, got '{}'",
                url
            )));
        }
        self.bind_addr()?;
        if self.auth.code_ttl.is_zero() || self.auth.second_factor_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "auth.code_ttl and auth.second_factor_ttl must be positive".to_string(),
            ));
        }
        if self.listener.max_backoff < self.listener.initial_backoff {
            return Err(ConfigError::Invalid(
                "listener.max_backoff must not be below listener.initial_backoff".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.api.bind.parse().map_err(|e| {
            ConfigError::Invalid(format!("api.bind '{}' is not a socket address: {}", self.api.bind, e))
        })
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            code_ttl: self.auth.code_ttl,
            second_factor_ttl: self.auth.second_factor_ttl,
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.listener.initial_backoff, self.listener.max_backoff)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.network.gateway_url.clone(),
            request_timeout: self.network.request_timeout,
            poll_timeout: self.network.poll_timeout,
        }
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(database_path: &Path) -> String {
        format!(
            r#"# Courier Configuration
#
# Durations accept human-readable values such as "30s", "10m" or "1h 30m".
# COURIER_GATEWAY_URL and COURIER_DATABASE override the matching settings.

[database]
# SQLite file with registered accounts and received messages.
# It holds session credentials: keep it readable by the service user only.
path = "{database_path}"

[network]
# Protocol gateway that speaks the messaging network's wire protocol
gateway_url = "{gateway_url}"
request_timeout = "30s"
# How long one update poll may stay open
poll_timeout = "25s"

[auth]
# Lifetime of a pending login after the code was requested
code_ttl = "10m"
# Window for entering the second-factor password once the code is accepted
second_factor_ttl = "5m"
# How often `courier serve` drops expired pending logins
sweep_interval = "1m"

[listener]
# Reconnect backoff: starts at initial_backoff, doubles up to max_backoff
initial_backoff = "1s"
max_backoff = "1m"

[api]
# Address for `courier serve`
bind = "{bind}"

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
level = "info"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/courier/courier.log"
"#,
            database_path = database_path.display(),
            gateway_url = DEFAULT_GATEWAY_URL,
            bind = DEFAULT_BIND,
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(config_path: &Path, database_path: &Path) -> Result<(), ConfigError> {
        write_file(config_path, &Self::generate_default_toml(database_path))
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let write_error = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
    }
    fs::write(path, contents).map_err(write_error)
}

/// Data directory for courier: `~/.local/share/courier` on Linux
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

pub fn default_database_path() -> PathBuf {
    default_data_dir().join("courier.db")
}
