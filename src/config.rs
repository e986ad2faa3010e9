//! Configuration types for Request Jar

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::subscription::{OverflowPolicy, DEFAULT_BUFFER_SIZE};
use crate::{JarError, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Cross-origin policy
    #[serde(default)]
    pub cors: CorsConfig,
    /// Live subscription settings
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port to listen on (0 picks a free port)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Socket address to bind
    ///
    /// # Errors
    ///
    /// Returns error if `bind_address` is not an IP address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind_address.parse().map_err(|e| {
            JarError::ConfigError(format!("Invalid bind address '{}': {e}", self.bind_address))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Cross-origin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed to call the API (`*` allows any)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Whether credentialed requests are allowed
    #[serde(default = "default_true")]
    pub allow_credentials: bool,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allow_credentials: true,
        }
    }
}

/// Live subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Requests buffered per subscriber before the overflow policy applies
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// What to do with a subscriber whose buffer is full
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Seconds between keep-alive comments on event streams
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_keepalive_secs() -> u64 {
    15
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            overflow: OverflowPolicy::default(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    4096
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JarError::ConfigError(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| JarError::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Load from an optional file, apply environment overrides, validate
    ///
    /// # Errors
    ///
    /// Returns error if the file, an override or the result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORT`, `ALLOWED_ORIGINS` and `LOG_FORMAT` overrides
    ///
    /// # Errors
    ///
    /// Returns error if an override cannot be parsed
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| JarError::ConfigError(format!("Invalid PORT '{port}': {e}")))?;
        }

        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = match format.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(JarError::ConfigError(format!(
                        "Invalid LOG_FORMAT '{other}'"
                    )))
                }
            };
        }

        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        self.server.socket_addr()?;

        if self.subscriptions.buffer_size == 0 {
            return Err(JarError::ConfigError(
                "subscriptions.buffer_size must be > 0".to_string(),
            ));
        }

        if self.subscriptions.keepalive_secs == 0 {
            return Err(JarError::ConfigError(
                "subscriptions.keepalive_secs must be > 0".to_string(),
            ));
        }

        if self.limits.max_connections == 0 {
            return Err(JarError::ConfigError(
                "limits.max_connections must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
