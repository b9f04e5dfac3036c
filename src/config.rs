// Configuration File Support
//
// This module provides configuration file parsing for the hookcast dispatcher.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/hookcast/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Delivery audit log configuration
    pub log: DeliveryLogConfig,

    /// Outbound HTTP configuration
    pub http: HttpConfig,

    /// Named handler references
    pub handlers: HandlersConfig,

    /// Queue selection
    pub queue: QueueConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Delivery audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryLogConfig {
    /// Whether request/response capture and the response-callback path are active
    pub active: bool,

    /// Ceiling on job attempts; -1 means unlimited
    pub max_attempts: i64,

    /// Per-webhook log record cap; -1 means unlimited
    pub storage_quantity: i64,
}

impl Default for DeliveryLogConfig {
    fn default() -> Self {
        Self {
            active: true,
            max_attempts: -1,
            storage_quantity: 50,
        }
    }
}

impl DeliveryLogConfig {
    /// Attempt ceiling as an Option; None means unlimited
    pub fn attempt_ceiling(&self) -> Option<u32> {
        (self.max_attempts >= 0).then_some(self.max_attempts as u32)
    }

    /// Per-webhook record cap as an Option; None means unlimited
    pub fn storage_cap(&self) -> Option<usize> {
        (self.storage_quantity >= 0).then_some(self.storage_quantity as usize)
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-call request timeout in seconds
    pub timeout_secs: u64,

    /// Whether to verify TLS certificates on delivery targets.
    /// Off by default: many subscriber endpoints sit on internal networks
    /// with self-signed certificates. Hosts that only deliver to public
    /// endpoints should turn this on.
    pub verify_tls: bool,

    /// Fixed User-Agent sent with every delivery
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            verify_tls: false,
            user_agent: format!("hookcast/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Named handler references, resolved against the handler registry.
/// Each accepts `"namespace"` or `"namespace@method"` form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HandlersConfig {
    /// Webhook filter; default method `filter`
    pub filter_webhook: Option<String>,

    /// Payload transformer; default method `transform`
    pub transformer: Option<String>,

    /// Response callback; default method `handle`
    pub response_callback: Option<String>,
}

/// Queue selection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue used when the event payload carries no routing hint
    pub default: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default: "default".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            log: DeliveryLogConfig::default(),
            http: HttpConfig::default(),
            handlers: HandlersConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/hookcast/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("io", "hookcast", "Hookcast") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("hookcast")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - HOOKCAST_LOG_LEVEL
    /// - HOOKCAST_LOG_FORMAT
    /// - HOOKCAST_LOG_ACTIVE
    /// - HOOKCAST_MAX_ATTEMPTS
    /// - HOOKCAST_STORAGE_QUANTITY
    /// - HOOKCAST_HTTP_TIMEOUT_SECS
    /// - HOOKCAST_VERIFY_TLS
    /// - HOOKCAST_DEFAULT_QUEUE
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("HOOKCAST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("HOOKCAST_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(active) = std::env::var("HOOKCAST_LOG_ACTIVE") {
            self.log.active = active.parse().unwrap_or(self.log.active);
        }
        if let Ok(max) = std::env::var("HOOKCAST_MAX_ATTEMPTS") {
            if let Ok(max) = max.parse::<i64>() {
                if max >= -1 {
                    self.log.max_attempts = max;
                }
            }
        }
        if let Ok(quantity) = std::env::var("HOOKCAST_STORAGE_QUANTITY") {
            if let Ok(quantity) = quantity.parse::<i64>() {
                if quantity >= -1 {
                    self.log.storage_quantity = quantity;
                }
            }
        }

        if let Ok(timeout) = std::env::var("HOOKCAST_HTTP_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout > 0 {
                    self.http.timeout_secs = timeout;
                }
            }
        }
        if let Ok(verify) = std::env::var("HOOKCAST_VERIFY_TLS") {
            self.http.verify_tls = verify.parse().unwrap_or(self.http.verify_tls);
        }

        if let Ok(queue) = std::env::var("HOOKCAST_DEFAULT_QUEUE") {
            self.queue.default = queue;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.log.max_attempts < -1 {
            anyhow::bail!("log.max_attempts must be -1 (unlimited) or >= 0");
        }
        if self.log.storage_quantity < -1 {
            anyhow::bail!("log.storage_quantity must be -1 (unlimited) or >= 0");
        }

        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be > 0");
        }
        if self.http.user_agent.is_empty() {
            anyhow::bail!("http.user_agent must not be empty");
        }

        if self.queue.default.is_empty() {
            anyhow::bail!("queue.default must not be empty");
        }

        for (name, reference) in [
            ("handlers.filter_webhook", &self.handlers.filter_webhook),
            ("handlers.transformer", &self.handlers.transformer),
            ("handlers.response_callback", &self.handlers.response_callback),
        ] {
            if let Some(reference) = reference {
                if reference.is_empty() || reference.starts_with('@') {
                    anyhow::bail!("{} has invalid handler reference: '{}'", name, reference);
                }
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
