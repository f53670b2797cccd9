//! # Unified Application Configuration
//!
//! This module provides a centralized configuration system that consolidates
//! all application settings into a single, structured configuration object.
//! It supports loading from environment variables, validation, and provides
//! a clean interface for accessing configuration throughout the application.

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Bot-specific configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Telegram bot token
    pub token: String,
    /// HTTP client timeout in seconds
    pub http_timeout_secs: u64,
    /// Sender identifiers that may run admin commands in addition to
    /// platform-native chat administrators
    pub admin_ids: Vec<u64>,
    /// Prefix marking a message as an explicit command invocation
    pub wake_prefix: String,
    /// Whether auto-detect replies quote the triggering message
    pub quote_replies: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            http_timeout_secs: 30,
            admin_ids: Vec::new(),
            wake_prefix: "!".to_string(),
            quote_replies: true,
        }
    }
}

impl BotConfig {
    /// Validate bot configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.token.trim().is_empty() {
            return Err(AppError::Config("Bot token cannot be empty".to_string()));
        }

        // Basic bot token format validation
        if !self.token.contains(':') {
            return Err(AppError::Config(
                "Bot token format is invalid. Expected format: 'bot_id:bot_token'".to_string(),
            ));
        }

        if self.http_timeout_secs == 0 {
            return Err(AppError::Config("HTTP timeout cannot be 0".to_string()));
        }

        if self.http_timeout_secs > 300 {
            return Err(AppError::Config(
                "HTTP timeout cannot be greater than 300 seconds".to_string(),
            ));
        }

        if self.wake_prefix.is_empty() {
            return Err(AppError::Config("Wake prefix cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Keyword matching configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minimum seconds between two auto-detect triggers in one session
    pub cooldown_secs: u64,
    /// Let an exact, non-regex keyword match bypass the cooldown
    pub ignore_cooldown_on_exact_match: bool,
    /// Default case sensitivity for entries that do not override it
    pub case_sensitive: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 0,
            ignore_cooldown_on_exact_match: false,
            case_sensitive: false,
        }
    }
}

impl MatchingConfig {
    /// Validate matching configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.cooldown_secs > 86_400 {
            return Err(AppError::Config(
                "Cooldown cannot be greater than 86400 seconds".to_string(),
            ));
        }
        Ok(())
    }
}

/// Admin web console configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Bind address for the admin console
    pub bind_addr: String,
    /// Admin console port; on AddrInUse the next ports are tried
    pub port: u16,
    /// Session idle timeout in seconds
    pub session_timeout_secs: u64,
    /// Per-request read/handle timeout in seconds
    pub request_timeout_secs: u64,
    /// Maximum accepted request body size in bytes
    pub max_body_bytes: usize,
    /// Whether to allow privileged ports (< 1024)
    pub allow_privileged_ports: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8888,
            session_timeout_secs: 3600,
            request_timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024, // 10 MiB
            allow_privileged_ports: false,
        }
    }
}

impl WebConfig {
    /// Validate web console configuration
    pub fn validate(&self) -> AppResult<()> {
        if !self.allow_privileged_ports && self.port < 1024 {
            return Err(AppError::Config(format!(
                "Admin port {} is privileged. Set allow_privileged_ports=true or use port >= 1024",
                self.port
            )));
        }

        if self.session_timeout_secs == 0 {
            return Err(AppError::Config("Session timeout cannot be 0".to_string()));
        }

        if self.request_timeout_secs == 0 {
            return Err(AppError::Config("Request timeout cannot be 0".to_string()));
        }

        if self.max_body_bytes == 0 {
            return Err(AppError::Config(
                "Maximum request body size cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Persistent data locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the entry file, the image directory and the
    /// password hash file
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(AppError::Config("Data directory cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Path of the persisted entry collections
    pub fn entries_file(&self) -> PathBuf {
        self.data_dir.join("keywords.json")
    }

    /// Directory holding uploaded/downloaded reply images
    pub fn image_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Path of the admin password hash file
    pub fn password_file(&self) -> PathBuf {
        self.data_dir.join("admin_password.hash")
    }
}

/// Observability configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Prometheus metrics port; 0 disables the metrics server
    pub metrics_port: u16,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_port: 9090,
            log_json: false,
        }
    }
}

/// Unified application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Bot configuration
    pub bot: BotConfig,
    /// Keyword matching configuration
    pub matching: MatchingConfig,
    /// Admin web console configuration
    pub web: WebConfig,
    /// Data locations
    pub storage: StorageConfig,
    /// Observability configuration
    pub observability: ObservabilityConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> AppResult<T> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| AppError::Config(format!("{} must be a valid value", key)))
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        let mut config = Self::default();

        // Load bot configuration
        config.bot.token = env::var("TELOXIDE_TOKEN").map_err(|_| {
            AppError::Config("TELOXIDE_TOKEN environment variable is required".to_string())
        })?;
        config.bot.http_timeout_secs = env_parse("HTTP_CLIENT_TIMEOUT_SECS", "30")?;
        config.bot.wake_prefix =
            env::var("WAKE_PREFIX").unwrap_or_else(|_| "!".to_string());
        config.bot.quote_replies = env_flag("QUOTE_REPLIES", true);
        if let Ok(ids) = env::var("ADMIN_USER_IDS") {
            for part in ids.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let id = part.parse::<u64>().map_err(|_| {
                    AppError::Config(format!("ADMIN_USER_IDS contains a non-numeric id: {}", part))
                })?;
                config.bot.admin_ids.push(id);
            }
        }

        // Load matching configuration
        config.matching.cooldown_secs = env_parse("MATCH_COOLDOWN_SECS", "0")?;
        config.matching.ignore_cooldown_on_exact_match =
            env_flag("MATCH_IGNORE_COOLDOWN_ON_EXACT", false);
        config.matching.case_sensitive = env_flag("MATCH_CASE_SENSITIVE", false);

        // Load web console configuration
        config.web.bind_addr =
            env::var("ADMIN_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        config.web.port = env_parse("ADMIN_PORT", "8888")?;
        config.web.session_timeout_secs = env_parse("ADMIN_SESSION_TIMEOUT_SECS", "3600")?;
        config.web.request_timeout_secs = env_parse("ADMIN_REQUEST_TIMEOUT_SECS", "30")?;
        config.web.max_body_bytes = env_parse("ADMIN_MAX_BODY_BYTES", "10485760")?;
        config.web.allow_privileged_ports = env_flag("ALLOW_PRIVILEGED_PORTS", false);

        // Load storage configuration
        config.storage.data_dir = PathBuf::from(
            env::var("KEYWORDS_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );

        // Load observability configuration
        config.observability.metrics_port = env_parse("METRICS_PORT", "9090")?;
        config.observability.log_json = env_flag("LOG_JSON", false);

        Ok(config)
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> AppResult<()> {
        self.bot.validate()?;
        self.matching.validate()?;
        self.web.validate()?;
        self.storage.validate()?;
        Ok(())
    }

    /// Get a summary of the current configuration for logging
    pub fn summary(&self) -> String {
        format!(
            "Configuration: bot_token=[REDACTED], data_dir={}, admin_addr={}:{}, cooldown={}s, metrics_port={}",
            self.storage.data_dir.display(),
            self.web.bind_addr,
            self.web.port,
            self.matching.cooldown_secs,
            self.observability.metrics_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        // Default config has an empty bot token, so validation fails on it,
        // but must not panic.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bot_config_validation() {
        let mut config = BotConfig::default();

        // Invalid: empty token
        assert!(config.validate().is_err());

        // Invalid: malformed token
        config.token = "invalid-token".to_string();
        assert!(config.validate().is_err());

        // Valid token format
        config.token = "123456789:AAFakeTokenForTestingPurposes1234567890".to_string();
        assert!(config.validate().is_ok());

        // Invalid: zero timeout
        config.http_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.http_timeout_secs = 30;

        // Invalid: empty wake prefix
        config.wake_prefix = String::new();
        assert!(config.validate().is_err());
        config.wake_prefix = "!".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_web_config_validation() {
        let mut config = WebConfig::default();

        // Valid default config
        assert!(config.validate().is_ok());

        // Invalid: privileged port without permission
        config.port = 80;
        assert!(config.validate().is_err());

        // Valid: privileged port with permission
        config.allow_privileged_ports = true;
        assert!(config.validate().is_ok());

        // Invalid: zero session timeout
        config.session_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.session_timeout_secs = 3600;

        // Invalid: zero body limit
        config.max_body_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_paths() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/var/lib/keywords"),
        };
        assert_eq!(
            config.entries_file(),
            PathBuf::from("/var/lib/keywords/keywords.json")
        );
        assert_eq!(config.image_dir(), PathBuf::from("/var/lib/keywords/images"));
        assert_eq!(
            config.password_file(),
            PathBuf::from("/var/lib/keywords/admin_password.hash")
        );
    }
}
