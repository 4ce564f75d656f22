//! # Configuration Management
//!
//! Centralized configuration for chat servers, clients and their key material.
//!
//! ## Configuration Sources
//! - TOML files via [`ChatConfig::from_file`]
//! - Direct instantiation with defaults
//! - Environment overrides via [`ChatConfig::from_env`] (`SECURE_CHAT_*`)
//!
//! ## Key Files
//! Keys are single-line base64 text files. Public keys of principals live in a
//! directory as `<principal>.pub`; the server's public key is pinned by path.

use crate::crypto::{DirectoryKeyStore, IntegrityKey, PrivateKey, PublicKey};
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Default maximum length of one wire line in bytes
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ChatConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub keys: KeyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChatConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `SECURE_CHAT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SECURE_CHAT_SERVER_ADDRESS") {
            config.server.address = addr.clone();
            config.client.server_address = addr;
        }

        if let Ok(identity) = std::env::var("SECURE_CHAT_IDENTITY") {
            config.client.identity = identity;
        }

        if let Ok(timeout) = std::env::var("SECURE_CHAT_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.handshake_timeout = Duration::from_millis(val);
                config.client.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(max) = std::env::var("SECURE_CHAT_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_connections = val;
            }
        }

        if let Ok(dir) = std::env::var("SECURE_CHAT_KEY_DIR") {
            config.keys.public_key_dir = Some(PathBuf::from(dir));
        }

        if let Ok(path) = std::env::var("SECURE_CHAT_PRIVATE_KEY") {
            config.keys.private_key = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("SECURE_CHAT_HMAC_KEY") {
            config.keys.hmac_key = Some(PathBuf::from(path));
        }

        if let Ok(level) = std::env::var("SECURE_CHAT_LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.keys.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn validate_timeout(errors: &mut Vec<String>, name: &str, value: Duration, max_secs: u64) {
    if value.as_millis() < 100 {
        errors.push(format!("{name} too short (minimum: 100ms)"));
    } else if value.as_secs() > max_secs {
        errors.push(format!("{name} too long (maximum: {max_secs}s)"));
    }
}

fn validate_line_length(errors: &mut Vec<String>, value: usize) {
    // a sealed handshake reply must fit on one line
    if value < 1024 {
        errors.push(format!("Max line length too small: {value} (minimum: 1024)"));
    } else if value > 16 * 1024 * 1024 {
        errors.push(format!("Max line length too large: {value} (maximum: 16 MB)"));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:13370")
    pub address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Bound on each receive while a handshake is running
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:13370"),
            max_connections: 1000,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:13370')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        validate_timeout(&mut errors, "Handshake timeout", self.handshake_timeout, 300);

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        validate_line_length(&mut errors, self.max_line_length);
        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Chat server to connect to
    pub server_address: String,

    /// Principal name declared in the handshake
    pub identity: String,

    /// Where this client accepts private messages, if at all
    #[serde(default)]
    pub private_address: Option<String>,

    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Timeout for waiting for a reply to a request
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: String::from("127.0.0.1:13370"),
            identity: String::from("alice"),
            private_address: None,
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            response_timeout: Duration::from_secs(30),
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_address.is_empty() {
            errors.push("Client server_address cannot be empty".to_string());
        } else if self.server_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client server_address format: '{}' (expected format: '127.0.0.1:13370')",
                self.server_address
            ));
        }

        if let Err(e) = crate::crypto::keys::validate_principal(&self.identity) {
            errors.push(format!("Invalid client identity: {e}"));
        }

        if let Some(ref addr) = self.private_address {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                errors.push(format!("Invalid private_address format: '{addr}'"));
            }
        }

        validate_timeout(&mut errors, "Connection timeout", self.connection_timeout, 300);
        validate_timeout(&mut errors, "Handshake timeout", self.handshake_timeout, 300);
        validate_timeout(&mut errors, "Response timeout", self.response_timeout, 3600);
        validate_line_length(&mut errors, self.max_line_length);

        errors
    }
}

/// Locations of key files
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct KeyConfig {
    /// This party's private key
    pub private_key: Option<PathBuf>,

    /// Pinned public key of the chat server (clients only)
    pub server_public_key: Option<PathBuf>,

    /// Directory of `<principal>.pub` files (servers only)
    pub public_key_dir: Option<PathBuf>,

    /// Shared HMAC key for private messaging
    pub hmac_key: Option<PathBuf>,
}

fn required<'a>(path: &'a Option<PathBuf>, name: &str) -> Result<&'a Path> {
    path.as_deref()
        .ok_or_else(|| ProtocolError::ConfigError(format!("keys.{name} is not configured")))
}

impl KeyConfig {
    pub fn load_private_key(&self) -> Result<PrivateKey> {
        PrivateKey::load(required(&self.private_key, "private_key")?)
    }

    pub fn load_server_public_key(&self) -> Result<PublicKey> {
        PublicKey::load(required(&self.server_public_key, "server_public_key")?)
    }

    pub fn open_key_store(&self) -> Result<DirectoryKeyStore> {
        DirectoryKeyStore::open(required(&self.public_key_dir, "public_key_dir")?)
    }

    pub fn load_integrity_key(&self) -> Result<IntegrityKey> {
        IntegrityKey::load(required(&self.hmac_key, "hmac_key")?)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, path) in [
            ("private_key", &self.private_key),
            ("server_public_key", &self.server_public_key),
            ("hmac_key", &self.hmac_key),
        ] {
            if let Some(path) = path {
                if !path.is_file() {
                    errors.push(format!("Key file for {name} not found: {}", path.display()));
                }
            }
        }

        if let Some(ref dir) = self.public_key_dir {
            if !dir.is_dir() {
                errors.push(format!("Public key directory not found: {}", dir.display()));
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,

    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("secure-chat"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Durations as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
