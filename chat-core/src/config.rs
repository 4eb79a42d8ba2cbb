//! Application configuration management.
//!
//! Handles loading, saving, and accessing the client configuration: broker
//! endpoint, the logged-in user, reconnection policy, outbound queue limits
//! and logging. Configuration is persisted as TOML on disk. The auth token is
//! never written to disk; it only lives in a [`ConnectionConfig`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants;
use crate::error::{ChatError, ChatResult};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Broker connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Identity of the logged-in user.
    #[serde(default)]
    pub session: SessionConfig,

    /// Reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Offline outbound queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint of the message broker (e.g. "wss://chat.example.com/ws").
    #[serde(default)]
    pub endpoint: String,
}

/// Identity of the user the session is opened for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Current user identifier.
    #[serde(default)]
    pub user_id: String,

    /// Display name sent along with outbound frames.
    #[serde(default)]
    pub display_name: String,
}

/// Reconnection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Automatic reconnection attempts before the session gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub delay_ms: u64,

    /// Jitter factor (0.0 to 1.0) applied to each delay. 0 keeps it fixed.
    #[serde(default)]
    pub jitter_factor: f64,

    /// Bound on open + handshake + subscription install in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// Outbound queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum commands held while offline. 0 means unbounded.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output for the log file.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_max_attempts() -> u32 {
    constants::DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_reconnect_delay() -> u64 {
    constants::DEFAULT_RECONNECT_DELAY_MS
}

fn default_handshake_timeout() -> u64 {
    constants::DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_queue_capacity() -> usize {
    constants::DEFAULT_QUEUE_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_reconnect_delay(),
            jitter_factor: 0.0,
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl ReconnectConfig {
    /// Delay between reconnection attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Handshake timeout.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> ChatResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> ChatResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> ChatResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ChatError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    ///
    /// - Linux: `~/.config/ChatClient/config.toml`
    /// - macOS: `~/Library/Application Support/ChatClient/config.toml`
    /// - Windows: `%APPDATA%/ChatClient/config.toml`
    pub fn default_config_path() -> ChatResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| ChatError::Config("could not determine config directory".into()))?;
        Ok(base.join(constants::APP_NAME).join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> ChatResult<PathBuf> {
        if self.logging.directory.is_empty() {
            let base = dirs::data_dir()
                .ok_or_else(|| ChatError::Config("could not determine data directory".into()))?;
            Ok(base.join(constants::APP_NAME).join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether the broker endpoint and user are configured.
    pub fn is_session_configured(&self) -> bool {
        !self.server.endpoint.is_empty() && !self.session.user_id.is_empty()
    }

    /// Build the per-login connection value from this config and a token.
    pub fn connection_config(&self, token: impl Into<String>) -> ChatResult<ConnectionConfig> {
        if self.server.endpoint.is_empty() {
            return Err(ChatError::MissingConfig("server.endpoint".into()));
        }
        if self.session.user_id.is_empty() {
            return Err(ChatError::MissingConfig("session.user_id".into()));
        }
        let display_name = if self.session.display_name.is_empty() {
            self.session.user_id.clone()
        } else {
            self.session.display_name.clone()
        };
        let config = ConnectionConfig::new(
            Self::sanitize_endpoint(&self.server.endpoint),
            self.session.user_id.clone(),
            display_name,
            token,
        );
        config.validate()?;
        Ok(config)
    }

    /// Sanitize and normalize a broker endpoint.
    ///
    /// Strips quotes and trailing slashes and adds a scheme when missing:
    /// `ws://` for loopback and bare IPv4 hosts, `wss://` otherwise.
    pub fn sanitize_endpoint(endpoint: &str) -> String {
        let trimmed = endpoint.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else if trimmed.starts_with("localhost")
            || trimmed.starts_with(|c: char| c.is_ascii_digit())
        {
            format!("ws://{trimmed}")
        } else {
            format!("wss://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Immutable per-login connection parameters.
///
/// Created once per login session and handed to the session manager, which
/// owns it for the lifetime of the connection attempt. The token is opaque:
/// renewing it is the caller's job and is done by connecting again.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Broker WebSocket endpoint.
    pub endpoint: String,
    /// Current user identifier.
    pub user_id: String,
    /// Display name of the current user.
    pub display_name: String,
    /// Short-lived bearer credential.
    pub token: String,
}

impl ConnectionConfig {
    /// Create a new connection config.
    pub fn new(
        endpoint: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            token: token.into(),
        }
    }

    /// Check that every field needed for the handshake is present.
    pub fn validate(&self) -> ChatResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(ChatError::Config("user id must not be empty".into()));
        }
        if self.token.trim().is_empty() {
            return Err(ChatError::MissingConfig("auth token".into()));
        }
        self.connect_uri().map(|_| ())
    }

    /// The URI to open, with the token carried as a query parameter.
    ///
    /// Some transports cannot forward custom headers on the upgrade request,
    /// so the token travels both here and in [`Self::connect_headers`].
    pub fn connect_uri(&self) -> ChatResult<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        match url.scheme() {
            "ws" | "wss" => {}
            "http" => set_scheme(&mut url, "ws")?,
            "https" => set_scheme(&mut url, "wss")?,
            other => {
                return Err(ChatError::Config(format!(
                    "unsupported endpoint scheme: {other}"
                )))
            }
        }

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != constants::TOKEN_QUERY_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair(constants::TOKEN_QUERY_PARAM, &self.token);
        Ok(url)
    }

    /// Connect-time metadata sent with the handshake.
    pub fn connect_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {}", self.token));
        headers.insert("userId".to_string(), self.user_id.clone());
        headers.insert("displayName".to_string(), self.display_name.clone());
        headers
    }
}

fn set_scheme(url: &mut Url, scheme: &str) -> ChatResult<()> {
    url.set_scheme(scheme)
        .map_err(|()| ChatError::Config(format!("cannot switch endpoint scheme to {scheme}")))
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("token", &"<redacted>")
            .finish()
    }
}
