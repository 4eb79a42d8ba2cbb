//! Global error types for the chat client.
//!
//! All error categories across the workspace are unified into a single
//! `ChatError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using ChatError.
pub type ChatResult<T> = Result<T, ChatError>;

/// Unified error type covering all error categories in the chat client.
#[derive(Error, Debug)]
pub enum ChatError {
    // -- Configuration errors --
    /// Failed to load, parse or validate configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Connection errors --
    /// Transport-level failure: refused connection, socket reset, write error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The handshake or another bounded operation did not finish in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The broker rejected the credential during the handshake.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The peer spoke something other than the expected wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Subscribing to a topic failed.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// There is no live connection to send on.
    #[error("not connected")]
    NotConnected,

    // -- Frame errors --
    /// A frame violates the addressing or payload rules.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The outbound queue is at capacity.
    #[error("outbound queue full ({capacity} pending)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    /// Whether this error is a rejected credential.
    ///
    /// Retrying with the same token is pointless, so the session manager
    /// stops instead of scheduling another attempt.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }

    /// Whether the reconnection policy should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Timeout(_)
                | Self::Protocol(_)
                | Self::Subscription(_)
                | Self::NotConnected
                | Self::Io(_)
        )
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for ChatError {
    fn from(e: toml::de::Error) -> Self {
        ChatError::Config(e.to_string())
    }
}

impl From<url::ParseError> for ChatError {
    fn from(e: url::ParseError) -> Self {
        ChatError::Config(format!("invalid endpoint url: {e}"))
    }
}
