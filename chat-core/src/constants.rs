//! Application-wide constants.

/// Application name, used for the config and data directories.
pub const APP_NAME: &str = "ChatClient";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum automatic reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed delay between reconnection attempts in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

/// Upper bound for open + handshake + subscription install, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Bound on the best-effort unsubscribe and DISCONNECT writes at teardown.
pub const TEARDOWN_GRACE_MS: u64 = 2_000;

/// Maximum number of commands held while offline.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000;

/// Capacity of the per-connection inbound event channel.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Query parameter carrying the bearer token on the connection URI.
pub const TOKEN_QUERY_PARAM: &str = "access_token";

/// Broker destinations for outbound commands.
pub mod destinations {
    /// Chat, join and leave frames.
    pub const SEND_MESSAGE: &str = "/app/chat.send";
    /// Typing and stop-typing frames.
    pub const SEND_TYPING: &str = "/app/chat.typing";
    /// Read receipts.
    pub const SEND_READ: &str = "/app/chat.read";

    /// Prefix for per-user inbound queues: `/user/{id}/queue/{topic}`.
    pub const USER_PREFIX: &str = "/user";
}
