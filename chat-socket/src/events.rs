//! Session state and the status/error events published to the UI layer.

use serde::Serialize;

/// Connection state of the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// First handshake in flight.
    Connecting,
    /// Handshake done, subscriptions installed, queue flushed.
    Connected,
    /// Connection lost, waiting to retry or retrying.
    Reconnecting,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Why the session ended up disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// `disconnect()` or `logout()` was called.
    Requested,
    /// The reconnection policy ran out of attempts.
    RetriesExhausted,
    /// The broker rejected the credential.
    AuthRejected,
}

/// Snapshot published on every status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: SessionState,
    /// Failed reconnection attempts since the last successful connect.
    pub attempt: u32,
    /// Set when `state` is `Disconnected` after a session existed.
    pub reason: Option<DisconnectReason>,
}

impl ConnectionStatus {
    /// The initial status: disconnected, nothing attempted.
    pub fn idle() -> Self {
        Self {
            state: SessionState::Disconnected,
            attempt: 0,
            reason: None,
        }
    }

    /// Whether the status is a disconnect the session will not recover from
    /// on its own.
    pub fn is_terminal(&self) -> bool {
        self.state == SessionState::Disconnected
            && matches!(
                self.reason,
                Some(DisconnectReason::RetriesExhausted | DisconnectReason::AuthRejected)
            )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.state, self.reason) {
            (SessionState::Reconnecting, _) => write!(f, "reconnecting (attempt {})", self.attempt),
            (state, Some(reason)) => write!(f, "{state} ({reason:?})"),
            (state, None) => write!(f, "{state}"),
        }
    }
}

/// Category of an error delivered to the error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Pushed by the broker on the errors topic.
    Server,
    /// Handshake rejected; a fresh credential is needed.
    Auth,
    /// Automatic reconnection gave up.
    RetriesExhausted,
}

/// An error surfaced to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Broker error code, when the broker sent one.
    pub code: Option<String>,
}

impl ErrorEvent {
    /// Create an error event without a code.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Parse a payload from the server errors topic.
    ///
    /// Accepts `{"message": .., "code": ..}` (alias `error` for `message`,
    /// numeric or string code) and falls back to the raw text.
    pub fn from_server_payload(raw: &str) -> Self {
        let parsed = serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .filter(|v| v.is_object());

        let Some(value) = parsed else {
            return Self::new(ErrorKind::Server, raw.trim());
        };

        let message = value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| raw.trim().to_string());
        let code = value.get("code").and_then(|c| match c {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Self {
            kind: ErrorKind::Server,
            message,
            code,
        }
    }
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{:?} error [{code}]: {}", self.kind, self.message),
            None => write!(f, "{:?} error: {}", self.kind, self.message),
        }
    }
}
