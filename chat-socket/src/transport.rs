//! Transport boundary consumed by the session manager.
//!
//! A [`Transport`] opens one message-framed, pub/sub-capable connection and
//! completes the broker handshake before returning. The returned
//! [`TransportConnection`] publishes, subscribes and closes; inbound traffic
//! and lifecycle changes arrive on the paired event channel in the order the
//! wire delivered them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use chat_core::error::ChatResult;

/// Connect-time metadata passed with the handshake.
pub type ConnectHeaders = BTreeMap<String, String>;

/// Handle for one active subscription on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle and inbound events of an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message arrived on a subscribed destination.
    Message {
        /// Destination the message was published to.
        destination: String,
        /// Raw payload.
        payload: String,
    },
    /// Transport-level failure; the connection should be considered dead.
    Error(String),
    /// The peer or the network closed the connection.
    Closed(Option<String>),
}

/// An opened, handshaken connection plus its inbound event stream.
pub struct OpenedConnection {
    /// Command side of the connection.
    pub connection: Arc<dyn TransportConnection>,
    /// Inbound side; closes when the connection is gone.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for connections. One per session manager.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `uri` and complete the handshake.
    ///
    /// Returns [`chat_core::ChatError::AuthRejected`] when the broker refuses
    /// the credential; any other error is treated as transient.
    async fn open(&self, uri: &Url, headers: &ConnectHeaders) -> ChatResult<OpenedConnection>;
}

/// Command side of one open connection.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Publish `payload` to `destination`.
    async fn send(&self, destination: &str, payload: &str) -> ChatResult<()>;

    /// Start receiving messages published to `destination`.
    async fn subscribe(&self, destination: &str) -> ChatResult<SubscriptionId>;

    /// Stop a subscription.
    async fn unsubscribe(&self, id: &SubscriptionId) -> ChatResult<()>;

    /// Close the connection. Idempotent. The connection's event stream
    /// ends once it is closed.
    async fn close(&self);
}
