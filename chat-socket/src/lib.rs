//! Chat Socket - real-time session engine for the chat client.
//!
//! This crate provides the client side of a pub/sub chat broker:
//! - Session lifecycle with bounded reconnection and a handshake timeout
//! - Per-user topic subscriptions and typed frame dispatch
//! - An offline outbound queue flushed in order on reconnect
//! - Single-slot callbacks for the UI layer
//! - A STOMP-over-WebSocket transport

pub mod callbacks;
pub mod events;
pub mod frame;
pub mod manager;
pub mod queue;
pub mod router;
pub mod stomp;
pub mod transport;
pub mod ws;

// Re-export key types
pub use callbacks::CallbackRegistry;
pub use events::{ConnectionStatus, DisconnectReason, ErrorEvent, ErrorKind, SessionState};
pub use frame::{Address, DeliveryStatus, Frame, FrameKind};
pub use manager::{SendOutcome, SessionManager};
pub use queue::{FlushReport, OutboundEnvelope, OutboundQueue, QueueGuard};
pub use router::{Topic, TopicRouter};
pub use transport::{
    ConnectHeaders, OpenedConnection, SubscriptionId, Transport, TransportConnection,
    TransportEvent,
};
pub use ws::StompTransport;
