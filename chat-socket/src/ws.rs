//! STOMP-over-WebSocket implementation of [`Transport`].
//!
//! `open` performs the WebSocket upgrade, sends `CONNECT` with the session
//! headers and waits for `CONNECTED`. A reader task then turns inbound
//! `MESSAGE` frames into [`TransportEvent`]s until the socket goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use chat_core::constants::{INBOUND_CHANNEL_CAPACITY, TEARDOWN_GRACE_MS};
use chat_core::error::{ChatError, ChatResult};

use crate::stomp::{is_heartbeat, StompCommand, StompFrame};
use crate::transport::{
    ConnectHeaders, OpenedConnection, SubscriptionId, Transport, TransportConnection,
    TransportEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Subscription id -> subscribed destination, shared with the reader task.
type SubscriptionTable = Arc<StdMutex<HashMap<String, String>>>;

/// Teardown writes queue behind any stalled send on the sink.
const TEARDOWN_GRACE: Duration = Duration::from_millis(TEARDOWN_GRACE_MS);

/// Opens STOMP 1.2 sessions over WebSocket.
#[derive(Debug, Clone)]
pub struct StompTransport {
    inbound_capacity: usize,
}

impl StompTransport {
    /// Create a transport with the default inbound buffer.
    pub fn new() -> Self {
        install_crypto_provider();
        Self {
            inbound_capacity: INBOUND_CHANNEL_CAPACITY,
        }
    }

    /// Override the inbound event buffer size.
    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }
}

impl Default for StompTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StompTransport {
    async fn open(&self, uri: &Url, headers: &ConnectHeaders) -> ChatResult<OpenedConnection> {
        let mut request = uri
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::Config(format!("invalid websocket request: {e}")))?;

        // Some brokers authenticate the upgrade itself rather than CONNECT.
        if let Some(auth) = headers.get("Authorization") {
            let value = HeaderValue::from_str(auth)
                .map_err(|e| ChatError::Config(format!("invalid authorization header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        debug!("opening websocket to {}", redacted(uri));
        let (ws, _) = connect_async(request).await.map_err(map_upgrade_error)?;
        let (mut sink, mut source) = ws.split();

        let mut connect = StompFrame::new(StompCommand::Connect)
            .header("accept-version", "1.2")
            .header("host", uri.host_str().unwrap_or("localhost"))
            .header("heart-beat", "0,0");
        for (name, value) in headers {
            connect = connect.header(name.as_str(), value.as_str());
        }
        sink.send(Message::Text(connect.encode().into()))
            .await
            .map_err(|e| ChatError::Transport(format!("failed to send CONNECT: {e}")))?;

        let connected = await_connected(&mut source).await?;
        info!(
            "stomp session established (version {})",
            connected.get_header("version").unwrap_or("unknown")
        );

        let subscriptions: SubscriptionTable = Arc::default();
        let (tx, rx) = mpsc::channel(self.inbound_capacity);
        let reader = tokio::spawn(read_loop(source, subscriptions.clone(), tx));

        let connection = StompConnection {
            sink: Mutex::new(sink),
            subscriptions,
            next_subscription: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            reader: reader.abort_handle(),
        };

        Ok(OpenedConnection {
            connection: Arc::new(connection),
            events: rx,
        })
    }
}

/// One live STOMP session.
struct StompConnection {
    sink: Mutex<WsSink>,
    subscriptions: SubscriptionTable,
    next_subscription: AtomicU64,
    closed: AtomicBool,
    reader: AbortHandle,
}

impl StompConnection {
    async fn write(&self, frame: StompFrame) -> ChatResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::NotConnected);
        }
        self.sink
            .lock()
            .await
            .send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| ChatError::Transport(format!("websocket write failed: {e}")))
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransportConnection for StompConnection {
    async fn send(&self, destination: &str, payload: &str) -> ChatResult<()> {
        let frame = StompFrame::new(StompCommand::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(payload);
        self.write(frame).await
    }

    async fn subscribe(&self, destination: &str) -> ChatResult<SubscriptionId> {
        let id = format!("sub-{}", self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.table().insert(id.clone(), destination.to_string());

        let frame = StompFrame::new(StompCommand::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "auto");
        if let Err(e) = self.write(frame).await {
            self.table().remove(&id);
            return Err(ChatError::Subscription(format!(
                "subscribe to {destination} failed: {e}"
            )));
        }

        debug!("subscribed {id} -> {destination}");
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> ChatResult<()> {
        self.table().remove(&id.0);
        let frame = StompFrame::new(StompCommand::Unsubscribe).header("id", id.0.as_str());
        timeout(TEARDOWN_GRACE, self.write(frame))
            .await
            .map_err(|_| ChatError::Timeout(format!("UNSUBSCRIBE {} not written", id.0)))?
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let goodbye = async {
            let mut sink = self.sink.lock().await;
            let disconnect = StompFrame::new(StompCommand::Disconnect).encode();
            if let Err(e) = sink.send(Message::Text(disconnect.into())).await {
                debug!("DISCONNECT not delivered: {e}");
            }
            if let Err(e) = sink.close().await {
                debug!("websocket close failed: {e}");
            }
        };
        if timeout(TEARDOWN_GRACE, goodbye).await.is_err() {
            debug!("websocket close timed out, dropping the socket");
        }
        self.reader.abort();
        self.table().clear();
        debug!("stomp connection closed");
    }
}

impl Drop for StompConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Wait for the broker's answer to CONNECT.
async fn await_connected(source: &mut WsSource) -> ChatResult<StompFrame> {
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec())
                .map_err(|_| ChatError::Protocol("non-utf8 handshake frame".into()))?,
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(ChatError::Transport(format!(
                    "connection closed during handshake {reason}"
                )));
            }
            Ok(_) => continue,
            Err(e) => return Err(ChatError::Transport(e.to_string())),
        };
        if is_heartbeat(&text) {
            continue;
        }

        let frame = StompFrame::decode(&text)?;
        return match frame.command {
            StompCommand::Connected => Ok(frame),
            StompCommand::Error => Err(ChatError::AuthRejected(frame.error_message())),
            other => Err(ChatError::Protocol(format!(
                "expected CONNECTED, got {}",
                other.as_str()
            ))),
        };
    }
    Err(ChatError::Transport("connection closed during handshake".into()))
}

/// Forward inbound frames until the socket ends.
async fn read_loop(
    mut source: WsSource,
    subscriptions: SubscriptionTable,
    tx: mpsc::Sender<TransportEvent>,
) {
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("dropping non-utf8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| f.reason.to_string());
                let _ = tx.send(TransportEvent::Closed(reason)).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        };
        if is_heartbeat(&text) {
            continue;
        }

        let frame = match StompFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping undecodable stomp frame: {e}");
                continue;
            }
        };

        match frame.command {
            StompCommand::Message => {
                let destination = frame
                    .get_header("subscription")
                    .and_then(|id| {
                        subscriptions
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get(id)
                            .cloned()
                    })
                    .or_else(|| frame.get_header("destination").map(str::to_string));
                let Some(destination) = destination else {
                    warn!("dropping MESSAGE without destination");
                    continue;
                };
                let event = TransportEvent::Message {
                    destination,
                    payload: frame.body,
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            StompCommand::Error => {
                // The broker closes the session after ERROR.
                let _ = tx.send(TransportEvent::Error(frame.error_message())).await;
                return;
            }
            other => debug!("ignoring {} frame", other.as_str()),
        }
    }
    let _ = tx.send(TransportEvent::Closed(None)).await;
}

/// `wss://` needs a process-wide rustls provider. Losing the race to
/// another installer is fine.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn map_upgrade_error(err: WsError) -> ChatError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            match status.as_u16() {
                401 | 403 => ChatError::AuthRejected(format!("upgrade refused with HTTP {status}")),
                _ => ChatError::Transport(format!("upgrade failed with HTTP {status}")),
            }
        }
        other => ChatError::Transport(other.to_string()),
    }
}

/// The URI without its query, which carries the token.
fn redacted(uri: &Url) -> String {
    let mut shown = uri.clone();
    shown.set_query(None);
    shown.to_string()
}
