//! Session manager.
//!
//! Owns the single connection to the broker and its lifecycle:
//! connect, handshake, subscription install, queue flush, inbound dispatch,
//! bounded reconnection and teardown. Each `connect()` starts one session
//! task; a generation counter makes superseded tasks inert and their handle
//! is aborted, so at most one transport connection is live at a time.
//!
//! Outbound commands never wait on the session lock. They go through the
//! outbound queue's lock, which orders live sends against the flush.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::AbortHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use chat_core::config::{AppConfig, ConnectionConfig, ReconnectConfig};
use chat_core::error::{ChatError, ChatResult};

use crate::callbacks::CallbackRegistry;
use crate::events::{ConnectionStatus, DisconnectReason, ErrorEvent, ErrorKind, SessionState};
use crate::frame::{Address, Frame};
use crate::queue::{OutboundEnvelope, OutboundQueue};
use crate::router::TopicRouter;
use crate::transport::{Transport, TransportConnection, TransportEvent};

/// What happened to an outbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the live connection.
    Sent,
    /// Held in the outbound queue until the next connection.
    Queued,
}

/// Mutable session state, guarded by one lock.
struct Inner {
    state: SessionState,
    /// Failed reconnection attempts since the last successful connect.
    attempt: u32,
    connection: Option<Arc<dyn TransportConnection>>,
    router: TopicRouter,
    generation: u64,
}

/// Where outbound commands go while connected.
#[derive(Clone)]
struct LiveLink {
    connection: Arc<dyn TransportConnection>,
    config: ConnectionConfig,
}

struct Shared {
    transport: Arc<dyn Transport>,
    callbacks: CallbackRegistry,
    queue: OutboundQueue,
    reconnect: ReconnectConfig,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<ConnectionStatus>,
    /// Config of the requested session, `None` after logout.
    config: StdMutex<Option<ConnectionConfig>>,
    /// Session task. Kept outside `inner` so it can be aborted while the
    /// task holds that lock.
    task: StdMutex<Option<AbortHandle>>,
    /// Set under the queue lock once the queue has been flushed; cleared
    /// when the connection is released or a live send fails.
    live: StdMutex<Option<LiveLink>>,
}

/// The client session.
///
/// Lock order is `inner` then the outbound queue. The send path takes only
/// the queue lock.
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Create a manager over `transport`.
    ///
    /// `queue_capacity` bounds the offline queue; 0 means unbounded.
    pub fn new(
        transport: Arc<dyn Transport>,
        reconnect: ReconnectConfig,
        queue_capacity: usize,
    ) -> Self {
        let callbacks = CallbackRegistry::new();
        let (status_tx, _) = watch::channel(ConnectionStatus::idle());

        let inner = Inner {
            state: SessionState::Disconnected,
            attempt: 0,
            connection: None,
            router: TopicRouter::new(callbacks.clone()),
            generation: 0,
        };

        Self {
            shared: Arc::new(Shared {
                transport,
                callbacks,
                queue: OutboundQueue::new(queue_capacity),
                reconnect,
                inner: Mutex::new(inner),
                status_tx,
                config: StdMutex::new(None),
                task: StdMutex::new(None),
                live: StdMutex::new(None),
            }),
        }
    }

    /// Create a manager using the reconnect and queue settings of `config`.
    pub fn from_app_config(transport: Arc<dyn Transport>, config: &AppConfig) -> Self {
        Self::new(transport, config.reconnect.clone(), config.queue.capacity)
    }

    /// Callback slots for the UI layer.
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.shared.callbacks
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status_tx.borrow().clone()
    }

    /// Observe status changes.
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Whether the session is connected.
    pub fn is_connected(&self) -> bool {
        self.status().state == SessionState::Connected
    }

    /// Number of commands waiting in the outbound queue.
    pub async fn queued(&self) -> usize {
        self.shared.queue.len().await
    }

    /// Start a session with `config`.
    ///
    /// Returns once the session task is started; progress is reported through
    /// the status observers. A no-op while connecting or connected with an
    /// equal config. Otherwise any previous session is torn down first.
    pub async fn connect(&self, config: ConnectionConfig) -> ChatResult<()> {
        config.validate()?;

        let shared = &self.shared;
        let state = shared.status_tx.borrow().state;
        if matches!(state, SessionState::Connecting | SessionState::Connected)
            && shared.config_slot().as_ref() == Some(&config)
        {
            debug!("connect ignored, session already {state}");
            return Ok(());
        }

        shared.abort_task();
        let mut inner = shared.inner.lock().await;
        shared.teardown(&mut inner).await;
        inner.generation += 1;
        inner.attempt = 0;
        *shared.config_slot() = Some(config.clone());
        shared.publish(&mut inner, SessionState::Connecting, None);

        info!(
            "connecting to {} as {}",
            AppConfig::sanitize_endpoint(&config.endpoint),
            config.user_id
        );
        let generation = inner.generation;
        let task = tokio::spawn(run_session(shared.clone(), generation, config));
        *shared.task_slot() = Some(task.abort_handle());
        Ok(())
    }

    /// Tear the session down and stay disconnected. Queued commands are kept.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.abort_task();
        let mut inner = shared.inner.lock().await;
        shared.shutdown(&mut inner).await;
    }

    /// Disconnect, discard queued commands and forget the connection config.
    ///
    /// Returns the number of discarded commands.
    pub async fn logout(&self) -> usize {
        let shared = &self.shared;
        shared.abort_task();
        let mut inner = shared.inner.lock().await;
        shared.shutdown(&mut inner).await;
        *shared.config_slot() = None;
        drop(inner);
        let discarded = shared.queue.clear().await;
        info!("logged out, {discarded} queued command(s) discarded");
        discarded
    }

    /// Send a chat message.
    pub async fn send_message(
        &self,
        address: &Address,
        content: impl Into<String>,
    ) -> ChatResult<SendOutcome> {
        self.shared.submit(Frame::chat(address, content)).await
    }

    /// Send a chat message with a media attachment. `content` may be empty.
    pub async fn send_media(
        &self,
        address: &Address,
        content: impl Into<String>,
        media_url: impl Into<String>,
    ) -> ChatResult<SendOutcome> {
        let mut frame = Frame::chat(address, content).with_media(media_url);
        if frame.content.as_deref() == Some("") {
            frame.content = None;
        }
        self.shared.submit(frame).await
    }

    /// Signal that the user started typing.
    pub async fn send_typing(&self, address: &Address) -> ChatResult<SendOutcome> {
        self.shared.submit(Frame::typing(address)).await
    }

    /// Signal that the user stopped typing.
    pub async fn send_stop_typing(&self, address: &Address) -> ChatResult<SendOutcome> {
        self.shared.submit(Frame::stop_typing(address)).await
    }

    /// Mark `message_id` as read.
    pub async fn send_read_receipt(
        &self,
        address: &Address,
        message_id: impl Into<String>,
    ) -> ChatResult<SendOutcome> {
        self.shared
            .submit(Frame::read_receipt(address, message_id))
            .await
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shared.abort_task();
    }
}

impl Shared {
    fn config_slot(&self) -> StdMutexGuard<'_, Option<ConnectionConfig>> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task_slot(&self) -> StdMutexGuard<'_, Option<AbortHandle>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_slot(&self) -> StdMutexGuard<'_, Option<LiveLink>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the session task, including a pending retry.
    fn abort_task(&self) {
        if let Some(task) = self.task_slot().take() {
            task.abort();
        }
    }

    /// Stop routing sends to `connection`, unless it was already replaced.
    fn unlink(&self, connection: &Arc<dyn TransportConnection>) {
        let mut live = self.live_slot();
        if live
            .as_ref()
            .is_some_and(|link| Arc::ptr_eq(&link.connection, connection))
        {
            *live = None;
        }
    }

    /// Record the new state and notify observers if the status changed.
    fn publish(&self, inner: &mut Inner, state: SessionState, reason: Option<DisconnectReason>) {
        inner.state = state;
        let status = ConnectionStatus {
            state,
            attempt: inner.attempt,
            reason,
        };

        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if changed {
            info!("session {status}");
            self.callbacks.emit_status(&status);
        }
    }

    /// Unsubscribe and close the live connection, if any.
    async fn release_connection(&self, inner: &mut Inner) {
        self.live_slot().take();
        match inner.connection.take() {
            Some(connection) => {
                inner.router.remove_subscriptions(connection.as_ref()).await;
                connection.close().await;
            }
            None => inner.router.reset(),
        }
    }

    /// Cancel the session task and release the connection.
    async fn teardown(&self, inner: &mut Inner) {
        self.abort_task();
        self.release_connection(inner).await;
    }

    async fn shutdown(&self, inner: &mut Inner) {
        self.teardown(inner).await;
        inner.generation += 1;
        inner.attempt = 0;
        if inner.state != SessionState::Disconnected {
            self.publish(inner, SessionState::Disconnected, Some(DisconnectReason::Requested));
            info!("disconnected");
        }
    }

    /// Queue `frame` and, while connected, flush the queue through the live
    /// connection. A failed or stalled write leaves the rest queued and
    /// closes the connection so the session reconnects and retries.
    async fn submit(&self, frame: Frame) -> ChatResult<SendOutcome> {
        frame.validate()?;
        // An unencodable frame must not sit at the head of the queue.
        frame.encode()?;

        let mut queue = self.queue.lock().await;
        queue.push(OutboundEnvelope::new(frame))?;
        let Some(link) = self.live_slot().clone() else {
            return Ok(SendOutcome::Queued);
        };

        let limit = self.reconnect.handshake_timeout();
        let connection = link.connection.as_ref();
        let config = &link.config;
        let report = queue
            .flush(move |envelope| transmit_within(limit, connection, envelope.frame, config))
            .await;

        let Some(e) = report.error else {
            return Ok(SendOutcome::Sent);
        };
        warn!(
            "send on live connection failed, reconnecting with {} frame(s) queued: {e}",
            report.remaining
        );
        self.unlink(&link.connection);
        drop(queue);
        link.connection.close().await;
        Ok(SendOutcome::Queued)
    }

    /// Open, subscribe and flush. `Ok(None)` means the session was superseded.
    async fn establish(
        &self,
        generation: u64,
        config: &ConnectionConfig,
    ) -> ChatResult<Option<mpsc::Receiver<TransportEvent>>> {
        let uri = config.connect_uri()?;
        let headers = config.connect_headers();
        let opened = self.transport.open(&uri, &headers).await?;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            opened.connection.close().await;
            return Ok(None);
        }
        inner.connection = Some(opened.connection.clone());
        inner
            .router
            .install_subscriptions(opened.connection.as_ref(), &config.user_id)
            .await?;

        let mut queue = self.queue.lock().await;
        let connection = opened.connection.as_ref();
        let report = queue
            .flush(move |envelope| transmit(connection, envelope.frame, config))
            .await;
        if let Some(e) = report.error {
            return Err(e);
        }
        *self.live_slot() = Some(LiveLink {
            connection: opened.connection.clone(),
            config: config.clone(),
        });
        drop(queue);

        inner.attempt = 0;
        self.publish(&mut inner, SessionState::Connected, None);
        Ok(Some(opened.events))
    }

    /// Dispatch inbound events until the connection fails. Returns the cause.
    async fn pump(&self, generation: u64, mut events: mpsc::Receiver<TransportEvent>) -> ChatError {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message {
                    destination,
                    payload,
                } => {
                    let inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return ChatError::Internal("session superseded".into());
                    }
                    inner.router.on_frame(&destination, &payload);
                }
                TransportEvent::Error(message) => return ChatError::Transport(message),
                TransportEvent::Closed(reason) => {
                    return ChatError::Transport(match reason {
                        Some(reason) if !reason.is_empty() => format!("connection closed: {reason}"),
                        _ => "connection closed".to_string(),
                    })
                }
            }
        }
        ChatError::Transport("event stream ended".into())
    }

    /// Apply the reconnection policy. Returns the delay before the next
    /// attempt, or `None` when the session is over.
    async fn on_failure(&self, generation: u64, cause: ChatError) -> Option<Duration> {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return None;
        }
        self.release_connection(&mut inner).await;

        if cause.is_auth() {
            error!("credential rejected: {cause}");
            self.publish(
                &mut inner,
                SessionState::Disconnected,
                Some(DisconnectReason::AuthRejected),
            );
            self.callbacks
                .emit_error(&ErrorEvent::new(ErrorKind::Auth, cause.to_string()));
            return None;
        }

        if inner.attempt >= self.reconnect.max_attempts {
            error!(
                "giving up after {} reconnection attempt(s): {cause}",
                inner.attempt
            );
            self.publish(
                &mut inner,
                SessionState::Disconnected,
                Some(DisconnectReason::RetriesExhausted),
            );
            self.callbacks.emit_error(&ErrorEvent::new(
                ErrorKind::RetriesExhausted,
                format!(
                    "connection lost after {} reconnection attempt(s): {cause}",
                    inner.attempt
                ),
            ));
            return None;
        }

        inner.attempt += 1;
        let delay = self.reconnect_delay();
        warn!(
            "connection failed ({cause}), attempt {}/{} in {:.1}s",
            inner.attempt,
            self.reconnect.max_attempts,
            delay.as_secs_f64()
        );
        self.publish(&mut inner, SessionState::Reconnecting, None);
        Some(delay)
    }

    /// Fixed delay, spread by +/- `jitter_factor` when configured.
    fn reconnect_delay(&self) -> Duration {
        let base = self.reconnect.delay().as_secs_f64();
        let jitter_factor = self.reconnect.jitter_factor.clamp(0.0, 1.0);
        if jitter_factor == 0.0 {
            return self.reconnect.delay();
        }
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * base * jitter_factor;
        Duration::from_secs_f64((base + jitter).max(0.0))
    }
}

/// The session task: establish, pump, retry.
async fn run_session(shared: Arc<Shared>, generation: u64, config: ConnectionConfig) {
    let handshake_timeout = shared.reconnect.handshake_timeout();

    loop {
        let established = match timeout(handshake_timeout, shared.establish(generation, &config)).await
        {
            Ok(result) => result,
            Err(_) => Err(ChatError::Timeout(format!(
                "handshake not completed within {}ms",
                handshake_timeout.as_millis()
            ))),
        };

        let cause = match established {
            Ok(Some(events)) => shared.pump(generation, events).await,
            Ok(None) => return,
            Err(e) => e,
        };

        match shared.on_failure(generation, cause).await {
            Some(delay) => sleep(delay).await,
            None => return,
        }
    }
}

/// Publish one frame on `connection`, stamping the sender if it is unset.
async fn transmit(
    connection: &dyn TransportConnection,
    mut frame: Frame,
    config: &ConnectionConfig,
) -> ChatResult<()> {
    stamp_sender(&mut frame, config);
    let payload = frame.encode()?;
    connection.send(frame.kind.destination(), &payload).await
}

/// [`transmit`], failing with a timeout after `limit`.
async fn transmit_within(
    limit: Duration,
    connection: &dyn TransportConnection,
    frame: Frame,
    config: &ConnectionConfig,
) -> ChatResult<()> {
    bounded(limit, transmit(connection, frame, config)).await
}

async fn bounded(limit: Duration, write: impl Future<Output = ChatResult<()>>) -> ChatResult<()> {
    match timeout(limit, write).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::Timeout(format!(
            "write not completed within {}ms",
            limit.as_millis()
        ))),
    }
}

fn stamp_sender(frame: &mut Frame, config: &ConnectionConfig) {
    if frame.sender_id.is_empty() {
        frame.sender_id = config.user_id.clone();
        frame.sender_name = config.display_name.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::transport::{ConnectHeaders, OpenedConnection};

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn open(&self, _uri: &url::Url, _headers: &ConnectHeaders) -> ChatResult<OpenedConnection> {
            Err(ChatError::Transport("unreachable".into()))
        }
    }

    fn manager(reconnect: ReconnectConfig) -> SessionManager {
        SessionManager::new(Arc::new(Unreachable), reconnect, 2)
    }

    #[test]
    fn test_fixed_delay_without_jitter() {
        let m = manager(ReconnectConfig {
            delay_ms: 3000,
            jitter_factor: 0.0,
            ..Default::default()
        });
        assert_eq!(m.shared.reconnect_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        let m = manager(ReconnectConfig {
            delay_ms: 1000,
            jitter_factor: 0.5,
            ..Default::default()
        });
        for _ in 0..50 {
            let delay = m.shared.reconnect_delay();
            assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1500));
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_synchronously() {
        let m = manager(ReconnectConfig::default());
        let err = m
            .connect(ConnectionConfig::new("ws://localhost/ws", "", "", "tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
        assert_eq!(m.status(), ConnectionStatus::idle());
    }

    #[tokio::test]
    async fn test_sends_while_disconnected_are_queued_until_full() {
        let m = manager(ReconnectConfig::default());
        let group = Address::group("g1");

        assert_eq!(m.send_typing(&group).await.unwrap(), SendOutcome::Queued);
        assert_eq!(m.send_stop_typing(&group).await.unwrap(), SendOutcome::Queued);
        let err = m.send_message(&group, "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::QueueFull { capacity: 2 }));
        assert_eq!(m.queued().await, 2);

        assert_eq!(m.logout().await, 2);
        assert_eq!(m.queued().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_frame_is_not_queued() {
        let m = manager(ReconnectConfig::default());
        let err = m.send_message(&Address::direct("u2"), "").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidFrame(_)));
        assert_eq!(m.queued().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_emits_nothing() {
        let m = manager(ReconnectConfig::default());
        let mut rx = m.status_receiver();
        m.disconnect().await;
        m.disconnect().await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(m.status(), ConnectionStatus::idle());
    }
}
