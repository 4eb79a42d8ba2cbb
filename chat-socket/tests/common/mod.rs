//! Shared test utilities for integration tests.
//!
//! `MockTransport` is a scripted in-memory broker: each `open` follows the
//! next scripted behavior, every connection handle is counted while live,
//! outbound sends are recorded, and tests push inbound traffic through the
//! most recent connection's event channel. Closing a connection ends its
//! event stream, like a real socket going away.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use chat_core::config::{ConnectionConfig, ReconnectConfig};
use chat_core::error::{ChatError, ChatResult};
use chat_socket::{
    ConnectHeaders, ConnectionStatus, ErrorEvent, Frame, OpenedConnection, SessionManager,
    SubscriptionId, Transport, TransportConnection, TransportEvent,
};

/// How one `open` call behaves.
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    /// Handshake succeeds.
    Accept,
    /// Transient failure (refused, reset).
    Fail,
    /// Broker rejects the credential.
    Reject,
    /// Never completes; only the handshake timeout ends it.
    Hang,
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<OpenBehavior>>,
    default_behavior: Mutex<Option<OpenBehavior>>,
    opens: AtomicU32,
    live: AtomicUsize,
    max_live: AtomicUsize,
    fail_next_subscribe: AtomicBool,
    /// Sends attempted on open connections.
    send_calls: AtomicUsize,
    /// Send call number that fails; 0 = none.
    fail_send_at: AtomicUsize,
    /// Send call number that never completes; 0 = none.
    stall_send_at: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<Vec<String>>,
    handshakes: Mutex<Vec<(Url, ConnectHeaders)>>,
    inbound: Mutex<Option<mpsc::WeakSender<TransportEvent>>>,
}

/// Scripted transport. Clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Accepts every handshake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior once the script runs out.
    pub fn with_default(self, behavior: OpenBehavior) -> Self {
        *self.state.default_behavior.lock().unwrap() = Some(behavior);
        self
    }

    /// Behaviors for the next opens, in order.
    pub fn script(self, behaviors: impl IntoIterator<Item = OpenBehavior>) -> Self {
        self.state.script.lock().unwrap().extend(behaviors);
        self
    }

    /// Fail the next subscribe call.
    pub fn fail_next_subscribe(&self) {
        self.state.fail_next_subscribe.store(true, Ordering::SeqCst);
    }

    /// Fail the `n`th send from now (1 = the next one).
    pub fn fail_nth_send(&self, n: usize) {
        let at = self.state.send_calls.load(Ordering::SeqCst) + n;
        self.state.fail_send_at.store(at, Ordering::SeqCst);
    }

    /// Make the next send hang until the caller gives up on it.
    pub fn stall_next_send(&self) {
        let at = self.state.send_calls.load(Ordering::SeqCst) + 1;
        self.state.stall_send_at.store(at, Ordering::SeqCst);
    }

    pub fn opens(&self) -> u32 {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    /// Destinations currently subscribed.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().unwrap().clone()
    }

    /// URI and headers of every handshake attempt.
    pub fn handshakes(&self) -> Vec<(Url, ConnectHeaders)> {
        self.state.handshakes.lock().unwrap().clone()
    }

    /// Contents of the published chat frames, in wire order.
    pub fn sent_contents(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(_, frame)| frame.content)
            .collect()
    }

    /// Every published frame as (destination, frame).
    pub fn sent(&self) -> Vec<(String, Frame)> {
        self.state
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(dest, payload)| {
                let frame: Frame = serde_json::from_str(payload).expect("outbound frame is json");
                (dest.clone(), frame)
            })
            .collect()
    }

    /// Push an inbound message through the current connection.
    pub async fn inject(&self, destination: &str, payload: &str) {
        self.push(TransportEvent::Message {
            destination: destination.to_string(),
            payload: payload.to_string(),
        })
        .await;
    }

    /// Simulate the broker dropping the current connection.
    pub async fn drop_connection(&self) {
        self.push(TransportEvent::Closed(Some("broker went away".into())))
            .await;
    }

    async fn push(&self, event: TransportEvent) {
        let tx = self
            .state
            .inbound
            .lock()
            .unwrap()
            .as_ref()
            .and_then(mpsc::WeakSender::upgrade)
            .expect("no open connection");
        tx.send(event).await.expect("session stopped reading");
    }

    fn next_behavior(&self) -> OpenBehavior {
        self.state
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.state.default_behavior.lock().unwrap().clone())
            .unwrap_or(OpenBehavior::Accept)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, uri: &Url, headers: &ConnectHeaders) -> ChatResult<OpenedConnection> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state
            .handshakes
            .lock()
            .unwrap()
            .push((uri.clone(), headers.clone()));

        match self.next_behavior() {
            OpenBehavior::Accept => {}
            OpenBehavior::Fail => return Err(ChatError::Transport("connection refused".into())),
            OpenBehavior::Reject => return Err(ChatError::AuthRejected("token expired".into())),
            OpenBehavior::Hang => return std::future::pending().await,
        }

        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live.fetch_max(live, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        *self.state.inbound.lock().unwrap() = Some(tx.downgrade());

        Ok(OpenedConnection {
            connection: Arc::new(MockConnection {
                state: self.state.clone(),
                closed: AtomicBool::new(false),
                events: Mutex::new(Some(tx)),
            }),
            events: rx,
        })
    }
}

struct MockConnection {
    state: Arc<MockState>,
    closed: AtomicBool,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl MockConnection {
    fn release(&self) {
        self.events.lock().unwrap().take();
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl TransportConnection for MockConnection {
    async fn send(&self, destination: &str, payload: &str) -> ChatResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::NotConnected);
        }
        let call = self.state.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .state
            .stall_send_at
            .compare_exchange(call, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            std::future::pending::<()>().await;
        }
        if self
            .state
            .fail_send_at
            .compare_exchange(call, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Err(ChatError::Transport("write failed".into()));
        }
        self.state
            .sent
            .lock()
            .unwrap()
            .push((destination.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, destination: &str) -> ChatResult<SubscriptionId> {
        if self.state.fail_next_subscribe.swap(false, Ordering::SeqCst) {
            return Err(ChatError::Subscription(format!("{destination} denied")));
        }
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .push(destination.to_string());
        Ok(SubscriptionId(destination.to_string()))
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> ChatResult<()> {
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .retain(|d| d != &id.0);
        Ok(())
    }

    async fn close(&self) {
        self.release();
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.release();
    }
}

/// Connection config for user `me`.
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("ws://broker.test/ws", "me", "Me", "tok-1")
}

/// Millisecond-scale reconnect policy.
pub fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        max_attempts,
        delay_ms: 10,
        jitter_factor: 0.0,
        handshake_timeout_ms: 200,
    }
}

/// Reconnect policy whose timeouts are far longer than any test.
pub fn slow_timeouts(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        handshake_timeout_ms: 30_000,
        ..fast_reconnect(max_attempts)
    }
}

/// A manager over `transport` with a fast policy and an unbounded queue.
pub fn create_test_manager(transport: &MockTransport, max_attempts: u32) -> SessionManager {
    SessionManager::new(Arc::new(transport.clone()), fast_reconnect(max_attempts), 0)
}

/// Record every status change.
pub fn record_statuses(manager: &SessionManager) -> Arc<Mutex<Vec<ConnectionStatus>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    manager
        .callbacks()
        .on_connection_status_change(move |s| sink.lock().unwrap().push(s.clone()));
    log
}

/// Record every error event.
pub fn record_errors(manager: &SessionManager) -> Arc<Mutex<Vec<ErrorEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    manager
        .callbacks()
        .on_error(move |e| sink.lock().unwrap().push(e.clone()));
    log
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
