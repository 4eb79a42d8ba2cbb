//! Topic router.
//!
//! Owns the per-connection subscription table and turns inbound payloads into
//! typed frames and callback invocations. Subscriptions are installed and
//! removed as one batch; a connection is never left partially subscribed.

use tracing::{debug, warn};

use chat_core::constants::destinations::USER_PREFIX;
use chat_core::error::ChatResult;

use crate::callbacks::CallbackRegistry;
use crate::events::ErrorEvent;
use crate::frame::{Frame, FrameKind};
use crate::transport::{SubscriptionId, TransportConnection};

/// Inbound topics every session subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages,
    Typing,
    ReadReceipts,
    Presence,
    Errors,
}

impl Topic {
    /// All topics, in subscription order.
    pub const ALL: [Topic; 5] = [
        Topic::Messages,
        Topic::Typing,
        Topic::ReadReceipts,
        Topic::Presence,
        Topic::Errors,
    ];

    fn queue_name(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Typing => "typing",
            Self::ReadReceipts => "read",
            Self::Presence => "presence",
            Self::Errors => "errors",
        }
    }

    /// User-scoped destination: `/user/{user_id}/queue/{topic}`.
    pub fn destination(&self, user_id: &str) -> String {
        format!("{USER_PREFIX}/{user_id}/queue/{}", self.queue_name())
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    topic: Topic,
    destination: String,
    id: SubscriptionId,
}

/// Routes inbound traffic for one session.
pub struct TopicRouter {
    callbacks: CallbackRegistry,
    subscriptions: Vec<Subscription>,
}

impl TopicRouter {
    /// Create a router dispatching into `callbacks`.
    pub fn new(callbacks: CallbackRegistry) -> Self {
        Self {
            callbacks,
            subscriptions: Vec::new(),
        }
    }

    /// Whether any subscription is currently installed.
    pub fn is_subscribed(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Destinations currently subscribed, in install order.
    pub fn destinations(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .map(|s| s.destination.clone())
            .collect()
    }

    /// Subscribe every topic for `user_id`.
    ///
    /// All-or-nothing: on the first failure the subscriptions made so far are
    /// rolled back and the error is returned.
    pub async fn install_subscriptions(
        &mut self,
        connection: &dyn TransportConnection,
        user_id: &str,
    ) -> ChatResult<()> {
        if self.is_subscribed() {
            self.remove_subscriptions(connection).await;
        }

        let mut installed = Vec::with_capacity(Topic::ALL.len());
        for topic in Topic::ALL {
            let destination = topic.destination(user_id);
            match connection.subscribe(&destination).await {
                Ok(id) => installed.push(Subscription {
                    topic,
                    destination,
                    id,
                }),
                Err(e) => {
                    warn!("subscribing {destination} failed, rolling back: {e}");
                    for sub in &installed {
                        if let Err(e) = connection.unsubscribe(&sub.id).await {
                            debug!("rollback unsubscribe {} failed: {e}", sub.id);
                        }
                    }
                    return Err(e);
                }
            }
        }

        debug!("installed {} subscriptions for {user_id}", installed.len());
        self.subscriptions = installed;
        Ok(())
    }

    /// Unsubscribe everything. Failures are logged; the table is always emptied.
    pub async fn remove_subscriptions(&mut self, connection: &dyn TransportConnection) {
        for sub in self.subscriptions.drain(..) {
            if let Err(e) = connection.unsubscribe(&sub.id).await {
                debug!("unsubscribe {} failed: {e}", sub.destination);
            }
        }
    }

    /// Forget the table without talking to the connection.
    pub fn reset(&mut self) {
        self.subscriptions.clear();
    }

    /// Decode and dispatch one inbound payload.
    ///
    /// Unknown destinations and malformed payloads are logged and dropped.
    pub fn on_frame(&self, destination: &str, raw: &str) {
        let Some(topic) = self
            .subscriptions
            .iter()
            .find(|s| s.destination == destination)
            .map(|s| s.topic)
        else {
            debug!("dropping payload for unsubscribed destination {destination}");
            return;
        };

        if topic == Topic::Errors {
            let event = ErrorEvent::from_server_payload(raw);
            warn!("server error: {event}");
            self.callbacks.emit_error(&event);
            return;
        }

        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping malformed frame on {destination}: {e}");
                return;
            }
        };

        self.dispatch(topic, &frame);
    }

    fn dispatch(&self, topic: Topic, frame: &Frame) {
        match (topic, frame.kind) {
            (Topic::Presence, FrameKind::Join) => self.callbacks.emit_user_online(&frame.sender_id),
            (Topic::Presence, FrameKind::Leave) => self.callbacks.emit_user_offline(&frame.sender_id),
            (Topic::Presence, other) => debug!("ignoring {other} frame on presence topic"),

            (Topic::ReadReceipts, FrameKind::Read) => self.callbacks.emit_read_receipt(frame),
            (Topic::ReadReceipts, other) => debug!("ignoring {other} frame on read topic"),

            (Topic::Typing, FrameKind::Typing) => self.callbacks.emit_typing(frame, true),
            (Topic::Typing, FrameKind::StopTyping) => self.callbacks.emit_typing(frame, false),
            (Topic::Typing, other) => debug!("ignoring {other} frame on typing topic"),

            (Topic::Messages, FrameKind::Chat | FrameKind::Join | FrameKind::Leave) => {
                self.callbacks.emit_message(frame)
            }
            (Topic::Messages, FrameKind::Typing) => self.callbacks.emit_typing(frame, true),
            (Topic::Messages, FrameKind::StopTyping) => self.callbacks.emit_typing(frame, false),
            (Topic::Messages, FrameKind::Read) => self.callbacks.emit_read_receipt(frame),

            (Topic::Errors, _) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chat_core::error::ChatError;

    use crate::events::ErrorKind;

    /// Records subscribe calls; fails the subscribe with index `fail_at`.
    #[derive(Default)]
    struct FakeConnection {
        fail_at: Option<u32>,
        calls: AtomicU32,
        active: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TransportConnection for FakeConnection {
        async fn send(&self, _destination: &str, _payload: &str) -> ChatResult<()> {
            Ok(())
        }

        async fn subscribe(&self, destination: &str) -> ChatResult<SubscriptionId> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(n) {
                return Err(ChatError::Subscription("denied".into()));
            }
            self.active.lock().unwrap().push(destination.to_string());
            Ok(SubscriptionId(destination.to_string()))
        }

        async fn unsubscribe(&self, id: &SubscriptionId) -> ChatResult<()> {
            self.active.lock().unwrap().retain(|d| d != &id.0);
            Ok(())
        }

        async fn close(&self) {}
    }

    fn recording_router() -> (TopicRouter, Arc<Mutex<Vec<String>>>) {
        let callbacks = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = log.clone();
        callbacks.on_message(move |f| sink.lock().unwrap().push(format!("message:{}", f.kind)));
        let sink = log.clone();
        callbacks.on_typing(move |_, typing| sink.lock().unwrap().push(format!("typing:{typing}")));
        let sink = log.clone();
        callbacks.on_read_receipt(move |f| {
            sink.lock()
                .unwrap()
                .push(format!("read:{}", f.message_id.clone().unwrap_or_default()))
        });
        let sink = log.clone();
        callbacks.on_user_online(move |u| sink.lock().unwrap().push(format!("online:{u}")));
        let sink = log.clone();
        callbacks.on_user_offline(move |u| sink.lock().unwrap().push(format!("offline:{u}")));
        let sink = log.clone();
        callbacks.on_error(move |e| {
            assert_eq!(e.kind, ErrorKind::Server);
            sink.lock().unwrap().push(format!("error:{}", e.message))
        });

        (TopicRouter::new(callbacks), log)
    }

    #[test]
    fn test_topic_destinations() {
        assert_eq!(Topic::Messages.destination("u1"), "/user/u1/queue/messages");
        assert_eq!(Topic::ReadReceipts.destination("u1"), "/user/u1/queue/read");
        assert_eq!(Topic::Errors.destination("u1"), "/user/u1/queue/errors");
    }

    #[tokio::test]
    async fn test_install_subscribes_all_topics() {
        let conn = FakeConnection::default();
        let (mut router, _) = recording_router();

        router.install_subscriptions(&conn, "u1").await.unwrap();
        assert_eq!(router.destinations().len(), 5);
        assert_eq!(conn.active.lock().unwrap().len(), 5);

        router.remove_subscriptions(&conn).await;
        assert!(!router.is_subscribed());
        assert!(conn.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_rolls_back_on_failure() {
        let conn = FakeConnection {
            fail_at: Some(3),
            ..Default::default()
        };
        let (mut router, _) = recording_router();

        let err = router.install_subscriptions(&conn, "u1").await.unwrap_err();
        assert!(matches!(err, ChatError::Subscription(_)));
        assert!(!router.is_subscribed());
        assert!(conn.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_on_empty_table_is_noop() {
        let conn = FakeConnection::default();
        let (mut router, _) = recording_router();
        router.remove_subscriptions(&conn).await;
        assert!(!router.is_subscribed());
    }

    #[tokio::test]
    async fn test_dispatch_rules() {
        let conn = FakeConnection::default();
        let (mut router, log) = recording_router();
        router.install_subscriptions(&conn, "me").await.unwrap();

        let messages = Topic::Messages.destination("me");
        let typing = Topic::Typing.destination("me");
        let read = Topic::ReadReceipts.destination("me");
        let presence = Topic::Presence.destination("me");
        let errors = Topic::Errors.destination("me");

        router.on_frame(&messages, r#"{"type":"CHAT","senderId":"u2","receiverId":"me","content":"hi"}"#);
        router.on_frame(&messages, r#"{"type":"JOIN","senderId":"u2","conversationId":"g1"}"#);
        router.on_frame(&messages, r#"{"type":"STOP_TYPING","senderId":"u2","receiverId":"me"}"#);
        router.on_frame(&typing, r#"{"type":"TYPING","senderId":"u2","receiverId":"me"}"#);
        router.on_frame(&read, r#"{"type":"READ","senderId":"u2","receiverId":"me","messageId":"m1"}"#);
        router.on_frame(&presence, r#"{"type":"JOIN","senderId":"u3"}"#);
        router.on_frame(&presence, r#"{"type":"LEAVE","senderId":"u3"}"#);
        router.on_frame(&errors, r#"{"message":"slow down","code":429}"#);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "message:CHAT",
                "message:JOIN",
                "typing:false",
                "typing:true",
                "read:m1",
                "online:u3",
                "offline:u3",
                "error:slow down",
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_are_dropped() {
        let conn = FakeConnection::default();
        let (mut router, log) = recording_router();
        router.install_subscriptions(&conn, "me").await.unwrap();
        let messages = Topic::Messages.destination("me");

        router.on_frame(&messages, "not json");
        router.on_frame(&messages, r#"{"type":"SHOUT","senderId":"u2","receiverId":"me"}"#);
        router.on_frame(
            &messages,
            r#"{"type":"CHAT","senderId":"u2","receiverId":"me","conversationId":"g1","content":"x"}"#,
        );
        router.on_frame(&messages, r#"{"type":"CHAT","senderId":"u2","content":"x"}"#);
        router.on_frame(
            "/topic/elsewhere",
            r#"{"type":"CHAT","senderId":"u2","receiverId":"me","content":"hi"}"#,
        );

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_frames_before_install_are_dropped() {
        let (router, log) = recording_router();
        router.on_frame(
            &Topic::Messages.destination("me"),
            r#"{"type":"CHAT","senderId":"u2","receiverId":"me","content":"hi"}"#,
        );
        assert!(log.lock().unwrap().is_empty());
    }
}
