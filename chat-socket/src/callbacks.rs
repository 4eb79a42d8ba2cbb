//! Single-slot callback registry exposed to the UI layer.
//!
//! Each event category holds at most one handler; registering again replaces
//! the previous one. This assumes exactly one UI context consumes each
//! category at a time. Callers that need several listeners fan out from
//! their own handler.
//!
//! Handlers run synchronously on the session's dispatch task, so they should
//! hand heavy work off instead of blocking.

use std::sync::{Arc, PoisonError, RwLock};

use crate::events::{ConnectionStatus, ErrorEvent};
use crate::frame::Frame;

type FrameHandler = Arc<dyn Fn(&Frame) + Send + Sync>;
type TypingHandler = Arc<dyn Fn(&Frame, bool) + Send + Sync>;
type UserHandler = Arc<dyn Fn(&str) + Send + Sync>;
type StatusHandler = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&ErrorEvent) + Send + Sync>;

/// One replaceable handler.
struct Slot<H: ?Sized> {
    handler: RwLock<Option<Arc<H>>>,
}

impl<H: ?Sized> Slot<H> {
    fn new() -> Self {
        Self {
            handler: RwLock::new(None),
        }
    }

    fn set(&self, handler: Arc<H>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn clear(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Clone the handler out so it runs without the lock held; a handler may
    /// re-register itself.
    fn get(&self) -> Option<Arc<H>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_set(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<H: ?Sized> Default for Slot<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Slots {
    message: Slot<dyn Fn(&Frame) + Send + Sync>,
    typing: Slot<dyn Fn(&Frame, bool) + Send + Sync>,
    read_receipt: Slot<dyn Fn(&Frame) + Send + Sync>,
    user_online: Slot<dyn Fn(&str) + Send + Sync>,
    user_offline: Slot<dyn Fn(&str) + Send + Sync>,
    status: Slot<dyn Fn(&ConnectionStatus) + Send + Sync>,
    error: Slot<dyn Fn(&ErrorEvent) + Send + Sync>,
}

/// The public callback surface. Cheap to clone; clones share the slots.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    slots: Arc<Slots>,
}

impl CallbackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chat, join and leave frames from the messages channel.
    pub fn on_message(&self, handler: impl Fn(&Frame) + Send + Sync + 'static) {
        let handler: FrameHandler = Arc::new(handler);
        self.slots.message.set(handler);
    }

    /// Typing signals; the flag is `true` for typing and `false` for stop-typing.
    pub fn on_typing(&self, handler: impl Fn(&Frame, bool) + Send + Sync + 'static) {
        let handler: TypingHandler = Arc::new(handler);
        self.slots.typing.set(handler);
    }

    /// Read receipts.
    pub fn on_read_receipt(&self, handler: impl Fn(&Frame) + Send + Sync + 'static) {
        let handler: FrameHandler = Arc::new(handler);
        self.slots.read_receipt.set(handler);
    }

    /// A user came online; receives the user id.
    pub fn on_user_online(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        let handler: UserHandler = Arc::new(handler);
        self.slots.user_online.set(handler);
    }

    /// A user went offline; receives the user id.
    pub fn on_user_offline(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        let handler: UserHandler = Arc::new(handler);
        self.slots.user_offline.set(handler);
    }

    /// Connection status changes.
    pub fn on_connection_status_change(
        &self,
        handler: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) {
        let handler: StatusHandler = Arc::new(handler);
        self.slots.status.set(handler);
    }

    /// Server-pushed errors, auth rejection, exhausted retries.
    pub fn on_error(&self, handler: impl Fn(&ErrorEvent) + Send + Sync + 'static) {
        let handler: ErrorHandler = Arc::new(handler);
        self.slots.error.set(handler);
    }

    /// Remove every registered handler.
    pub fn clear_all(&self) {
        self.slots.message.clear();
        self.slots.typing.clear();
        self.slots.read_receipt.clear();
        self.slots.user_online.clear();
        self.slots.user_offline.clear();
        self.slots.status.clear();
        self.slots.error.clear();
    }

    /// Whether a message handler is registered.
    pub fn has_message_handler(&self) -> bool {
        self.slots.message.is_set()
    }

    pub(crate) fn emit_message(&self, frame: &Frame) {
        if let Some(handler) = self.slots.message.get() {
            handler(frame);
        }
    }

    pub(crate) fn emit_typing(&self, frame: &Frame, is_typing: bool) {
        if let Some(handler) = self.slots.typing.get() {
            handler(frame, is_typing);
        }
    }

    pub(crate) fn emit_read_receipt(&self, frame: &Frame) {
        if let Some(handler) = self.slots.read_receipt.get() {
            handler(frame);
        }
    }

    pub(crate) fn emit_user_online(&self, user_id: &str) {
        if let Some(handler) = self.slots.user_online.get() {
            handler(user_id);
        }
    }

    pub(crate) fn emit_user_offline(&self, user_id: &str) {
        if let Some(handler) = self.slots.user_offline.get() {
            handler(user_id);
        }
    }

    pub(crate) fn emit_status(&self, status: &ConnectionStatus) {
        if let Some(handler) = self.slots.status.get() {
            handler(status);
        }
    }

    pub(crate) fn emit_error(&self, error: &ErrorEvent) {
        if let Some(handler) = self.slots.error.get() {
            handler(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::events::{ErrorKind, SessionState};
    use crate::frame::Address;

    #[test]
    fn test_reregistering_replaces_handler() {
        let registry = CallbackRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        registry.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = second.clone();
        registry.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit_message(&Frame::chat(&Address::group("g1"), "hi"));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_without_handler_is_noop() {
        let registry = CallbackRegistry::new();
        registry.emit_message(&Frame::chat(&Address::group("g1"), "hi"));
        registry.emit_status(&ConnectionStatus::idle());
        registry.emit_error(&ErrorEvent::new(ErrorKind::Server, "boom"));
        assert!(!registry.has_message_handler());
    }

    #[test]
    fn test_typing_flag_is_forwarded() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.on_typing(move |_, typing| sink.lock().unwrap().push(typing));

        let frame = Frame::typing(&Address::direct("u1"));
        registry.emit_typing(&frame, true);
        registry.emit_typing(&frame, false);
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_clones_share_slots_and_clear_all() {
        let registry = CallbackRegistry::new();
        let clone = registry.clone();
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        clone.on_connection_status_change(move |s| sink.lock().unwrap().push(s.state));

        registry.emit_status(&ConnectionStatus::idle());
        registry.clear_all();
        registry.emit_status(&ConnectionStatus::idle());
        assert_eq!(*states.lock().unwrap(), vec![SessionState::Disconnected]);
    }

    #[test]
    fn test_handler_may_reregister_itself() {
        let registry = CallbackRegistry::new();
        let inner = registry.clone();
        registry.on_user_online(move |_| inner.on_user_online(|_| {}));
        registry.emit_user_online("u1");
        registry.emit_user_online("u1");
    }
}
