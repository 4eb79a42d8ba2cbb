//! Offline outbound queue.
//!
//! Holds commands issued while the session is not connected and replays them
//! in FIFO order once a connection is ready. Delivery is best-effort
//! at-least-once and in-memory only: anything still queued when the process
//! exits is lost.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use chat_core::error::{ChatError, ChatResult};

use crate::frame::Frame;

/// A queued command awaiting transmission.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    /// The frame to send.
    pub frame: Frame,
    /// When the frame was queued.
    pub enqueued_at: DateTime<Utc>,
}

impl OutboundEnvelope {
    /// Wrap a frame, stamping the enqueue time.
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            enqueued_at: Utc::now(),
        }
    }
}

/// Result of one flush cycle.
#[derive(Debug)]
pub struct FlushReport {
    /// Envelopes transmitted and removed.
    pub sent: usize,
    /// Envelopes left queued.
    pub remaining: usize,
    /// The error that stopped the flush early, if any.
    pub error: Option<ChatError>,
}

impl FlushReport {
    /// Whether every queued envelope went out.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.remaining == 0
    }
}

/// FIFO queue shared between the send path and the flush path.
///
/// Cheap to clone; clones share the same queue. Its lock is also the
/// outbound ordering point: live sends and flushes both run while holding
/// it, so nothing overtakes a queued command.
#[derive(Clone)]
pub struct OutboundQueue {
    entries: Arc<Mutex<VecDeque<OutboundEnvelope>>>,
    /// Maximum length; 0 means unbounded.
    capacity: usize,
}

/// Exclusive access to the queue, held across a send or a flush.
pub struct QueueGuard<'a> {
    entries: MutexGuard<'a, VecDeque<OutboundEnvelope>>,
    capacity: usize,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` envelopes (0 = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    /// Configured capacity (0 = unbounded).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the queue lock.
    pub async fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            entries: self.entries.lock().await,
            capacity: self.capacity,
        }
    }

    /// Append an envelope. See [`QueueGuard::push`].
    pub async fn enqueue(&self, envelope: OutboundEnvelope) -> ChatResult<()> {
        self.lock().await.push(envelope)
    }

    /// Drain the queue in order. See [`QueueGuard::flush`].
    pub async fn flush<F, Fut>(&self, transmit: F) -> FlushReport
    where
        F: FnMut(OutboundEnvelope) -> Fut,
        Fut: Future<Output = ChatResult<()>>,
    {
        self.lock().await.flush(transmit).await
    }

    /// Number of queued envelopes.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Discard everything, returning how many envelopes were dropped.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        if count > 0 {
            info!("discarded {count} queued frame(s)");
        }
        count
    }

    /// Copy of the queued envelopes in order.
    pub async fn snapshot(&self) -> Vec<OutboundEnvelope> {
        self.entries.lock().await.iter().cloned().collect()
    }
}

impl QueueGuard<'_> {
    /// Append an envelope. No de-duplication.
    ///
    /// Fails with [`ChatError::QueueFull`] at capacity; the new command is
    /// rejected and the caller decides what to do with it.
    pub fn push(&mut self, envelope: OutboundEnvelope) -> ChatResult<()> {
        if self.capacity > 0 && self.entries.len() >= self.capacity {
            warn!(
                "outbound queue full ({} pending), rejecting {} frame",
                self.entries.len(),
                envelope.frame.kind
            );
            return Err(ChatError::QueueFull {
                capacity: self.capacity,
            });
        }
        debug!(
            "queued {} frame for later delivery ({} pending)",
            envelope.frame.kind,
            self.entries.len() + 1
        );
        self.entries.push_back(envelope);
        Ok(())
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain the queue in order through `transmit`.
    ///
    /// Concurrent enqueues wait for the guard and land after the items being
    /// flushed. The first failing envelope stays at the head and everything
    /// behind it stays queued for the next connection.
    pub async fn flush<F, Fut>(&mut self, mut transmit: F) -> FlushReport
    where
        F: FnMut(OutboundEnvelope) -> Fut,
        Fut: Future<Output = ChatResult<()>>,
    {
        let mut sent = 0;
        let mut error = None;

        while let Some(envelope) = self.entries.front().cloned() {
            match transmit(envelope).await {
                Ok(()) => {
                    self.entries.pop_front();
                    sent += 1;
                }
                Err(e) => {
                    warn!("flush stopped after {sent} frame(s): {e}");
                    error = Some(e);
                    break;
                }
            }
        }

        if sent > 0 {
            info!("flushed {sent} queued frame(s)");
        }

        FlushReport {
            sent,
            remaining: self.entries.len(),
            error,
        }
    }
}
