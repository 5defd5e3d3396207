//! Event bus implementation using a tokio unbounded mpsc channel

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::types::Event;

/// Ordered many-producer, single-consumer event channel
///
/// Publishing never blocks: the channel is unbounded so node output is never
/// held up by a slow consumer. Events from one producer are received in the
/// order they were published.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<Event>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Event>>>,
    /// Number of events published (for monitoring)
    event_count: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            event_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        self.event_count.fetch_add(1, Ordering::Relaxed);
        // The bus owns the receiver, so the channel cannot be closed here.
        let _ = self.sender.send(event);
    }

    /// Wait up to `timeout` for the next event
    ///
    /// Returns `None` if nothing arrived in time.
    pub async fn receive(&self, timeout: Duration) -> Option<Event> {
        tokio::time::timeout(timeout, async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Take the next event if one is already queued
    pub fn try_receive(&self) -> Option<Event> {
        let mut receiver = self.receiver.try_lock().ok()?;
        receiver.try_recv().ok()
    }

    /// Discard every queued event
    ///
    /// Waits for a pending `receive` to give up the receiver first.
    pub async fn clear(&self) -> usize {
        let mut receiver = self.receiver.lock().await;
        let mut discarded = 0;
        while receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    /// Get the total number of events published
    pub fn event_count(&self) -> usize {
        self.event_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_count", &self.event_count())
            .finish()
    }
}
