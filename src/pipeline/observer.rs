use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::event::QueueEvent;

/// Receives every queue change. Implementations must not block: the queue
/// manager calls observers inline after each successful write.
pub trait QueueObserver: Send + Sync {
    fn notify(&self, event: &QueueEvent);
}

/// Fan-out to in-process subscribers (the admin event stream).
pub struct BroadcastObserver {
    sender: broadcast::Sender<QueueEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }
}

impl QueueObserver for BroadcastObserver {
    fn notify(&self, event: &QueueEvent) {
        // No subscribers is normal between admin sessions.
        if self.sender.send(event.clone()).is_err() {
            debug!(kind = ?event.kind, "No queue event subscribers");
        }
    }
}

/// The set of observers injected into the queue manager.
#[derive(Clone, Default)]
pub struct Observers {
    observers: Vec<Arc<dyn QueueObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn QueueObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn publish(&self, event: QueueEvent) {
        for observer in &self.observers {
            observer.notify(&event);
        }
    }
}
