use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::BotEvent;

/// Outward notification sink. Publishing is fire-and-forget and must be
/// callable from any session concurrently.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: BotEvent);
}

/// Fan-out bus backed by a tokio broadcast channel. Slow subscribers lag and
/// skip events rather than blocking publishers.
#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<BotEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, event: BotEvent) {
        match self.tx.send(event) {
            Ok(count) => debug!("Published event to {} subscribers", count),
            Err(broadcast::error::SendError(event)) => {
                debug!("No subscribers for {:?}", event)
            }
        }
    }
}
