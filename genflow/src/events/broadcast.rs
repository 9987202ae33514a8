//! Publish/subscribe sink backed by a tokio broadcast channel.

use super::EventSink;
use crate::core::GenflowEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fans events out to every subscriber.
///
/// Sending never blocks. A subscriber that falls more than the channel
/// capacity behind observes `RecvError::Lagged` and skips ahead; a sink with
/// no subscribers drops events.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<GenflowEvent>,
}

impl BroadcastEventSink {
    /// Creates a sink with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GenflowEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn publish(&self, event: GenflowEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn emit(&self, event: GenflowEvent) {
        self.publish(event);
    }

    fn try_emit(&self, event: GenflowEvent) {
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(processed: usize) -> GenflowEvent {
        GenflowEvent::QueueCompleted {
            processed,
            failed: 0,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_same_event() {
        let sink = BroadcastEventSink::default();
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 2);

        sink.emit(completed(3)).await;

        assert_eq!(a.recv().await.unwrap(), completed(3));
        assert_eq!(b.recv().await.unwrap(), completed(3));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let sink = BroadcastEventSink::new(4);
        sink.try_emit(completed(1));
        assert_eq!(sink.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let sink = BroadcastEventSink::new(2);
        let mut rx = sink.subscribe();

        for i in 0..5 {
            sink.try_emit(completed(i));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(rx.recv().await.unwrap(), completed(3));
    }
}
