//! In-process event bus over a tokio broadcast channel.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{BusError, EventBus, EventStream};
use crate::domain::AuctionEvent;

const CHANNEL_CAPACITY: usize = 1024;

pub struct LocalBus {
    tx: broadcast::Sender<AuctionEvent>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        LocalBus { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: AuctionEvent) -> Result<(), BusError> {
        // No subscribers is not an error: events are hints, not commands.
        let _ = self.tx.send(event);
        Ok(())
    }

    fn subscribe(&self) -> EventStream {
        EventStream::new(self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuctionEvent, AuctionId, EventKind};
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = LocalBus::new();
        let mut sub_a = bus.subscribe();
        let mut sub_b = bus.subscribe();

        let auction_id = AuctionId::new();
        bus.publish(AuctionEvent::viewer_count(auction_id, 7))
            .await
            .expect("publish failed");

        for sub in [&mut sub_a, &mut sub_b] {
            let event = sub.next().await.expect("event missing");
            assert_eq!(event.kind, EventKind::ViewerCount);
            assert_eq!(event.auction_id, auction_id);
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = LocalBus::new();
        bus.publish(AuctionEvent::auction_started(AuctionId::new(), Utc::now()))
            .await
            .expect("publish should not fail with no subscribers");
    }

    #[tokio::test]
    async fn test_subscriber_sees_events_in_publish_order() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe();
        let auction_id = AuctionId::new();

        for count in 1..=3 {
            bus.publish(AuctionEvent::viewer_count(auction_id, count))
                .await
                .unwrap();
        }

        for expected in 1..=3 {
            let event = sub.next().await.unwrap();
            assert_eq!(event.data["count"], expected);
        }
    }
}
