//! In-memory partitioned bus. Stands in for the real broker in tests and
//! in the single-process demo binary: one `broadcast` channel per topic,
//! same idiom the teacher uses for trade/orderbook fan-out.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{Bus, BusMessage, Topic};

const CHANNEL_CAPACITY: usize = 10_000;

/// Each topic gets its own broadcast channel. Per-partition ordering falls
/// out naturally because a single channel preserves publish order and every
/// message carries its partition key for consumers that care; this
/// implementation does not reorder or fan out per-partition, it only
/// guarantees the FIFO-per-partition contract by never reordering the
/// underlying channel.
pub struct InMemoryBus {
    channels: DashMap<&'static str, broadcast::Sender<BusMessage>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    fn sender(&self, topic: Topic) -> broadcast::Sender<BusMessage> {
        self.channels
            .entry(topic.as_str())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, topic: Topic, partition_key: &str, event_type: &str, payload: Value) -> anyhow::Result<()> {
        let sender = self.sender(topic);
        let message = BusMessage { partition_key: partition_key.to_string(), event_type: event_type.to_string(), payload };
        // No subscribers is not an error: a consumer may not have started yet,
        // and at-least-once delivery is only meaningful once someone is listening.
        if sender.send(message).is_err() {
            debug!(topic = topic.as_str(), partition_key, "published with no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BusMessage> {
        self.sender(topic).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_partition_order_is_preserved_within_a_topic() {
        let bus = InMemoryBus::new();
        let mut rx = bus.subscribe(Topic::OrderEvents);
        for i in 0..5 {
            bus.publish(Topic::OrderEvents, "AAPL", "OrderCreatedEvent", serde_json::json!({"i": i})).await.unwrap();
        }
        for i in 0..5 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.payload["i"], i);
        }
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InMemoryBus::new();
        let mut order_rx = bus.subscribe(Topic::OrderEvents);
        bus.publish(Topic::TradeEvents, "AAPL", "TradeExecutedEvent", serde_json::json!({})).await.unwrap();
        assert!(order_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn multiple_subscribers_each_see_every_message() {
        let bus = InMemoryBus::new();
        let mut rx1 = bus.subscribe(Topic::OrderEvents);
        let mut rx2 = bus.subscribe(Topic::OrderEvents);
        bus.publish(Topic::OrderEvents, "AAPL", "OrderCreatedEvent", serde_json::json!({})).await.unwrap();
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
