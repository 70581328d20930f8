//! The message bus abstraction standing in for the real broker (Kafka or
//! equivalent). `Bus` is a trait so tests and the saga layer can run against
//! an in-memory, partition-ordered implementation without a live broker.

pub mod events;
pub mod inmemory;

pub use events::Topic;
pub use inmemory::InMemoryBus;

use async_trait::async_trait;
use serde_json::Value;

/// A message as it travels the bus: topic is implicit in the channel the
/// message arrived on, everything else is carried in the envelope.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub partition_key: String,
    pub event_type: String,
    pub payload: Value,
}

/// Publish/subscribe over symbol-partitioned topics. Per-partition
/// (`partition_key`) FIFO is the only ordering guarantee — across
/// partitions, consumers must tolerate reordering.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: Topic, partition_key: &str, event_type: &str, payload: Value) -> anyhow::Result<()>;

    /// Subscribe to a topic. Each call returns an independent receiver —
    /// every subscriber sees every message (fan-out), matching the
    /// consumer-group-per-service topology described by the spec.
    fn subscribe(&self, topic: Topic) -> tokio::sync::broadcast::Receiver<BusMessage>;
}

/// Serialize an envelope into a `BusMessage` ready to publish. Kept as a
/// free function so services can build the envelope with their own
/// `EventEnvelope<T>` type without the bus crate needing to know about it.
pub fn to_bus_payload<T: serde::Serialize>(envelope: &events::EventEnvelope<T>) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(envelope)?)
}
