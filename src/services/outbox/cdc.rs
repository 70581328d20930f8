//! Stand-in for the external log reader that tails the database's commit
//! log for the outbox table. A real deployment wires a Debezium-style CDC
//! connector; here `PollingCdcSource` polls `fetch_pending` on an interval,
//! which is observationally the same thing from the bridge's perspective.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use crate::repo::OutboxRepository;

use super::bridge::OutboxCdcBridge;

#[async_trait]
pub trait CdcSource: Send + Sync {
    /// Drive one round of delivery. Returns the number of rows published.
    async fn tick(&self) -> anyhow::Result<usize>;
}

pub struct PollingCdcSource<X: OutboxRepository> {
    bridge: Arc<OutboxCdcBridge<X>>,
    batch_size: i64,
}

impl<X: OutboxRepository> PollingCdcSource<X> {
    pub fn new(bridge: Arc<OutboxCdcBridge<X>>, batch_size: i64) -> Self {
        Self { bridge, batch_size }
    }
}

#[async_trait]
impl<X: OutboxRepository + 'static> CdcSource for PollingCdcSource<X> {
    async fn tick(&self) -> anyhow::Result<usize> {
        Ok(self.bridge.publish_pending(self.batch_size).await?)
    }
}

/// Runs `source.tick()` forever on `poll_interval`. Errors are logged and
/// never stop the loop — a single bad batch should not take down delivery.
pub fn spawn_cdc_loop(source: Arc<dyn CdcSource>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll_interval).await;
            if let Err(e) = source.tick().await {
                error!(error = %e, "cdc bridge tick failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, InMemoryBus, Topic};
    use crate::models::outbox::OutboxRecord;
    use crate::repo::memory::InMemoryOutboxRepository;
    use serde_json::json;

    #[tokio::test]
    async fn polling_source_publishes_pending_rows() {
        let outbox = Arc::new(InMemoryOutboxRepository::new());
        outbox.insert(&OutboxRecord::new("Order", "order-1", "OrderCreatedEvent", json!({"symbol": "AAPL"}))).await.unwrap();
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let _rx = bus.subscribe(Topic::OrderEvents);
        let bridge = Arc::new(OutboxCdcBridge::new(outbox.clone(), bus));
        let source = PollingCdcSource::new(bridge, 10);

        let published = source.tick().await.unwrap();
        assert_eq!(published, 1);
    }
}
