//! Order-side saga: one record per order, started alongside `OrderCreated`,
//! resolved by `AccountUpdated` (completed) or `AccountUpdateFailed`/a
//! rollback (compensated).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use uuid::Uuid;

use tracing::warn;

use crate::bus::events::{EventEnvelope, SagaLayer, SagaTimeoutEvent};
use crate::bus::{to_bus_payload, Bus, Topic};
use crate::errors::CoreError;
use crate::models::saga::{SagaKind, SagaState, SagaStatus};
use crate::repo::{OrderRepository, SagaRepository};
use crate::saga::SagaTimeoutHandler;

pub struct OrderSagaService<R: SagaRepository> {
    repo: Arc<R>,
    deadline: ChronoDuration,
}

impl<R: SagaRepository> OrderSagaService<R> {
    pub fn new(repo: Arc<R>, deadline: std::time::Duration) -> Self {
        Self { repo, deadline: ChronoDuration::from_std(deadline).unwrap_or(ChronoDuration::seconds(30)) }
    }

    /// STARTED -> IN_PROGRESS. The "first downstream ack" the spec
    /// describes collapses to order-creation time here: both Matching and
    /// Account consume `OrderCreatedEvent` synchronously off the same bus
    /// publish, so there is no separate ack to wait for.
    pub async fn start(&self, order_id: Uuid, symbol: &str, trace_id: &str) -> Result<SagaState, CoreError> {
        let mut saga = SagaState::start(SagaKind::Order, order_id, symbol.to_string(), "OrderCreatedEvent", serde_json::json!({"traceId": trace_id}), self.deadline);
        saga.transition(SagaStatus::InProgress)?;
        self.repo.insert(&saga).await?;
        Ok(saga)
    }

    pub async fn on_account_updated(&self, order_id: Uuid) -> Result<bool, CoreError> {
        let Some(mut saga) = self.repo.find_by_order_id(order_id, SagaKind::Order).await? else {
            return Ok(false);
        };
        if saga.status.is_terminal() {
            return Ok(false); // re-delivery for a terminal saga is a no-op
        }
        saga.transition(SagaStatus::Completed)?;
        self.repo.update(&saga).await?;
        Ok(true)
    }

    pub async fn on_account_update_failed(&self, order_id: Uuid) -> Result<bool, CoreError> {
        let Some(mut saga) = self.repo.find_by_order_id(order_id, SagaKind::Order).await? else {
            return Ok(false);
        };
        if saga.status.is_terminal() {
            return Ok(false);
        }
        saga.transition(SagaStatus::Compensating)?;
        saga.transition(SagaStatus::Compensated)?;
        self.repo.update(&saga).await?;
        Ok(true)
    }
}

/// Generic over the order repository so the order associated with a
/// timed-out saga can be moved to TIMEOUT status, not just have its saga
/// record marked.
pub struct OrderSagaTimeoutHandler<O: OrderRepository> {
    orders: Arc<O>,
}

impl<O: OrderRepository> OrderSagaTimeoutHandler<O> {
    pub fn new(orders: Arc<O>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl<O: OrderRepository> SagaTimeoutHandler for OrderSagaTimeoutHandler<O> {
    async fn on_timeout(&self, saga: &SagaState, bus: &Arc<dyn Bus>) {
        match self.orders.find_by_id(saga.order_id).await {
            Ok(Some(mut order)) => {
                if order.timeout().is_ok() {
                    if let Err(e) = self.orders.update(&order).await {
                        warn!(order_id = %order.id, error = %e, "failed to persist order timeout");
                    }
                }
            }
            Ok(None) => warn!(order_id = %saga.order_id, "saga timed out for unknown order"),
            Err(e) => warn!(order_id = %saga.order_id, error = %e, "failed to load order for saga timeout"),
        }

        let payload = SagaTimeoutEvent {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            trade_id: saga.trade_id,
            failed_at: SagaLayer::Order,
            timeout_duration: (saga.timeout_at - saga.created_at).num_seconds().max(0) as u64,
            metadata: serde_json::json!({}),
        };
        let envelope = EventEnvelope::new(saga.order_id.to_string(), "saga-timeout", "SagaTimeoutEvent", Some(saga.saga_id), payload);
        if let Ok(json) = to_bus_payload(&envelope) {
            let _ = bus.publish(Topic::SagaTimeoutEvents, &saga.order_id.to_string(), "SagaTimeoutEvent", json).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::InMemorySagaRepository;
    use std::time::Duration;

    #[tokio::test]
    async fn account_updated_completes_order_saga() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = OrderSagaService::new(repo.clone(), Duration::from_secs(30));
        let order_id = Uuid::new_v4();
        service.start(order_id, "AAPL", "t").await.unwrap();
        assert!(service.on_account_updated(order_id).await.unwrap());
        let saga = repo.find_by_order_id(order_id, SagaKind::Order).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
    }

    #[tokio::test]
    async fn account_update_failed_compensates_order_saga() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = OrderSagaService::new(repo.clone(), Duration::from_secs(30));
        let order_id = Uuid::new_v4();
        service.start(order_id, "AAPL", "t").await.unwrap();
        assert!(service.on_account_update_failed(order_id).await.unwrap());
        let saga = repo.find_by_order_id(order_id, SagaKind::Order).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
    }

    #[tokio::test]
    async fn redelivery_after_terminal_is_a_no_op() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = OrderSagaService::new(repo.clone(), Duration::from_secs(30));
        let order_id = Uuid::new_v4();
        service.start(order_id, "AAPL", "t").await.unwrap();
        service.on_account_updated(order_id).await.unwrap();
        assert!(!service.on_account_updated(order_id).await.unwrap());
    }
}
