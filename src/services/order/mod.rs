//! Order Service: accepts orders, validates, persists, emits
//! `OrderCreated`/`OrderCancelled` via the transactional outbox, drives the
//! order-side saga, and completes/cancels orders on account replies.

pub mod errors;
pub mod saga;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::events::OrderCreatedEvent;
use crate::models::order::{CancellationReason, Order, OrderSide, OrderType, OrderStatus};
use crate::models::outbox::OutboxRecord;
use crate::repo::{OrderRepository, OutboxRepository, SagaRepository};

use errors::OrderError;
use saga::OrderSagaService;

pub struct OrderService<O, X, S: SagaRepository> {
    orders: Arc<O>,
    outbox: Arc<X>,
    sagas: OrderSagaService<S>,
}

impl<O, X, S> OrderService<O, X, S>
where
    O: OrderRepository,
    X: OutboxRepository,
    S: SagaRepository,
{
    pub fn new(orders: Arc<O>, outbox: Arc<X>, sagas: Arc<S>, saga_deadline: Duration) -> Self {
        Self { orders, outbox, sagas: OrderSagaService::new(sagas, saga_deadline) }
    }

    /// Validates, persists the order and its `OrderCreatedEvent` outbox row,
    /// and starts the order saga. The order/outbox pair is meant to commit
    /// in one database transaction; the `postgres` repository implementations
    /// share a pool but a production deployment should wrap this call in an
    /// explicit `sqlx::Transaction` (see DESIGN.md).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_order(&self, user_id: Uuid, symbol: String, side: OrderSide, order_type: OrderType, quantity: Decimal, price: Option<Decimal>, trace_id: String) -> Result<Order, OrderError> {
        validation::validate_symbol(&symbol)?;
        validation::validate_quantity(quantity)?;

        let mut order = Order::new(user_id, symbol.clone(), side, order_type, quantity, price, trace_id.clone()).map_err(OrderError::Validation)?;
        order.mark_created().map_err(OrderError::State)?;

        self.orders.insert(&order).await?;
        let outbox_record = OutboxRecord::new("Order", order.id.to_string(), "OrderCreatedEvent", serde_json::to_value(OrderCreatedEvent { order: order.clone() }).map_err(|e| OrderError::Validation(e.to_string()))?);
        self.outbox.insert(&outbox_record).await?;
        self.sagas.start(order.id, &symbol, &trace_id).await?;

        info!(order_id = %order.id, %symbol, "order created");
        Ok(order)
    }

    /// User-initiated cancellation. Matching-side cancellation of a resting
    /// order is driven by the bus consumer reacting to `OrderCancelledEvent`,
    /// published here via the outbox exactly as order creation is.
    pub async fn cancel_order(&self, order_id: Uuid, trace_id: &str) -> Result<Order, OrderError> {
        self.cancel_with_reason(order_id, CancellationReason::UserRequested, trace_id).await
    }

    async fn cancel_with_reason(&self, order_id: Uuid, reason: CancellationReason, trace_id: &str) -> Result<Order, OrderError> {
        let mut order = self.orders.find_by_id(order_id).await?.ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;
        order.cancel(reason).map_err(OrderError::State)?;
        self.orders.update(&order).await?;

        let payload = crate::bus::events::OrderCancelledEvent { order_id: order.id, symbol: order.symbol.clone(), user_id: order.user_id, reason: reason.to_string() };
        let record = OutboxRecord::new("Order", order.id.to_string(), "OrderCancelledEvent", serde_json::to_value(payload).map_err(|e| OrderError::Validation(e.to_string()))?);
        self.outbox.insert(&record).await?;
        info!(order_id = %order.id, %reason, trace_id, "order cancelled");
        Ok(order)
    }

    /// Handles `AccountUpdatedEvent`: completes the order once it is fully
    /// filled. Partial fills leave the order `PARTIALLY_FILLED` and the
    /// saga `IN_PROGRESS`, awaiting further trades.
    pub async fn handle_account_updated(&self, order_id: Uuid) -> Result<(), OrderError> {
        let Some(mut order) = self.orders.find_by_id(order_id).await? else {
            warn!(%order_id, "AccountUpdatedEvent for unknown order");
            return Ok(());
        };
        if order.status != OrderStatus::Filled {
            return Ok(());
        }
        order.complete().map_err(OrderError::State)?;
        self.orders.update(&order).await?;
        self.sagas.on_account_updated(order_id).await?;
        Ok(())
    }

    /// Handles `AccountUpdateFailedEvent`: cancels the order and
    /// compensates the saga.
    pub async fn handle_account_update_failed(&self, order_id: Uuid, trace_id: &str) -> Result<(), OrderError> {
        match self.cancel_with_reason(order_id, CancellationReason::AccountUpdateFailed, trace_id).await {
            Ok(_) => {}
            Err(OrderError::NotFound(_)) => warn!(%order_id, "AccountUpdateFailedEvent for unknown order"),
            Err(OrderError::State(msg)) => warn!(%order_id, msg, "order already terminal, cancellation skipped"),
            Err(other) => return Err(other),
        }
        self.sagas.on_account_update_failed(order_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::{InMemoryOrderRepository, InMemoryOutboxRepository, InMemorySagaRepository};
    use rust_decimal_macros::dec;

    type Service = OrderService<InMemoryOrderRepository, InMemoryOutboxRepository, InMemorySagaRepository>;

    fn service() -> (Service, Arc<InMemoryOrderRepository>, Arc<InMemoryOutboxRepository>) {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let outbox = Arc::new(InMemoryOutboxRepository::new());
        let svc = OrderService::new(orders.clone(), outbox.clone(), Arc::new(InMemorySagaRepository::new()), Duration::from_secs(30));
        (svc, orders, outbox)
    }

    #[tokio::test]
    async fn create_order_writes_order_and_outbox_row() {
        let (svc, _orders, outbox) = service();
        let order = svc.create_order(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Created);
        let pending = outbox.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_type, "OrderCreatedEvent");
    }

    #[tokio::test]
    async fn create_order_rejects_invalid_symbol() {
        let (svc, _orders, _outbox) = service();
        let err = svc.create_order(Uuid::new_v4(), "".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[tokio::test]
    async fn account_update_failed_cancels_order() {
        let (svc, orders, outbox) = service();
        let order = svc.create_order(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).await.unwrap();
        svc.handle_account_update_failed(order.id, "t").await.unwrap();
        let stored = orders.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        let pending = outbox.fetch_pending(10).await.unwrap();
        assert!(pending.iter().any(|r| r.event_type == "OrderCancelledEvent"));
    }

    #[tokio::test]
    async fn account_updated_completes_fully_filled_order() {
        let (svc, orders, _outbox) = service();
        let mut order = svc.create_order(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).await.unwrap();
        order.apply_fill(dec!(10)).unwrap();
        orders.update(&order).await.unwrap();

        svc.handle_account_updated(order.id).await.unwrap();
        let stored = orders.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
    }
}
