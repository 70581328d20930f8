//! Routes orders to symbol-partitioned workers, converts their fills into
//! `Trade`s, publishes `trade.events`, and exposes the polling API the
//! saga layer uses to pick up a just-matched order's trades.
//!
//! Grounded on the teacher's `MatchingEngine` (DashMap-keyed per-symbol
//! state, broadcast-based trade fan-out); reshaped into the symbol-hashed
//! worker-pool topology the matching design calls for.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::events::{EventEnvelope, TradeExecutedEvent, TradeFailedEvent};
use crate::bus::{to_bus_payload, Bus, Topic};
use crate::config::{CircuitBreakerConfig, MatchingConfig};
use crate::models::order::{Order, OrderSide};
use crate::models::trade::Trade;

use super::circuit_breaker::CircuitBreaker;
use super::types::{Fill, OrderEntry};
use super::worker::{spawn_worker, CancelRequest, SubmitRequest, WorkerHandle};

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineMetrics {
    pub worker_count: usize,
    pub queue_depths: Vec<usize>,
    pub high_water_marks: Vec<usize>,
    pub circuit_open: bool,
}

pub struct MatchingEngine {
    workers: Vec<WorkerHandle>,
    circuit_breaker: CircuitBreaker,
    results: Arc<DashMap<Uuid, Vec<Trade>>>,
    bus: Arc<dyn Bus>,
}

impl MatchingEngine {
    pub fn new(matching: &MatchingConfig, circuit: &CircuitBreakerConfig, bus: Arc<dyn Bus>) -> Self {
        let workers = (0..matching.thread_pool_size.max(1)).map(|id| spawn_worker(id, matching.queue_capacity, matching.cancel_queue_capacity)).collect();
        Self {
            workers,
            circuit_breaker: CircuitBreaker::new(circuit.failure_threshold, circuit.reset_timeout, circuit.half_open_probes),
            results: Arc::new(DashMap::new()),
            bus,
        }
    }

    fn worker_index(&self, symbol: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        (hasher.finish() as usize) % self.workers.len()
    }

    /// Submit an order for matching. Returns `false` immediately if the
    /// circuit is open, the worker's queue depth has crossed its
    /// backpressure high-water mark, or the queue is hard-full — never
    /// blocks.
    pub async fn submit(&self, order: &Order, trace_id: &str) -> bool {
        if !self.circuit_breaker.allow_request() {
            warn!(symbol = %order.symbol, "circuit breaker open, rejecting submission");
            return false;
        }

        let idx = self.worker_index(&order.symbol);
        let handle = &self.workers[idx];
        if handle.backpressure.is_saturated() {
            warn!(symbol = %order.symbol, worker = idx, depth = handle.backpressure.current_depth(), "worker queue past backpressure high-water mark, rejecting submission");
            return false;
        }
        let entry = OrderEntry::from_order(order);
        let (result_tx, result_rx) = oneshot::channel();

        match handle.order_tx.try_send(SubmitRequest { entry, result_tx }) {
            Ok(()) => {
                self.circuit_breaker.record_success();
                handle.backpressure.record_enqueue(handle.order_tx.max_capacity().saturating_sub(handle.order_tx.capacity()));
                self.spawn_result_collector(order.clone(), trace_id.to_string(), result_rx);
                true
            }
            Err(_) => {
                self.circuit_breaker.record_failure();
                warn!(symbol = %order.symbol, worker = idx, "worker queue full, rejecting submission");
                false
            }
        }
    }

    fn spawn_result_collector(&self, order: Order, trace_id: String, result_rx: oneshot::Receiver<Vec<Fill>>) {
        let results = self.results.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let fills = match result_rx.await {
                Ok(fills) => fills,
                Err(_) => {
                    warn!(order_id = %order.id, "matching worker dropped result channel");
                    if let Err(err) = publish_trade_failed(&bus, &order, "matching worker dropped result channel before returning fills", &trace_id).await {
                        warn!(order_id = %order.id, error = %err, "failed to publish TradeFailedEvent");
                    }
                    return;
                }
            };

            let mut trades = Vec::with_capacity(fills.len());
            for fill in &fills {
                let trade = fill_to_trade(fill, order.side);
                if let Err(err) = publish_trade_executed(&bus, &trade, &trace_id).await {
                    warn!(trade_id = %trade.id, error = %err, "failed to publish TradeExecutedEvent");
                }
                trades.push(trade);
            }
            info!(order_id = %order.id, fill_count = trades.len(), "matching produced fills");
            results.insert(order.id, trades);
        });
    }

    /// Best-effort cancel: accepted means the cancel was enqueued, not that
    /// it necessarily removed a resting order.
    pub async fn cancel(&self, order_id: Uuid, symbol: &str, _trace_id: &str) -> bool {
        let idx = self.worker_index(symbol);
        self.workers[idx].cancel_tx.try_send(CancelRequest { order_id, symbol: symbol.to_string() }).is_ok()
    }

    /// Poll for the trades produced by a just-submitted order, with a
    /// bounded exponential backoff: 1, 2, 4, ... capped at 50ms, 10 tries.
    pub async fn process_order_with_result(&self, order_id: Uuid) -> Vec<Trade> {
        let mut delay_ms = 1u64;
        for _ in 0..10 {
            if let Some(trades) = self.results.get(&order_id) {
                return trades.clone();
            }
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            delay_ms = (delay_ms * 2).min(50);
        }
        Vec::new()
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            worker_count: self.workers.len(),
            queue_depths: self.workers.iter().map(|w| w.backpressure.current_depth()).collect(),
            high_water_marks: self.workers.iter().map(|w| w.backpressure.high_water_mark()).collect(),
            circuit_open: !self.circuit_breaker.allow_request(),
        }
    }
}

fn fill_to_trade(fill: &Fill, taker_side: OrderSide) -> Trade {
    let (buy_order_id, buy_user_id, sell_order_id, sell_user_id) = match taker_side {
        OrderSide::Buy => (fill.taker_order_id, fill.taker_user_id, fill.maker_order_id, fill.maker_user_id),
        OrderSide::Sell => (fill.maker_order_id, fill.maker_user_id, fill.taker_order_id, fill.taker_user_id),
    };
    Trade::new(fill.symbol.clone(), buy_order_id, sell_order_id, buy_user_id, sell_user_id, fill.price, fill.quantity)
}

/// Published when a worker's result channel is dropped before delivering
/// fills — the one way a submitted order's matching attempt can fail
/// without ever reaching `match_limit`/`match_market`. `main.rs`'s
/// `trade.events` consumer reacts to this by moving the matching saga to
/// `FAILED` via `MatchingSagaService::on_engine_exception`.
async fn publish_trade_failed(bus: &Arc<dyn Bus>, order: &Order, reason: &str, trace_id: &str) -> anyhow::Result<()> {
    let payload = TradeFailedEvent { order_id: order.id, symbol: order.symbol.clone(), reason: reason.to_string() };
    let envelope = EventEnvelope::new(order.id.to_string(), trace_id, "TradeFailedEvent", None, payload);
    let json = to_bus_payload(&envelope)?;
    bus.publish(Topic::TradeEvents, &order.symbol, "TradeFailedEvent", json).await
}

async fn publish_trade_executed(bus: &Arc<dyn Bus>, trade: &Trade, trace_id: &str) -> anyhow::Result<()> {
    let payload = TradeExecutedEvent {
        trade_id: trade.id,
        symbol: trade.symbol.clone(),
        buy_order_id: trade.buy_order_id,
        sell_order_id: trade.sell_order_id,
        buy_user_id: trade.buy_user_id,
        sell_user_id: trade.sell_user_id,
        price: trade.price,
        quantity: trade.quantity,
        timestamp: trade.timestamp,
    };
    let envelope = EventEnvelope::new(trade.id.to_string(), trace_id, "TradeExecutedEvent", None, payload);
    let json = to_bus_payload(&envelope)?;
    bus.publish(Topic::TradeEvents, &trade.symbol, "TradeExecutedEvent", json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::models::order::OrderType;
    use rust_decimal_macros::dec;

    fn engine() -> MatchingEngine {
        let matching = MatchingConfig { thread_pool_size: 2, queue_capacity: 1000, cancel_queue_capacity: 1000 };
        let circuit = CircuitBreakerConfig::default();
        MatchingEngine::new(&matching, &circuit, Arc::new(InMemoryBus::new()))
    }

    #[tokio::test]
    async fn matched_orders_produce_pollable_trades() {
        let engine = engine();
        let seller = Order::new(Uuid::new_v4(), "AAPL".into(), OrderSide::Sell, OrderType::Limit, dec!(10), Some(dec!(150)), "t1".into()).unwrap();
        assert!(engine.submit(&seller, "t1").await);
        engine.process_order_with_result(seller.id).await;

        let buyer = Order::new(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t2".into()).unwrap();
        assert!(engine.submit(&buyer, "t2").await);
        let trades = engine.process_order_with_result(buyer.id).await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, dec!(10));
        assert_eq!(trades[0].buy_order_id, buyer.id);
        assert_eq!(trades[0].sell_order_id, seller.id);
    }

    #[tokio::test]
    async fn unmatched_order_polls_to_empty() {
        let engine = engine();
        let order = Order::new(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).unwrap();
        assert!(engine.submit(&order, "t").await);
        let trades = engine.process_order_with_result(order.id).await;
        assert!(trades.is_empty());
    }

    #[tokio::test]
    async fn cancel_on_unknown_symbol_is_still_routable() {
        let engine = engine();
        // routing only depends on the hash of the symbol string, not on
        // whether anything has been submitted for it yet
        assert!(engine.cancel(Uuid::new_v4(), "ZZZZ", "t").await);
    }

    #[tokio::test]
    async fn dropped_result_channel_publishes_trade_failed() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let matching = MatchingConfig { thread_pool_size: 1, queue_capacity: 10, cancel_queue_capacity: 10 };
        let engine = MatchingEngine::new(&matching, &CircuitBreakerConfig::default(), bus.clone());
        let mut rx = bus.subscribe(Topic::TradeEvents);

        let order = Order::new(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).unwrap();
        let (result_tx, result_rx) = oneshot::channel();
        drop(result_tx); // simulates the worker task dying before it can send fills
        engine.spawn_result_collector(order.clone(), "t".into(), result_rx);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.event_type, "TradeFailedEvent");
    }

    #[tokio::test]
    async fn backpressure_saturated_worker_rejects_submission() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let matching = MatchingConfig { thread_pool_size: 1, queue_capacity: 10, cancel_queue_capacity: 10 };
        let engine = MatchingEngine::new(&matching, &CircuitBreakerConfig::default(), bus);

        engine.workers[0].backpressure.record_enqueue(9); // 90% of capacity 10
        let order = Order::new(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).unwrap();
        assert!(!engine.submit(&order, "t").await);
    }
}
