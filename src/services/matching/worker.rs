//! A matching worker owns every order book for the symbols hashed to it and
//! processes its two ingress queues on its own task: cancels first, then
//! orders, matching the "cancel always precedes processing within one
//! batch iteration" ordering guarantee.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::order::OrderType;

use super::backpressure::BackpressureMonitor;
use super::book::Orderbook;
use super::types::{Fill, OrderEntry};

pub struct CancelRequest {
    pub order_id: Uuid,
    pub symbol: String,
}

pub struct SubmitRequest {
    pub entry: OrderEntry,
    pub result_tx: tokio::sync::oneshot::Sender<Vec<Fill>>,
}

/// Poll interval for the worker's main loop when both queues are empty
/// (suspension point (c) from the concurrency model).
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct MatchingWorker {
    id: usize,
    books: HashMap<String, Orderbook>,
    order_rx: mpsc::Receiver<SubmitRequest>,
    cancel_rx: mpsc::Receiver<CancelRequest>,
    backpressure: Arc<BackpressureMonitor>,
}

impl MatchingWorker {
    pub fn new(id: usize, order_rx: mpsc::Receiver<SubmitRequest>, cancel_rx: mpsc::Receiver<CancelRequest>, backpressure: Arc<BackpressureMonitor>) -> Self {
        Self { id, books: HashMap::new(), order_rx, cancel_rx, backpressure }
    }

    fn book_for(&mut self, symbol: &str) -> &mut Orderbook {
        self.books.entry(symbol.to_string()).or_insert_with(|| Orderbook::new(symbol.to_string()))
    }

    /// Drain every currently-queued cancel, then process exactly one
    /// submitted order (if any), then loop. Cancellation is best-effort:
    /// a miss just means the order already matched or was never enqueued.
    pub async fn run(mut self) {
        loop {
            while let Ok(cancel) = self.cancel_rx.try_recv() {
                let removed = self.book_for(&cancel.symbol).cancel(cancel.order_id);
                debug!(worker = self.id, order_id = %cancel.order_id, hit = removed.is_some(), "processed cancel");
                self.backpressure.record_dequeue(self.order_rx.len());
            }

            tokio::select! {
                maybe_req = self.order_rx.recv() => {
                    match maybe_req {
                        Some(req) => self.process_submit(req),
                        None => break,
                    }
                }
                _ = tokio::time::sleep(QUEUE_POLL_INTERVAL) => {}
            }
        }
    }

    fn process_submit(&mut self, req: SubmitRequest) {
        self.backpressure.record_dequeue(self.order_rx.len());
        let book = self.book_for(&req.entry.symbol);
        let fills = match req.entry.order_type {
            OrderType::Limit => book.match_limit(req.entry.clone()),
            OrderType::Market => book.match_market(req.entry.clone()),
        };
        if req.result_tx.send(fills).is_err() {
            warn!(worker = self.id, order_id = %req.entry.id, "result receiver dropped before fills were delivered");
        }
    }
}

/// Handle used by `MatchingEngine` to feed a worker its two queues.
pub struct WorkerHandle {
    pub order_tx: mpsc::Sender<SubmitRequest>,
    pub cancel_tx: mpsc::Sender<CancelRequest>,
    pub backpressure: Arc<BackpressureMonitor>,
}

/// The channel itself is sized to `queue_capacity`, but the backpressure
/// monitor's high-water mark is set below that: submissions are rejected as
/// "saturated" once the queue crosses 90% full, ahead of the point where the
/// channel would hard-reject via `try_send`, so the backpressure rejection
/// path actually fires under sustained load instead of being shadowed by it.
pub fn spawn_worker(id: usize, queue_capacity: usize, cancel_queue_capacity: usize) -> WorkerHandle {
    let (order_tx, order_rx) = mpsc::channel(queue_capacity);
    let (cancel_tx, cancel_rx) = mpsc::channel(cancel_queue_capacity);
    let high_water_mark = (queue_capacity * 9 / 10).max(1);
    let backpressure = Arc::new(BackpressureMonitor::new(high_water_mark));
    let worker = MatchingWorker::new(id, order_rx, cancel_rx, backpressure.clone());
    tokio::spawn(worker.run());
    WorkerHandle { order_tx, cancel_tx, backpressure }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::OrderSide;
    use rust_decimal_macros::dec;

    fn entry(side: OrderSide, order_type: OrderType, price: rust_decimal::Decimal, qty: rust_decimal::Decimal) -> OrderEntry {
        OrderEntry {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            symbol: "AAPL".into(),
            side,
            order_type,
            price,
            original_quantity: qty,
            remaining_quantity: qty,
            trace_id: "t".into(),
            submitted_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn worker_matches_submitted_orders_and_returns_fills() {
        let handle = spawn_worker(0, 100, 100);

        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.order_tx.send(SubmitRequest { entry: entry(OrderSide::Sell, OrderType::Limit, dec!(100), dec!(10)), result_tx: tx }).await.unwrap();
        let fills = rx.await.unwrap();
        assert!(fills.is_empty());

        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.order_tx.send(SubmitRequest { entry: entry(OrderSide::Buy, OrderType::Limit, dec!(100), dec!(10)), result_tx: tx }).await.unwrap();
        let fills = rx.await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity, dec!(10));
    }

    #[tokio::test]
    async fn worker_drains_cancels_before_next_submit() {
        let handle = spawn_worker(0, 100, 100);
        let resting = entry(OrderSide::Buy, OrderType::Limit, dec!(100), dec!(10));
        let resting_id = resting.id;

        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.order_tx.send(SubmitRequest { entry: resting, result_tx: tx }).await.unwrap();
        rx.await.unwrap();

        handle.cancel_tx.send(CancelRequest { order_id: resting_id, symbol: "AAPL".into() }).await.unwrap();
        // give the worker a chance to drain the cancel queue before the next submit lands
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.order_tx.send(SubmitRequest { entry: entry(OrderSide::Sell, OrderType::Limit, dec!(100), dec!(10)), result_tx: tx }).await.unwrap();
        let fills = rx.await.unwrap();
        assert!(fills.is_empty(), "cancelled resting order must not be matched");
    }

    #[tokio::test]
    async fn backpressure_high_water_mark_trips_before_channel_is_full() {
        let handle = spawn_worker(0, 10, 10);
        // 90% of capacity 10 is 9: at depth 8 the queue is not yet saturated...
        handle.backpressure.record_enqueue(8);
        assert!(!handle.backpressure.is_saturated());
        // ...but at depth 9 it is, well before the channel itself (capacity 10) is full.
        handle.backpressure.record_enqueue(9);
        assert!(handle.backpressure.is_saturated());
    }
}
