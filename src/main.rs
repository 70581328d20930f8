//! Binary entry point. Connects to Postgres, wires the four services to a
//! shared bus, and runs forever: the CDC bridge drains the outbox, the saga
//! timeout scanners sweep overdue sagas, and the bus consumers below drive
//! each service's handlers off the topics the spec assigns them.
//!
//! There is exactly one process here on purpose — the services are
//! separated by interface (`OrderRepository`, `Bus`, ...), not by process
//! boundary. Splitting into four binaries sharing the same `Database` and
//! an external broker in place of `InMemoryBus` is a deployment change, not
//! a code change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use trading_core::bus::events::{AccountUpdateFailedEvent, AccountUpdatedEvent, EventEnvelope, OrderCancelledEvent, OrderCreatedEvent, TradeExecutedEvent, TradeFailedEvent, TradeRollbackEvent};
use trading_core::bus::{Bus, BusMessage, InMemoryBus, Topic};
use trading_core::config::AppConfig;
use trading_core::db::Database;
use trading_core::models::saga::SagaKind;
use trading_core::models::trade::Trade;
use trading_core::repo::postgres::{
    PostgresAccountRepository, PostgresHoldingRepository, PostgresOrderRepository, PostgresOutboxRepository, PostgresReservationRepository, PostgresSagaRepository, PostgresTradeRepository,
    PostgresTransactionLogRepository,
};
use trading_core::repo::TradeRepository;
use trading_core::saga::spawn_timeout_loop;
use trading_core::services::account::saga::AccountSagaTimeoutHandler;
use trading_core::services::account::AccountService;
use trading_core::services::matching::{MatchingEngine, MatchingSagaService, MatchingSagaTimeoutHandler};
use trading_core::services::order::saga::OrderSagaTimeoutHandler;
use trading_core::services::order::OrderService;
use trading_core::services::outbox::{spawn_cdc_loop, CdcSource, OutboxCdcBridge, PollingCdcSource};

type Orders = PostgresOrderRepository;
type Accounts = PostgresAccountRepository;
type Holdings = PostgresHoldingRepository;
type Reservations = PostgresReservationRepository;
type TxLogs = PostgresTransactionLogRepository;
type Trades = PostgresTradeRepository;
type Outbox = PostgresOutboxRepository;
type Sagas = PostgresSagaRepository;

type OrderSvc = OrderService<Orders, Outbox, Sagas>;
type AccountSvc = AccountService<Accounts, Holdings, Reservations, TxLogs, Sagas>;
type MatchingSaga = MatchingSagaService<Sagas>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).json().init();

    let config = AppConfig::load()?;
    info!(environment = %config.environment, workers = config.matching.thread_pool_size, "starting trading core");

    let db = Database::connect(&config.database_url).await?;
    let pool = db.pool().clone();

    let orders = Arc::new(PostgresOrderRepository::new(pool.clone()));
    let accounts = Arc::new(PostgresAccountRepository::new(pool.clone()));
    let holdings = Arc::new(PostgresHoldingRepository::new(pool.clone()));
    let reservations = Arc::new(PostgresReservationRepository::new(pool.clone()));
    let tx_logs = Arc::new(PostgresTransactionLogRepository::new(pool.clone()));
    let trades = Arc::new(PostgresTradeRepository::new(pool.clone()));
    let outbox = Arc::new(PostgresOutboxRepository::new(pool.clone()));
    let order_sagas = Arc::new(PostgresSagaRepository::new(pool.clone()));
    let matching_sagas = Arc::new(PostgresSagaRepository::new(pool.clone()));
    let account_sagas = Arc::new(PostgresSagaRepository::new(pool.clone()));

    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());

    let order_service = Arc::new(OrderService::new(orders.clone(), outbox.clone(), order_sagas.clone(), config.saga_timeouts.order));
    let matching_engine = Arc::new(MatchingEngine::new(&config.matching, &config.circuit_breaker, bus.clone()));
    let matching_saga = Arc::new(MatchingSagaService::new(matching_sagas.clone(), config.saga_timeouts.matching));
    let account_service = Arc::new(AccountService::new(accounts, holdings, reservations, tx_logs, account_sagas.clone(), bus.clone(), config.lock_timeout, config.saga_timeouts.account));

    let outbox_bridge = Arc::new(OutboxCdcBridge::new(outbox, bus.clone()));
    let cdc_source: Arc<dyn CdcSource> = Arc::new(PollingCdcSource::new(outbox_bridge, 100));
    spawn_cdc_loop(cdc_source, Duration::from_millis(200));

    spawn_timeout_loop(order_sagas, SagaKind::Order, Duration::from_secs(3), bus.clone(), Arc::new(OrderSagaTimeoutHandler::new(orders)));
    spawn_timeout_loop(matching_sagas, SagaKind::Matching, Duration::from_secs(2), bus.clone(), Arc::new(MatchingSagaTimeoutHandler));
    spawn_timeout_loop(account_sagas, SagaKind::Account, Duration::from_secs(2), bus.clone(), Arc::new(AccountSagaTimeoutHandler));

    spawn_order_events_consumer(bus.clone(), matching_engine, matching_saga.clone(), account_service.clone());
    spawn_trade_events_consumer(bus.clone(), trades, matching_saga, account_service);
    spawn_account_events_consumer(bus.clone(), order_service);

    info!("trading core running");
    std::future::pending::<()>().await;
    #[allow(unreachable_code)]
    Ok(())
}

/// Matching Engine and Account Service both react to `order.events`: the
/// engine submits/cancels against its order books, the account service
/// reserves/releases funds or shares. Per the spec both are independent
/// consumer groups — one subscription, fanned out to both handlers.
fn spawn_order_events_consumer(bus: Arc<dyn Bus>, engine: Arc<MatchingEngine>, matching_saga: Arc<MatchingSaga>, account_service: Arc<AccountSvc>) {
    let mut rx = bus.subscribe(Topic::OrderEvents);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => handle_order_event(&msg, &engine, &matching_saga, &account_service, &bus).await,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "order events consumer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn handle_order_event(msg: &BusMessage, engine: &Arc<MatchingEngine>, matching_saga: &Arc<MatchingSaga>, account_service: &Arc<AccountSvc>, bus: &Arc<dyn Bus>) {
    match msg.event_type.as_str() {
        "OrderCreatedEvent" => {
            let Ok(envelope) = serde_json::from_value::<EventEnvelope<OrderCreatedEvent>>(msg.payload.clone()) else {
                warn!("malformed OrderCreatedEvent payload");
                return;
            };
            let order = envelope.payload.order;
            if let Err(e) = matching_saga.start(order.id, &order.symbol, &envelope.trace_id).await {
                warn!(order_id = %order.id, error = %e, "failed to start matching saga");
            }
            if !engine.submit(&order, &envelope.trace_id).await {
                warn!(order_id = %order.id, "matching engine rejected submission (circuit open or queue full)");
            }
            if let Err(e) = account_service.handle_order_created(&order, &envelope.trace_id).await {
                warn!(order_id = %order.id, error = %e, "account service rejected order");
            }
        }
        "OrderCancelledEvent" => {
            let Ok(envelope) = serde_json::from_value::<EventEnvelope<OrderCancelledEvent>>(msg.payload.clone()) else {
                warn!("malformed OrderCancelledEvent payload");
                return;
            };
            let payload = envelope.payload;
            engine.cancel(payload.order_id, &payload.symbol, &envelope.trace_id).await;
            if let Err(e) = matching_saga.on_cancel_received(payload.order_id, bus, &envelope.trace_id).await {
                warn!(order_id = %payload.order_id, error = %e, "failed to compensate matching saga on cancel");
            }
            if let Err(e) = account_service.handle_order_released(payload.order_id).await {
                warn!(order_id = %payload.order_id, error = %e, "failed to release reservation on cancel");
            }
        }
        other => warn!(event_type = other, "order events consumer received unrecognized event type"),
    }
}

/// Account Service and the matching-saga completion path both react to
/// `trade.events`. Persisting the trade row here (rather than inside the
/// engine) keeps the matching engine free of a `TradeRepository` dependency
/// it would otherwise need only for this one side effect.
fn spawn_trade_events_consumer(bus: Arc<dyn Bus>, trades: Arc<Trades>, matching_saga: Arc<MatchingSaga>, account_service: Arc<AccountSvc>) {
    let mut rx = bus.subscribe(Topic::TradeEvents);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => handle_trade_event(&msg, &trades, &matching_saga, &account_service).await,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "trade events consumer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn handle_trade_event(msg: &BusMessage, trades: &Arc<Trades>, matching_saga: &Arc<MatchingSaga>, account_service: &Arc<AccountSvc>) {
    match msg.event_type.as_str() {
        "TradeExecutedEvent" => {
            let Ok(envelope) = serde_json::from_value::<EventEnvelope<TradeExecutedEvent>>(msg.payload.clone()) else {
                warn!("malformed TradeExecutedEvent payload");
                return;
            };
            let p = envelope.payload;
            let trade = Trade { id: p.trade_id, symbol: p.symbol, buy_order_id: p.buy_order_id, sell_order_id: p.sell_order_id, buy_user_id: p.buy_user_id, sell_user_id: p.sell_user_id, price: p.price, quantity: p.quantity, timestamp: p.timestamp };

            if let Err(e) = trades.insert(&trade).await {
                warn!(trade_id = %trade.id, error = %e, "failed to persist trade");
            }
            if let Err(e) = matching_saga.on_trade_emitted(trade.buy_order_id).await {
                warn!(trade_id = %trade.id, error = %e, "failed to complete buy-side matching saga");
            }
            if let Err(e) = matching_saga.on_trade_emitted(trade.sell_order_id).await {
                warn!(trade_id = %trade.id, error = %e, "failed to complete sell-side matching saga");
            }
            if let Err(e) = account_service.handle_trade_executed(&trade, &envelope.trace_id).await {
                warn!(trade_id = %trade.id, error = %e, "account service failed to confirm trade");
            }
        }
        "TradeRollbackEvent" => {
            let Ok(envelope) = serde_json::from_value::<EventEnvelope<TradeRollbackEvent>>(msg.payload.clone()) else {
                warn!("malformed TradeRollbackEvent payload");
                return;
            };
            let p = envelope.payload;
            if p.trade_id == Uuid::nil() {
                // Rollback of a matching attempt that never produced a trade
                // (order cancelled mid-match) — nothing for the account
                // service to reverse.
                return;
            }
            match trades.find_by_id(p.trade_id).await {
                Ok(Some(trade)) => {
                    if let Err(e) = account_service.handle_trade_rollback(&trade, &p.reason, &envelope.trace_id).await {
                        warn!(trade_id = %p.trade_id, error = %e, "account service failed to roll back trade");
                    }
                }
                Ok(None) => warn!(trade_id = %p.trade_id, "TradeRollbackEvent for unknown trade"),
                Err(e) => warn!(trade_id = %p.trade_id, error = %e, "failed to load trade for rollback"),
            }
        }
        "TradeFailedEvent" => {
            let Ok(envelope) = serde_json::from_value::<EventEnvelope<TradeFailedEvent>>(msg.payload.clone()) else {
                warn!("malformed TradeFailedEvent payload");
                return;
            };
            let order_id = envelope.payload.order_id;
            if let Err(e) = matching_saga.on_engine_exception(order_id).await {
                warn!(%order_id, error = %e, "failed to mark matching saga failed on engine exception");
            }
        }
        other => warn!(event_type = other, "trade events consumer received unrecognized event type"),
    }
}

/// Order Service reacts to `account.events` to complete or cancel the
/// order a reservation succeeded or failed for.
fn spawn_account_events_consumer(bus: Arc<dyn Bus>, order_service: Arc<OrderSvc>) {
    let mut rx = bus.subscribe(Topic::AccountEvents);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => handle_account_event(&msg, &order_service).await,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "account events consumer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn handle_account_event(msg: &BusMessage, order_service: &Arc<OrderSvc>) {
    match msg.event_type.as_str() {
        "AccountUpdatedEvent" => {
            let Ok(envelope) = serde_json::from_value::<EventEnvelope<AccountUpdatedEvent>>(msg.payload.clone()) else {
                warn!("malformed AccountUpdatedEvent payload");
                return;
            };
            let order_id = envelope.payload.order_id;
            if let Err(e) = order_service.handle_account_updated(order_id).await {
                warn!(%order_id, error = %e, "order service failed to complete order");
            }
        }
        "AccountUpdateFailedEvent" => {
            let Ok(envelope) = serde_json::from_value::<EventEnvelope<AccountUpdateFailedEvent>>(msg.payload.clone()) else {
                warn!("malformed AccountUpdateFailedEvent payload");
                return;
            };
            let order_id = envelope.payload.order_id;
            if let Err(e) = order_service.handle_account_update_failed(order_id, &envelope.trace_id).await {
                warn!(%order_id, error = %e, "order service failed to cancel order");
            }
        }
        "AccountRollbackEvent" => {}
        other => warn!(event_type = other, "account events consumer received unrecognized event type"),
    }
}
