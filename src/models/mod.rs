pub mod account;
pub mod order;
pub mod outbox;
pub mod saga;
pub mod trade;

pub use account::{Account, ReservationInfo, ReservationStatus, StockHolding, TransactionLog, TransactionSide};
pub use order::{CancellationReason, Order, OrderSide, OrderStatus, OrderType};
pub use outbox::{OutboxRecord, OutboxStatus};
pub use saga::{SagaKind, SagaState, SagaStatus};
pub use trade::Trade;
