//! The Matching Engine service: symbol-partitioned, lock-free order books
//! consumed from `order.events`, producing `trade.events`.

pub mod backpressure;
pub mod book;
pub mod circuit_breaker;
pub mod engine;
pub mod saga;
pub mod types;
pub mod worker;

pub use engine::{EngineMetrics, MatchingEngine};
pub use saga::{MatchingSagaService, MatchingSagaTimeoutHandler};
