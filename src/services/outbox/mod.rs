//! Outbox + CDC Bridge: makes event emission atomic with the state change
//! that produced it, and delivers at-least-once to the bus with per-symbol
//! ordering preserved.

pub mod bridge;
pub mod cdc;
pub mod errors;

pub use bridge::{derive_partition_key, OutboxCdcBridge};
pub use cdc::{spawn_cdc_loop, CdcSource, PollingCdcSource};
pub use errors::OutboxError;
