//! Documents the relational schema every `postgres` repository
//! implementation assumes. Not a migration runner — deployments apply
//! these as plain SQL migrations; this module exists so the shapes below
//! stay next to the code that queries them.
//!
//! ```sql
//! CREATE TABLE orders (
//!     id UUID PRIMARY KEY,
//!     user_id UUID NOT NULL,
//!     symbol TEXT NOT NULL,
//!     side TEXT NOT NULL,
//!     order_type TEXT NOT NULL,
//!     quantity NUMERIC(24, 8) NOT NULL,
//!     price NUMERIC(24, 2),
//!     status TEXT NOT NULL,
//!     filled_quantity NUMERIC(24, 8) NOT NULL DEFAULT 0,
//!     cancellation_reason TEXT,
//!     trace_id TEXT NOT NULL,
//!     version INT NOT NULL DEFAULT 0,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE accounts (
//!     user_id UUID PRIMARY KEY,
//!     cash NUMERIC(24, 4) NOT NULL,
//!     reserved NUMERIC(24, 4) NOT NULL DEFAULT 0,
//!     version INT NOT NULL DEFAULT 0
//! );
//!
//! CREATE TABLE stock_holdings (
//!     user_id UUID NOT NULL,
//!     symbol TEXT NOT NULL,
//!     quantity NUMERIC(24, 8) NOT NULL DEFAULT 0,
//!     available_quantity NUMERIC(24, 8) NOT NULL DEFAULT 0,
//!     average_price NUMERIC(24, 4) NOT NULL DEFAULT 0,
//!     version INT NOT NULL DEFAULT 0,
//!     PRIMARY KEY (user_id, symbol)
//! );
//!
//! CREATE TABLE transaction_logs (
//!     id UUID PRIMARY KEY,
//!     trade_id UUID NOT NULL,
//!     user_id UUID NOT NULL,
//!     side TEXT NOT NULL,
//!     amount NUMERIC(24, 4) NOT NULL,
//!     balance_before NUMERIC(24, 4) NOT NULL,
//!     balance_after NUMERIC(24, 4) NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE reservation_info (
//!     order_id UUID PRIMARY KEY,
//!     user_id UUID NOT NULL,
//!     symbol TEXT NOT NULL,
//!     side TEXT NOT NULL,
//!     quantity NUMERIC(24, 8) NOT NULL,
//!     price NUMERIC(24, 2),
//!     reserved_amount NUMERIC(24, 4),
//!     status TEXT NOT NULL,
//!     trace_id TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE order_outbox_events (
//!     id UUID PRIMARY KEY,
//!     aggregate_type TEXT NOT NULL,
//!     aggregate_id TEXT NOT NULL,
//!     event_type TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'PENDING',
//!     created_at TIMESTAMPTZ NOT NULL,
//!     published_at TIMESTAMPTZ
//! );
//! CREATE INDEX idx_outbox_pending ON order_outbox_events (created_at) WHERE status = 'PENDING';
//!
//! CREATE TABLE saga_states (
//!     saga_id UUID PRIMARY KEY,
//!     kind TEXT NOT NULL,
//!     trade_id UUID,
//!     order_id UUID NOT NULL,
//!     user_id UUID,
//!     symbol TEXT NOT NULL,
//!     status TEXT NOT NULL,
//!     event_type TEXT NOT NULL,
//!     payload_snapshot JSONB NOT NULL,
//!     timeout_at TIMESTAMPTZ NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX idx_saga_active_deadline ON saga_states (timeout_at) WHERE status NOT IN ('COMPLETED', 'COMPENSATED', 'FAILED', 'TIMEOUT');
//! ```
