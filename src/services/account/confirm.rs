//! Trade confirmation and rollback: the second phase of the reservation
//! protocol, always taken under the sorted buyer/seller lock pair so a
//! concurrent confirm and rollback for the same two users can never
//! interleave.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::TransactionSide;
use crate::models::account::{Account, StockHolding, TransactionLog};
use crate::models::trade::Trade;
use crate::repo::{AccountRepository, HoldingRepository, TransactionLogRepository};

use super::errors::AccountError;
use super::locks::LockManager;

const DEFAULT_STARTING_CASH: rust_decimal::Decimal = rust_decimal::Decimal::ZERO;

pub struct ConfirmationService<A, H, T> {
    accounts: Arc<A>,
    holdings: Arc<H>,
    tx_logs: Arc<T>,
    locks: Arc<LockManager>,
    lock_timeout: Duration,
}

impl<A, H, T> ConfirmationService<A, H, T>
where
    A: AccountRepository,
    H: HoldingRepository,
    T: TransactionLogRepository,
{
    pub fn new(accounts: Arc<A>, holdings: Arc<H>, tx_logs: Arc<T>, locks: Arc<LockManager>, lock_timeout: Duration) -> Self {
        Self { accounts, holdings, tx_logs, locks, lock_timeout }
    }

    /// Move `trade`'s notional from the buyer's reservation into the
    /// seller's cash, and move `trade.quantity` shares from the seller's
    /// holding into the buyer's. Sorted-lock protected so the two account
    /// mutations and the two holding mutations are never split by a
    /// concurrent confirm/rollback on the same pair of users.
    pub async fn confirm_trade(&self, trade: &Trade) -> Result<(), AccountError> {
        let (_buy_guard, _sell_guard) = self.locks.acquire_sorted(trade.buy_user_id, trade.sell_user_id, self.lock_timeout).await?;
        let notional = trade.notional();

        let mut buyer_account = self.get_account(trade.buy_user_id).await?;
        let buyer_cash_before = buyer_account.cash;
        buyer_account.confirm_reservation(notional).map_err(state_err)?;
        self.accounts.update(&buyer_account).await?;

        let mut buyer_holding = self.holdings.get_or_create(trade.buy_user_id, &trade.symbol).await?;
        buyer_holding.add_shares(trade.quantity, trade.price).map_err(state_err)?;
        self.holdings.update(&buyer_holding).await?;

        let mut seller_holding = self.get_holding(trade.sell_user_id, &trade.symbol).await?;
        seller_holding.confirm_sale(trade.quantity).map_err(state_err)?;
        self.holdings.update(&seller_holding).await?;

        let mut seller_account = self.get_account(trade.sell_user_id).await?;
        let seller_cash_before = seller_account.cash;
        seller_account.deposit(notional).map_err(state_err)?;
        self.accounts.update(&seller_account).await?;

        self.tx_logs
            .insert(&TransactionLog::new(trade.id, trade.buy_user_id, TransactionSide::Buy, notional, buyer_cash_before, buyer_account.cash))
            .await?;
        self.tx_logs
            .insert(&TransactionLog::new(trade.id, trade.sell_user_id, TransactionSide::Sell, notional, seller_cash_before, seller_account.cash))
            .await?;
        Ok(())
    }

    /// Inverse of `confirm_trade`, used by saga compensation: the buyer's
    /// cash comes back (but does not re-enter `reserved`), the shares move
    /// back from buyer to seller.
    pub async fn rollback_trade(&self, trade: &Trade) -> Result<(), AccountError> {
        let (_buy_guard, _sell_guard) = self.locks.acquire_sorted(trade.buy_user_id, trade.sell_user_id, self.lock_timeout).await?;
        let notional = trade.notional();

        let mut buyer_account = self.get_account(trade.buy_user_id).await?;
        let buyer_cash_before = buyer_account.cash;
        buyer_account.reverse_confirmation(notional).map_err(state_err)?;
        self.accounts.update(&buyer_account).await?;

        let mut buyer_holding = self.get_holding(trade.buy_user_id, &trade.symbol).await?;
        buyer_holding.remove_shares(trade.quantity, trade.price).map_err(state_err)?;
        self.holdings.update(&buyer_holding).await?;

        // The seller's historical average price was lost once `confirm_sale`
        // zeroed it out on full liquidation; re-crediting at the trade price
        // is the best available reconstruction without a cost-basis ledger.
        let mut seller_holding = self.holdings.get_or_create(trade.sell_user_id, &trade.symbol).await?;
        seller_holding.add_shares(trade.quantity, trade.price).map_err(state_err)?;
        self.holdings.update(&seller_holding).await?;

        let mut seller_account = self.get_account(trade.sell_user_id).await?;
        let seller_cash_before = seller_account.cash;
        seller_account.withdraw(notional).map_err(state_err)?;
        self.accounts.update(&seller_account).await?;

        self.tx_logs
            .insert(&TransactionLog::new(trade.id, trade.buy_user_id, TransactionSide::Rollback, notional, buyer_cash_before, buyer_account.cash))
            .await?;
        self.tx_logs
            .insert(&TransactionLog::new(trade.id, trade.sell_user_id, TransactionSide::Rollback, notional, seller_cash_before, seller_account.cash))
            .await?;
        Ok(())
    }

    /// Current cash balance, used to populate `AccountUpdatedEvent` after a
    /// successful confirmation.
    pub async fn account_balance(&self, user_id: Uuid) -> Result<rust_decimal::Decimal, AccountError> {
        Ok(self.get_account(user_id).await?.cash)
    }

    async fn get_account(&self, user_id: Uuid) -> Result<Account, AccountError> {
        self.accounts.get_or_create(user_id, DEFAULT_STARTING_CASH).await.map_err(AccountError::Core)
    }

    async fn get_holding(&self, user_id: Uuid, symbol: &str) -> Result<StockHolding, AccountError> {
        self.holdings.get_or_create(user_id, symbol).await.map_err(AccountError::Core)
    }
}

fn state_err(msg: String) -> AccountError {
    AccountError::Core(CoreError::State(msg))
}
