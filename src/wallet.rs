//! Wallet ledger (spec §4.2): balance mutation plus an append-only audit
//! trail. Every mutation goes through `apply_entry`, which writes a
//! `WalletTransaction` row whose `balance_before`/`balance_after` chain
//! contiguously — the same idiom as `afterburn-mexchange`'s
//! `LedgerEntry::append_in_tx`, adapted from its `Trade` table to ours.

use crate::error::{ExchangeError, Result};
use crate::models::{Wallet, WalletTransaction, WalletTransactionKind};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};

/// Locks and returns the wallet row for `user_id`, blocking concurrent
/// writers until this transaction commits (`SELECT ... FOR UPDATE`).
pub async fn lock_wallet(tx: &mut Transaction<'_, Postgres>, user_id: i64) -> Result<Wallet> {
    let wallet = sqlx::query_as::<_, Wallet>(
        "SELECT * FROM wallets WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| ExchangeError::NotFound(format!("wallet for user {user_id}")))?;
    Ok(wallet)
}

/// Apply a signed `amount` to `wallet`, writing a matching ledger row.
/// `amount` is positive for credits, negative for debits. Rejects a debit
/// that would drive `balance` negative.
async fn apply_entry(
    tx: &mut Transaction<'_, Postgres>,
    wallet: &Wallet,
    kind: WalletTransactionKind,
    amount: Decimal,
    description: &str,
    reference_id: Option<i64>,
) -> Result<Wallet> {
    let balance_before = wallet.balance;
    let balance_after = balance_before + amount;
    if balance_after < Decimal::ZERO {
        return Err(ExchangeError::InsufficientFunds);
    }

    let updated = sqlx::query_as::<_, Wallet>(
        "UPDATE wallets SET balance = $1, updated_at = now() WHERE id = $2 AND balance = $3 RETURNING *",
    )
    .bind(balance_after)
    .bind(wallet.id)
    .bind(balance_before)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| ExchangeError::Conflict("wallet balance changed concurrently".into()))?;

    sqlx::query_as::<_, WalletTransaction>(
        "INSERT INTO wallet_transactions
            (wallet_id, kind, amount, balance_before, balance_after, description, reference_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(wallet.id)
    .bind(kind)
    .bind(amount)
    .bind(balance_before)
    .bind(balance_after)
    .bind(description)
    .bind(reference_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(updated)
}

pub async fn deposit(
    tx: &mut Transaction<'_, Postgres>,
    wallet: &Wallet,
    amount: Decimal,
) -> Result<Wallet> {
    if amount <= Decimal::ZERO {
        return Err(ExchangeError::InvalidAmount("deposit amount must be positive".into()));
    }
    apply_entry(tx, wallet, WalletTransactionKind::Deposit, amount, "deposit", None).await
}

pub async fn withdraw(
    tx: &mut Transaction<'_, Postgres>,
    wallet: &Wallet,
    amount: Decimal,
) -> Result<Wallet> {
    if amount <= Decimal::ZERO {
        return Err(ExchangeError::InvalidAmount("withdraw amount must be positive".into()));
    }
    apply_entry(tx, wallet, WalletTransactionKind::Withdraw, -amount, "withdraw", None).await
}

/// Debit `total_cost` for a buy trade. `trade_id` links the ledger row to
/// the trade it paid for.
pub async fn deduct_for_trade(
    tx: &mut Transaction<'_, Postgres>,
    wallet: &Wallet,
    total_cost: Decimal,
    trade_id: i64,
) -> Result<Wallet> {
    apply_entry(
        tx,
        wallet,
        WalletTransactionKind::Trade,
        -total_cost,
        "buy trade",
        Some(trade_id),
    )
    .await
}

/// Credit `net_return` for a sell trade.
pub async fn credit_from_trade(
    tx: &mut Transaction<'_, Postgres>,
    wallet: &Wallet,
    net_return: Decimal,
    trade_id: i64,
) -> Result<Wallet> {
    apply_entry(
        tx,
        wallet,
        WalletTransactionKind::Trade,
        net_return,
        "sell trade",
        Some(trade_id),
    )
    .await
}

/// Credit a settlement payout for a resolved market position.
pub async fn credit_settlement(
    tx: &mut Transaction<'_, Postgres>,
    wallet: &Wallet,
    payout: Decimal,
    market_id: i64,
) -> Result<Wallet> {
    if payout <= Decimal::ZERO {
        return Ok(wallet.clone());
    }
    apply_entry(
        tx,
        wallet,
        WalletTransactionKind::Settlement,
        payout,
        "market settlement",
        Some(market_id),
    )
    .await
}
