//! Settlement (spec §4.6): once a market is resolved, winning shares pay
//! out 1:1 and losing shares pay nothing. Settlement is idempotent — a
//! position already paid for a given market is skipped rather than
//! double-credited, the same guard the teacher's `resolve_event`
//! provides via a zero-sum balance check before mutating rows.

use crate::error::{ExchangeError, Result};
use crate::models::{MarketStatus, Outcome, Position, WalletTransactionKind};
use rust_decimal::Decimal;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementSummary {
    pub positions_settled: u64,
    pub positions_skipped_already_settled: u64,
    pub total_paid_out: Decimal,
}

/// Pay out every open position on `market_id` according to its outcome.
/// The market must already be in `Resolved` status (see `market::resolve`).
pub async fn settle_market(pool: &PgPool, market_id: i64) -> Result<SettlementSummary> {
    let mut tx = pool.begin().await.map_err(ExchangeError::from)?;

    let market = crate::market::lock_market(&mut tx, market_id).await?;
    if market.status != MarketStatus::Resolved {
        return Err(ExchangeError::InvalidTrade(
            "market must be resolved before settlement".into(),
        ));
    }
    let outcome = market
        .outcome
        .ok_or_else(|| ExchangeError::Internal(anyhow::anyhow!("resolved market missing outcome")))?;

    let positions = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE market_id = $1 AND (yes_shares > 0 OR no_shares > 0) FOR UPDATE",
    )
    .bind(market_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut summary = SettlementSummary::default();

    for position in positions {
        let already_settled = sqlx::query_scalar::<_, i64>(
            "SELECT count(*) FROM wallet_transactions wt
             JOIN wallets w ON w.id = wt.wallet_id
             WHERE w.user_id = $1 AND wt.kind = 'settlement' AND wt.reference_id = $2",
        )
        .bind(position.user_id)
        .bind(market_id)
        .fetch_one(&mut *tx)
        .await?;
        if already_settled > 0 {
            summary.positions_skipped_already_settled += 1;
            continue;
        }

        let payout = match outcome {
            Outcome::Yes => position.yes_shares,
            Outcome::No => position.no_shares,
        };

        let wallet = crate::wallet::lock_wallet(&mut tx, position.user_id).await?;
        if payout > Decimal::ZERO {
            crate::wallet::credit_settlement(&mut tx, &wallet, payout, market_id).await?;
            summary.total_paid_out += payout;
        } else {
            // Losing side still gets a zero-amount ledger row so downstream
            // reporting sees every position as accounted for.
            sqlx::query(
                "INSERT INTO wallet_transactions
                    (wallet_id, kind, amount, balance_before, balance_after, description, reference_id)
                 VALUES ($1, $2, 0, $3, $3, 'market settlement (no payout)', $4)",
            )
            .bind(wallet.id)
            .bind(WalletTransactionKind::Settlement)
            .bind(wallet.balance)
            .bind(market_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE positions SET yes_shares = 0, no_shares = 0, updated_at = now() WHERE id = $1")
            .bind(position.id)
            .execute(&mut *tx)
            .await?;

        summary.positions_settled += 1;
    }

    tx.commit().await.map_err(ExchangeError::from)?;
    Ok(summary)
}
