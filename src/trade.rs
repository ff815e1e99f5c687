//! Trade executor (spec §4.4): orchestrates a buy or sell end to end —
//! quote, wallet debit/credit, position update, market quantity update,
//! trade record — inside one retried SERIALIZABLE transaction.
//!
//! Lock ordering is always market-then-user, mirroring the deterministic
//! ordering `afterburn-mexchange` uses (there: sorted user ids before
//! taking advisory locks) to keep concurrent trades from deadlocking.

use crate::config::Config;
use crate::error::{ExchangeError, Result};
use crate::models::{Side, Trade, TradeType};
use crate::uow::Uow;
use crate::with_serializable_retry;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy)]
pub enum BuyRequest {
    Shares(Decimal),
    Amount(Decimal),
}

pub async fn execute_buy(
    pool: &PgPool,
    config: &Config,
    user_id: i64,
    market_id: i64,
    side: Side,
    request: BuyRequest,
) -> Result<Trade> {
    with_serializable_retry!(pool, |tx| {
        let mut uow = Uow::new(&mut tx);
        execute_buy_body(&mut uow, config, user_id, market_id, side, request).await
    })
}

async fn execute_buy_body(
    uow: &mut Uow<'_, '_>,
    config: &Config,
    user_id: i64,
    market_id: i64,
    side: Side,
    request: BuyRequest,
) -> Result<Trade> {
    let market = uow.lock_market(market_id).await?;
    crate::market::require_tradable(&market, Utc::now())?;

    let quote = match request {
        BuyRequest::Shares(shares) => crate::pricing::quote_buy_by_shares(
            market.q_yes,
            market.q_no,
            market.liquidity_b,
            side,
            shares,
            config.market.fee_rate,
        )?,
        BuyRequest::Amount(amount) => crate::pricing::quote_buy_by_amount(
            market.q_yes,
            market.q_no,
            market.liquidity_b,
            side,
            amount,
            config.market.fee_rate,
            config.market.bisection_max_iterations,
            config.market.bisection_tolerance,
        )?,
    };

    let wallet = uow.lock_wallet(user_id).await?;
    if wallet.balance < quote.total_cost {
        return Err(ExchangeError::InsufficientFunds);
    }

    let position = uow.lock_or_create_position(user_id, market_id).await?;

    let trade = uow
        .record_trade(
            user_id,
            market_id,
            TradeType::Buy,
            side,
            quote.shares,
            quote.avg_price,
            quote.total_cost,
            quote.fee,
            market.q_yes,
            market.q_no,
            quote.new_q_yes,
            quote.new_q_no,
        )
        .await?;

    crate::wallet::deduct_for_trade(uow.tx, &wallet, quote.total_cost, trade.id).await?;
    crate::position::apply_buy(uow.tx, &position, side, quote.shares, quote.avg_price).await?;
    uow.update_market_quantities(market_id, quote.new_q_yes, quote.new_q_no, quote.total_cost)
        .await?;

    Ok(trade)
}

pub async fn execute_sell(
    pool: &PgPool,
    config: &Config,
    user_id: i64,
    market_id: i64,
    side: Side,
    shares: Decimal,
) -> Result<Trade> {
    with_serializable_retry!(pool, |tx| {
        let mut uow = Uow::new(&mut tx);
        execute_sell_body(&mut uow, config, user_id, market_id, side, shares).await
    })
}

async fn execute_sell_body(
    uow: &mut Uow<'_, '_>,
    config: &Config,
    user_id: i64,
    market_id: i64,
    side: Side,
    shares: Decimal,
) -> Result<Trade> {
    let market = uow.lock_market(market_id).await?;
    crate::market::require_tradable(&market, Utc::now())?;

    let position = uow.lock_or_create_position(user_id, market_id).await?;
    let held = match side {
        Side::Yes => position.yes_shares,
        Side::No => position.no_shares,
    };
    if shares > held {
        return Err(ExchangeError::InsufficientShares);
    }

    let quote = crate::pricing::quote_sell_by_shares(
        market.q_yes,
        market.q_no,
        market.liquidity_b,
        side,
        shares,
        config.market.fee_rate,
    )?;

    let wallet = uow.lock_wallet(user_id).await?;

    let trade = uow
        .record_trade(
            user_id,
            market_id,
            TradeType::Sell,
            side,
            quote.shares,
            quote.avg_price,
            quote.net_return,
            quote.fee,
            market.q_yes,
            market.q_no,
            quote.new_q_yes,
            quote.new_q_no,
        )
        .await?;

    crate::wallet::credit_from_trade(uow.tx, &wallet, quote.net_return, trade.id).await?;
    crate::position::apply_sell(uow.tx, &position, side, quote.shares).await?;
    uow.update_market_quantities(market_id, quote.new_q_yes, quote.new_q_no, Decimal::ZERO)
        .await?;

    Ok(trade)
}
