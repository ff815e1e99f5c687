//! Unit of Work (spec §4.4): groups the wallet, market, position and
//! trade repositories behind one `sqlx::Transaction` so a multi-table
//! mutation either commits together or not at all.

use crate::error::Result;
use crate::models::{Market, Position, Trade, TradeType, Wallet};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};

pub struct Uow<'t, 'c> {
    pub tx: &'t mut Transaction<'c, Postgres>,
}

impl<'t, 'c> Uow<'t, 'c> {
    pub fn new(tx: &'t mut Transaction<'c, Postgres>) -> Self {
        Self { tx }
    }

    pub async fn lock_wallet(&mut self, user_id: i64) -> Result<Wallet> {
        crate::wallet::lock_wallet(self.tx, user_id).await
    }

    pub async fn lock_market(&mut self, market_id: i64) -> Result<Market> {
        crate::market::lock_market(self.tx, market_id).await
    }

    pub async fn lock_or_create_position(&mut self, user_id: i64, market_id: i64) -> Result<Position> {
        crate::position::lock_or_create(self.tx, user_id, market_id).await
    }

    /// Persist a filled trade row, taking the market's pre/post quantities
    /// as an audit trail alongside the commercial terms.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_trade(
        &mut self,
        user_id: i64,
        market_id: i64,
        trade_type: TradeType,
        side: crate::models::Side,
        shares: Decimal,
        avg_price: Decimal,
        cost: Decimal,
        fee: Decimal,
        q_yes_before: Decimal,
        q_no_before: Decimal,
        q_yes_after: Decimal,
        q_no_after: Decimal,
    ) -> Result<Trade> {
        let trade = sqlx::query_as::<_, Trade>(
            "INSERT INTO trades
                (user_id, market_id, trade_type, side, shares, avg_price, cost, fee,
                 q_yes_before, q_no_before, q_yes_after, q_no_after)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING *",
        )
        .bind(user_id)
        .bind(market_id)
        .bind(trade_type)
        .bind(side)
        .bind(shares)
        .bind(avg_price)
        .bind(cost)
        .bind(fee)
        .bind(q_yes_before)
        .bind(q_no_before)
        .bind(q_yes_after)
        .bind(q_no_after)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(trade)
    }

    pub async fn update_market_quantities(
        &mut self,
        market_id: i64,
        q_yes: Decimal,
        q_no: Decimal,
        volume_delta: Decimal,
    ) -> Result<Market> {
        let market = sqlx::query_as::<_, Market>(
            "UPDATE markets SET q_yes = $1, q_no = $2, volume = volume + $3, updated_at = now()
             WHERE id = $4 RETURNING *",
        )
        .bind(q_yes)
        .bind(q_no)
        .bind(volume_delta)
        .bind(market_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(market)
    }
}
