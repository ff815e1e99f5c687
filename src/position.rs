//! Position store (spec §4.3): per-user, per-market share holdings with
//! a volume-weighted average cost basis.

use crate::error::Result;
use crate::models::{Position, Side};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};

/// Locks and returns the position row for `(user_id, market_id)`,
/// creating a zeroed row on first touch.
pub async fn lock_or_create(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    market_id: i64,
) -> Result<Position> {
    if let Some(pos) = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE user_id = $1 AND market_id = $2 FOR UPDATE",
    )
    .bind(user_id)
    .bind(market_id)
    .fetch_optional(&mut **tx)
    .await?
    {
        return Ok(pos);
    }

    let pos = sqlx::query_as::<_, Position>(
        "INSERT INTO positions (user_id, market_id, yes_shares, no_shares, avg_yes_price, avg_no_price)
         VALUES ($1, $2, 0, 0, 0, 0)
         ON CONFLICT (user_id, market_id) DO UPDATE SET user_id = positions.user_id
         RETURNING *",
    )
    .bind(user_id)
    .bind(market_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(pos)
}

/// Apply a buy of `shares` at `avg_price` on `side`, updating the
/// position's volume-weighted average cost basis for that side.
pub async fn apply_buy(
    tx: &mut Transaction<'_, Postgres>,
    position: &Position,
    side: Side,
    shares: Decimal,
    avg_price: Decimal,
) -> Result<Position> {
    let (held, held_avg) = match side {
        Side::Yes => (position.yes_shares, position.avg_yes_price),
        Side::No => (position.no_shares, position.avg_no_price),
    };
    let new_held = held + shares;
    let new_avg = if new_held == Decimal::ZERO {
        Decimal::ZERO
    } else {
        ((held * held_avg) + (shares * avg_price)) / new_held
    };

    let updated = match side {
        Side::Yes => {
            sqlx::query_as::<_, Position>(
                "UPDATE positions SET yes_shares = $1, avg_yes_price = $2, updated_at = now()
                 WHERE id = $3 RETURNING *",
            )
            .bind(new_held)
            .bind(new_avg.round_dp(6))
        }
        Side::No => {
            sqlx::query_as::<_, Position>(
                "UPDATE positions SET no_shares = $1, avg_no_price = $2, updated_at = now()
                 WHERE id = $3 RETURNING *",
            )
            .bind(new_held)
            .bind(new_avg.round_dp(6))
        }
    }
    .bind(position.id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(updated)
}

/// Apply a sell of `shares` on `side`. Cost basis is untouched by a
/// partial sell; a full sell resets the average price to zero.
pub async fn apply_sell(
    tx: &mut Transaction<'_, Postgres>,
    position: &Position,
    side: Side,
    shares: Decimal,
) -> Result<Position> {
    let held = match side {
        Side::Yes => position.yes_shares,
        Side::No => position.no_shares,
    };
    let new_held = (held - shares).max(Decimal::ZERO);
    let reset_avg = new_held == Decimal::ZERO;

    let updated = match side {
        Side::Yes => {
            sqlx::query_as::<_, Position>(
                "UPDATE positions SET yes_shares = $1,
                    avg_yes_price = CASE WHEN $2 THEN 0 ELSE avg_yes_price END,
                    updated_at = now()
                 WHERE id = $3 RETURNING *",
            )
            .bind(new_held)
            .bind(reset_avg)
        }
        Side::No => {
            sqlx::query_as::<_, Position>(
                "UPDATE positions SET no_shares = $1,
                    avg_no_price = CASE WHEN $2 THEN 0 ELSE avg_no_price END,
                    updated_at = now()
                 WHERE id = $3 RETURNING *",
            )
            .bind(new_held)
            .bind(reset_avg)
        }
    }
    .bind(position.id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    #[test]
    fn weighted_average_blends_two_buys() {
        let held = dec!(10);
        let held_avg = dec!(0.4);
        let shares = dec!(10);
        let avg_price = dec!(0.6);
        let new_held = held + shares;
        let new_avg = ((held * held_avg) + (shares * avg_price)) / new_held;
        assert_eq!(new_avg, dec!(0.5));
    }
}
