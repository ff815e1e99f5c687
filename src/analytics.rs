//! Risk & P&L analytics (spec §4.7): fee income windows, AMM exposure per
//! market, and per-user fee contribution leaderboards, read straight off
//! the trades/positions tables (no separate materialized store).

use crate::error::{ExchangeError, Result};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use rust_decimal::Decimal;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, Default)]
pub struct FeeWindow {
    pub today: Decimal,
    pub this_week: Decimal,
    pub this_month: Decimal,
}

/// Start of "this week", defined as the most recent Sunday 00:00 UTC
/// at or before `now` (Open Question 4, resolved in SPEC_FULL.md).
fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_sunday = now.weekday().num_days_from_sunday() as i64;
    (now - Duration::days(days_since_sunday))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now)
}

fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now)
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub async fn fee_income(pool: &PgPool, now: DateTime<Utc>) -> Result<FeeWindow> {
    let fetch_since = |since: DateTime<Utc>| {
        sqlx::query_scalar::<_, Option<Decimal>>(
            "SELECT sum(fee) FROM trades WHERE created_at >= $1",
        )
        .bind(since)
    };

    let today = fetch_since(day_start(now)).fetch_one(pool).await?.unwrap_or_default();
    let this_week = fetch_since(week_start(now)).fetch_one(pool).await?.unwrap_or_default();
    let this_month = fetch_since(month_start(now)).fetch_one(pool).await?.unwrap_or_default();

    Ok(FeeWindow { today, this_week, this_month })
}

/// The AMM's profit or loss on a single market (spec §4.7): buy volume net
/// of fee (fee is platform revenue, not AMM cash-in) minus sell volume paid
/// out minus whatever was paid out in settlement.
#[derive(Debug, Clone, Copy)]
pub struct MarketPnl {
    pub market_id: i64,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub settlement_payout: Decimal,
    pub pnl: Decimal,
}

pub async fn market_pnl(pool: &PgPool, market_id: i64) -> Result<MarketPnl> {
    let (buy_volume, sell_volume) = sqlx::query_as::<_, (Option<Decimal>, Option<Decimal>)>(
        "SELECT
            sum(CASE WHEN trade_type = 'buy' THEN cost - fee ELSE 0 END),
            sum(CASE WHEN trade_type = 'sell' THEN cost ELSE 0 END)
         FROM trades WHERE market_id = $1",
    )
    .bind(market_id)
    .fetch_one(pool)
    .await?;

    let settlement_payout = sqlx::query_scalar::<_, Option<Decimal>>(
        "SELECT sum(amount) FROM wallet_transactions
         WHERE kind = 'settlement' AND reference_id = $1",
    )
    .bind(market_id)
    .fetch_one(pool)
    .await?
    .unwrap_or_default();

    let buy_volume = buy_volume.unwrap_or_default();
    let sell_volume = sell_volume.unwrap_or_default();

    Ok(MarketPnl {
        market_id,
        buy_volume,
        sell_volume,
        settlement_payout,
        pnl: buy_volume - sell_volume - settlement_payout,
    })
}

/// Sum of [`market_pnl`]'s `pnl` across every resolved market, computed as
/// one aggregate query rather than one `market_pnl` call per market.
pub async fn resolved_markets_pnl(pool: &PgPool) -> Result<Decimal> {
    let pnl = sqlx::query_scalar::<_, Option<Decimal>>(
        "WITH trade_flow AS (
            SELECT market_id,
                   sum(CASE WHEN trade_type = 'buy' THEN cost - fee ELSE 0 END) AS buy_volume,
                   sum(CASE WHEN trade_type = 'sell' THEN cost ELSE 0 END) AS sell_volume
            FROM trades
            GROUP BY market_id
        ),
        settlement_flow AS (
            SELECT reference_id AS market_id, sum(amount) AS settlement_payout
            FROM wallet_transactions
            WHERE kind = 'settlement'
            GROUP BY reference_id
        )
        SELECT sum(
            coalesce(tf.buy_volume, 0) - coalesce(tf.sell_volume, 0)
                - coalesce(sf.settlement_payout, 0)
        )
        FROM markets m
        LEFT JOIN trade_flow tf ON tf.market_id = m.id
        LEFT JOIN settlement_flow sf ON sf.market_id = m.id
        WHERE m.status = 'resolved'",
    )
    .fetch_one(pool)
    .await?
    .unwrap_or_default();
    Ok(pnl)
}

/// Total AMM cash flow across every market (buy volume net of fee minus
/// sell volume), ignoring settlement — the AMM's trading-side P&L before
/// any market has paid out.
pub async fn total_amm_cash_flow(pool: &PgPool) -> Result<Decimal> {
    let flow = sqlx::query_scalar::<_, Option<Decimal>>(
        "SELECT sum(CASE WHEN trade_type = 'buy' THEN cost - fee ELSE -cost END) FROM trades",
    )
    .fetch_one(pool)
    .await?
    .unwrap_or_default();
    Ok(flow)
}

#[derive(Debug, Clone, Copy)]
pub struct MarketExposure {
    pub market_id: i64,
    pub exposure: Decimal,
}

/// Total payout the platform is on the hook for if every open position on
/// unresolved markets were to win its side right now, plus the markets
/// contributing the most to that total.
#[derive(Debug, Clone)]
pub struct UnsettledExposure {
    pub total: Decimal,
    pub top_markets: Vec<MarketExposure>,
}

pub async fn unsettled_exposure(pool: &PgPool, top_n: i64) -> Result<UnsettledExposure> {
    if top_n <= 0 {
        return Err(ExchangeError::InvalidAmount("top_n must be positive".into()));
    }
    let rows = sqlx::query_as::<_, (i64, Decimal)>(
        "SELECT p.market_id, sum(GREATEST(p.yes_shares, p.no_shares)) as exposure
         FROM positions p
         JOIN markets m ON m.id = p.market_id
         WHERE m.status NOT IN ('resolved', 'cancelled')
         GROUP BY p.market_id
         ORDER BY exposure DESC",
    )
    .fetch_all(pool)
    .await?;

    let total = rows.iter().fold(Decimal::ZERO, |acc, (_, exposure)| acc + exposure);
    let top_markets = rows
        .into_iter()
        .take(top_n as usize)
        .map(|(market_id, exposure)| MarketExposure { market_id, exposure })
        .collect();

    Ok(UnsettledExposure { total, top_markets })
}

#[derive(Debug, Clone)]
pub struct FeeContributor {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub fees_paid: Decimal,
    pub cost_total: Decimal,
    pub trade_count: i64,
}

/// The `limit_n` users who have paid the most in trading fees overall.
pub async fn top_fee_contributors(pool: &PgPool, limit_n: i64) -> Result<Vec<FeeContributor>> {
    if limit_n <= 0 {
        return Err(ExchangeError::InvalidAmount("limit_n must be positive".into()));
    }
    let rows = sqlx::query_as::<_, (i64, String, String, Decimal, Decimal, i64)>(
        "SELECT u.id, u.username, u.email, sum(t.fee) as fees_paid, sum(t.cost) as cost_total,
                count(*) as trade_count
         FROM trades t
         JOIN users u ON u.id = t.user_id
         GROUP BY u.id, u.username, u.email
         ORDER BY fees_paid DESC LIMIT $1",
    )
    .bind(limit_n)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(user_id, username, email, fees_paid, cost_total, trade_count)| FeeContributor {
            user_id,
            username,
            email,
            fees_paid,
            cost_total,
            trade_count,
        })
        .collect())
}

/// Platform profit: all fees collected, ever, plus the AMM's realized P&L
/// on every market that has resolved.
pub async fn platform_profit(pool: &PgPool) -> Result<Decimal> {
    let total_fees = sqlx::query_scalar::<_, Option<Decimal>>("SELECT sum(fee) FROM trades")
        .fetch_one(pool)
        .await?
        .unwrap_or_default();
    Ok(total_fees + resolved_markets_pnl(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn week_start_lands_on_sunday_midnight() {
        // 2026-07-30 is a Thursday.
        let thursday = Utc.with_ymd_and_hms(2026, 7, 30, 15, 30, 0).unwrap();
        let start = week_start(thursday);
        assert_eq!(start.weekday(), Weekday::Sun);
        assert_eq!((start.hour(), start.minute(), start.second()), (0, 0, 0));
        assert!(start <= thursday);
    }

    #[test]
    fn week_start_on_a_sunday_is_itself() {
        let sunday_morning = Utc.with_ymd_and_hms(2026, 8, 2, 9, 0, 0).unwrap();
        let start = week_start(sunday_morning);
        assert_eq!(start.day(), 2);
    }
}
