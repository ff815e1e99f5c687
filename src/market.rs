//! Market lifecycle (spec §4.5): creation and the
//! Draft → Active → {Suspended, Resolved, Cancelled} state machine.

use crate::config::MarketConfig;
use crate::error::{ExchangeError, Result};
use crate::models::{Market, MarketStatus, Outcome, Role};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};

/// Whether `from -> to` is an allowed lifecycle transition.
fn allowed_transition(from: MarketStatus, to: MarketStatus) -> bool {
    use MarketStatus::*;
    matches!(
        (from, to),
        (Draft, Active)
            | (Draft, Cancelled)
            | (Active, Suspended)
            | (Active, Resolved)
            | (Active, Cancelled)
            | (Suspended, Active)
            | (Suspended, Resolved)
            | (Suspended, Cancelled)
    )
}

pub fn require_role(role: Role, required: Role) -> Result<()> {
    match (role, required) {
        (Role::Admin, _) => Ok(()),
        (Role::User, Role::User) => Ok(()),
        _ => Err(ExchangeError::Forbidden),
    }
}

pub async fn create_market(
    tx: &mut Transaction<'_, Postgres>,
    config: &MarketConfig,
    creator_id: i64,
    title: &str,
    description: &str,
    category: &str,
    image_url: Option<&str>,
    resolution_source: Option<&str>,
    liquidity_b: Option<Decimal>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<Market> {
    if title.trim().is_empty() {
        return Err(ExchangeError::InvalidAmount("market title must not be empty".into()));
    }
    if end_time <= start_time {
        return Err(ExchangeError::InvalidAmount("end_time must be after start_time".into()));
    }
    let b = liquidity_b.unwrap_or(config.liquidity_default);
    if b < config.liquidity_minimum {
        return Err(ExchangeError::InvalidAmount(format!(
            "liquidity_b must be at least {}",
            config.liquidity_minimum
        )));
    }

    let market = sqlx::query_as::<_, Market>(
        "INSERT INTO markets
            (title, description, category, image_url, resolution_source, status,
             q_yes, q_no, liquidity_b, volume, start_time, end_time, creator_id)
         VALUES ($1, $2, $3, $4, $5, 'draft', 0, 0, $6, 0, $7, $8, $9)
         RETURNING *",
    )
    .bind(title)
    .bind(description)
    .bind(category)
    .bind(image_url)
    .bind(resolution_source)
    .bind(b)
    .bind(start_time)
    .bind(end_time)
    .bind(creator_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(market)
}

/// Lock and return a market row by id.
pub async fn lock_market(tx: &mut Transaction<'_, Postgres>, market_id: i64) -> Result<Market> {
    sqlx::query_as::<_, Market>("SELECT * FROM markets WHERE id = $1 FOR UPDATE")
        .bind(market_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| ExchangeError::NotFound(format!("market {market_id}")))
}

pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    market: &Market,
    to: MarketStatus,
) -> Result<Market> {
    if !allowed_transition(market.status, to) {
        return Err(ExchangeError::InvalidTransition {
            from: format!("{:?}", market.status),
            to: format!("{to:?}"),
        });
    }
    let updated = sqlx::query_as::<_, Market>(
        "UPDATE markets SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(to)
    .bind(market.id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(updated)
}

/// Transition a market to `Resolved` and stamp its outcome. Trading and
/// settlement against the market both require this to have run first.
pub async fn resolve(
    tx: &mut Transaction<'_, Postgres>,
    market: &Market,
    outcome: Outcome,
) -> Result<Market> {
    if !allowed_transition(market.status, MarketStatus::Resolved) {
        return Err(ExchangeError::InvalidTransition {
            from: format!("{:?}", market.status),
            to: "Resolved".into(),
        });
    }
    let updated = sqlx::query_as::<_, Market>(
        "UPDATE markets SET status = 'resolved', outcome = $1, resolved_at = now(), updated_at = now()
         WHERE id = $2 RETURNING *",
    )
    .bind(outcome)
    .bind(market.id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(updated)
}

/// A market only accepts trades while `Active` and within its window.
pub fn require_tradable(market: &Market, now: DateTime<Utc>) -> Result<()> {
    if market.status != MarketStatus::Active {
        return Err(ExchangeError::MarketClosed);
    }
    if now < market.start_time || now > market.end_time {
        return Err(ExchangeError::OutOfWindow);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_can_only_move_to_active_or_cancelled() {
        assert!(allowed_transition(MarketStatus::Draft, MarketStatus::Active));
        assert!(allowed_transition(MarketStatus::Draft, MarketStatus::Cancelled));
        assert!(!allowed_transition(MarketStatus::Draft, MarketStatus::Resolved));
    }

    #[test]
    fn suspended_market_can_still_be_resolved_or_reactivated() {
        assert!(allowed_transition(MarketStatus::Suspended, MarketStatus::Resolved));
        assert!(allowed_transition(MarketStatus::Suspended, MarketStatus::Active));
        assert!(allowed_transition(MarketStatus::Suspended, MarketStatus::Cancelled));
    }

    #[test]
    fn resolved_and_cancelled_are_terminal() {
        assert!(!allowed_transition(MarketStatus::Resolved, MarketStatus::Active));
        assert!(!allowed_transition(MarketStatus::Cancelled, MarketStatus::Active));
    }

    #[test]
    fn role_gate_admits_admin_for_any_required_role() {
        assert!(require_role(Role::Admin, Role::Admin).is_ok());
        assert!(require_role(Role::Admin, Role::User).is_ok());
        assert!(require_role(Role::User, Role::Admin).is_err());
    }
}
