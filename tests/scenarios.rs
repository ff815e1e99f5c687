//! Scenario-level integration tests against a real Postgres instance.
//!
//! Requires `TEST_DATABASE_URL` to point at a disposable database; the
//! schema is dropped and recreated via `stress::setup_test_database` at
//! the start of each test, the same fixture the load-test harness uses.
//! Tests are skipped (not failed) when the variable is unset, so `cargo
//! test` stays green in environments without Postgres available.

use exchange_core::config::Config;
use exchange_core::models::{MarketStatus, Outcome, Side, TradeType};
use exchange_core::trade::{self, BuyRequest};
use exchange_core::{market, settlement, stress};
use rust_decimal_macros::dec;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;

async fn test_pool() -> Option<PgPool> {
    let url = env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");
    stress::setup_test_database(&pool).await.expect("reset schema");
    Some(pool)
}

async fn seed_user(pool: &PgPool, tag: &str, balance: rust_decimal::Decimal) -> i64 {
    let user_id: i64 = sqlx::query_scalar(
        "INSERT INTO users (email, username, password_hash) VALUES ($1, $2, 'x') RETURNING id",
    )
    .bind(format!("{tag}@example.com"))
    .bind(tag)
    .fetch_one(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO wallets (user_id, balance) VALUES ($1, $2)")
        .bind(user_id)
        .bind(balance)
        .execute(pool)
        .await
        .unwrap();
    user_id
}

async fn seed_active_market(pool: &PgPool, creator_id: i64, liquidity_b: rust_decimal::Decimal) -> i64 {
    let now = chrono::Utc::now();
    sqlx::query_scalar(
        "INSERT INTO markets (title, liquidity_b, status, start_time, end_time, creator_id)
         VALUES ('will it rain', $1, 'active', $2, $3, $4) RETURNING id",
    )
    .bind(liquidity_b)
    .bind(now - chrono::Duration::hours(1))
    .bind(now + chrono::Duration::days(7))
    .bind(creator_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// S1: a fresh market with b=1000, a buy of amount=10 on YES debits
/// exactly 10 from the wallet and leaves the AMM's books balanced.
#[tokio::test]
async fn s1_buy_by_amount_debits_exactly_the_quoted_total() {
    let Some(pool) = test_pool().await else { return };
    let config = Config::default();

    let user_id = seed_user(&pool, "s1-trader", dec!(100)).await;
    let market_id = seed_active_market(&pool, user_id, dec!(1000)).await;

    let trade = trade::execute_buy(&pool, &config, user_id, market_id, Side::Yes, BuyRequest::Amount(dec!(10)))
        .await
        .unwrap();

    assert_eq!(trade.trade_type, TradeType::Buy);
    assert!((trade.cost - dec!(10)).abs() <= dec!(0.001));
    let expected_fee = trade.cost - trade.cost / (dec!(1) + config.market.fee_rate);
    assert!((trade.fee - expected_fee).abs() <= dec!(0.001));

    let balance: rust_decimal::Decimal = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!((balance - (dec!(100) - trade.cost)).abs() <= dec!(0.000001));
}

/// S2-style: selling more shares than held is rejected before any row
/// is mutated.
#[tokio::test]
async fn selling_unowned_shares_is_rejected() {
    let Some(pool) = test_pool().await else { return };
    let config = Config::default();

    let user_id = seed_user(&pool, "s2-trader", dec!(100)).await;
    let market_id = seed_active_market(&pool, user_id, dec!(1000)).await;

    let err = trade::execute_sell(&pool, &config, user_id, market_id, Side::Yes, dec!(5))
        .await
        .unwrap_err();
    assert!(matches!(err, exchange_core::error::ExchangeError::InsufficientShares));

    let balance: rust_decimal::Decimal = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(balance, dec!(100));
}

/// A buy followed by selling the same shares back returns most of the
/// stake, net of the round-trip fee — the AMM never owes more than it
/// collected.
#[tokio::test]
async fn buy_then_sell_round_trip_only_loses_the_fee() {
    let Some(pool) = test_pool().await else { return };
    let config = Config::default();

    let user_id = seed_user(&pool, "s3-trader", dec!(1000)).await;
    let market_id = seed_active_market(&pool, user_id, dec!(1000)).await;

    let buy = trade::execute_buy(&pool, &config, user_id, market_id, Side::Yes, BuyRequest::Amount(dec!(50)))
        .await
        .unwrap();
    let sell = trade::execute_sell(&pool, &config, user_id, market_id, Side::Yes, buy.shares)
        .await
        .unwrap();

    assert!(sell.cost < buy.cost);

    let balance: rust_decimal::Decimal = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(balance < dec!(1000));
    assert!(balance > dec!(900));
}

/// Trading against a market outside Active status is rejected.
#[tokio::test]
async fn trading_a_draft_market_is_rejected() {
    let Some(pool) = test_pool().await else { return };
    let config = Config::default();

    let creator_id = seed_user(&pool, "s4-creator", dec!(1000)).await;
    let now = chrono::Utc::now();
    let market_id: i64 = sqlx::query_scalar(
        "INSERT INTO markets (title, liquidity_b, status, start_time, end_time, creator_id)
         VALUES ('draft market', 1000, 'draft', $1, $2, $3) RETURNING id",
    )
    .bind(now - chrono::Duration::hours(1))
    .bind(now + chrono::Duration::days(7))
    .bind(creator_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    let err = trade::execute_buy(&pool, &config, creator_id, market_id, Side::Yes, BuyRequest::Amount(dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, exchange_core::error::ExchangeError::MarketClosed));
}

/// Resolution and settlement pay winning shares out 1:1 and are
/// idempotent against a second settlement call.
#[tokio::test]
async fn resolve_and_settle_pays_winners_and_is_idempotent() {
    let Some(pool) = test_pool().await else { return };
    let config = Config::default();

    let user_id = seed_user(&pool, "s5-trader", dec!(1000)).await;
    let market_id = seed_active_market(&pool, user_id, dec!(1000)).await;

    let buy = trade::execute_buy(&pool, &config, user_id, market_id, Side::Yes, BuyRequest::Amount(dec!(100)))
        .await
        .unwrap();

    {
        let mut tx = pool.begin().await.unwrap();
        let m = market::lock_market(&mut tx, market_id).await.unwrap();
        market::resolve(&mut tx, &m, Outcome::Yes).await.unwrap();
        tx.commit().await.unwrap();
    }

    let before_balance: rust_decimal::Decimal =
        sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();

    let summary = settlement::settle_market(&pool, market_id).await.unwrap();
    assert_eq!(summary.positions_settled, 1);
    assert_eq!(summary.total_paid_out, buy.shares);

    let after_balance: rust_decimal::Decimal =
        sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(after_balance, before_balance + buy.shares);

    let repeat = settlement::settle_market(&pool, market_id).await.unwrap();
    assert_eq!(repeat.positions_settled, 0);
    assert_eq!(repeat.positions_skipped_already_settled, 1);

    let mut verify_tx = pool.begin().await.unwrap();
    let market = market::lock_market(&mut verify_tx, market_id).await.unwrap();
    assert_eq!(market.status, MarketStatus::Resolved);
}
