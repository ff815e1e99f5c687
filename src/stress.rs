//! Load-test harness for the trade executor (ambient stack, spec §6 test
//! tooling). Spins up its own schema, seeds users/wallets/a market, then
//! fires concurrent buys and sells through `trade::execute_buy` /
//! `execute_sell` to exercise the SERIALIZABLE retry path under
//! contention — the same role the teacher's `stress.rs` plays for its
//! market-update transaction, adapted to the new schema and executor.

use crate::config::Config;
use crate::models::Side;
use crate::trade::{self, BuyRequest};
use anyhow::Result;
use rand::prelude::*;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use std::env;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

const NUM_USERS: usize = 200;
const TRADES_PER_USER: usize = 50;
const LIQUIDITY_B: &str = "5000";
const SELL_PROBABILITY: f64 = 0.25;
const STARTING_BALANCE: &str = "1000";

#[derive(Debug, Clone)]
pub struct StressConfig {
    num_users: usize,
    trades_per_user: usize,
    liquidity_b: Decimal,
    sell_probability: f64,
    starting_balance: Decimal,
}

impl StressConfig {
    pub fn from_env() -> Self {
        Self {
            num_users: env_usize("STRESS_NUM_USERS", NUM_USERS),
            trades_per_user: env_usize("STRESS_TRADES_PER_USER", TRADES_PER_USER),
            liquidity_b: env_decimal("STRESS_LIQUIDITY_B", LIQUIDITY_B),
            sell_probability: env_f64_clamped("STRESS_SELL_PROBABILITY", SELL_PROBABILITY, 0.0, 1.0),
            starting_balance: env_decimal("STRESS_STARTING_BALANCE", STARTING_BALANCE),
        }
    }
}

pub fn stress_config() -> &'static StressConfig {
    static CONFIG: OnceLock<StressConfig> = OnceLock::new();
    CONFIG.get_or_init(StressConfig::from_env)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_f64_clamped(name: &str, default: f64, min: f64, max: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

fn env_decimal(name: &str, default: &str) -> Decimal {
    env::var(name)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .unwrap_or_else(|| Decimal::from_str(default).unwrap())
}

/// Drops and recreates a self-contained schema, isolated from any
/// migrations the embedding service may run.
pub async fn setup_test_database(pool: &PgPool) -> Result<()> {
    for table in ["trades", "positions", "wallet_transactions", "wallets", "markets", "users"] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table} CASCADE"))
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE users (
            id BIGSERIAL PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            active BOOLEAN NOT NULL DEFAULT true,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE wallets (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id),
            balance NUMERIC(20,6) NOT NULL DEFAULT 0,
            frozen_balance NUMERIC(20,6) NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE wallet_transactions (
            id BIGSERIAL PRIMARY KEY,
            wallet_id BIGINT NOT NULL REFERENCES wallets(id),
            kind TEXT NOT NULL,
            amount NUMERIC(20,6) NOT NULL,
            balance_before NUMERIC(20,6) NOT NULL,
            balance_after NUMERIC(20,6) NOT NULL,
            description TEXT NOT NULL,
            reference_id BIGINT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE markets (
            id BIGSERIAL PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT 'stress',
            image_url TEXT,
            resolution_source TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            outcome TEXT,
            q_yes NUMERIC(20,6) NOT NULL DEFAULT 0,
            q_no NUMERIC(20,6) NOT NULL DEFAULT 0,
            liquidity_b NUMERIC(20,6) NOT NULL,
            volume NUMERIC(20,6) NOT NULL DEFAULT 0,
            start_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ NOT NULL,
            resolved_at TIMESTAMPTZ,
            creator_id BIGINT NOT NULL REFERENCES users(id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE positions (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id),
            market_id BIGINT NOT NULL REFERENCES markets(id),
            yes_shares NUMERIC(20,6) NOT NULL DEFAULT 0,
            no_shares NUMERIC(20,6) NOT NULL DEFAULT 0,
            avg_yes_price NUMERIC(20,6) NOT NULL DEFAULT 0,
            avg_no_price NUMERIC(20,6) NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (user_id, market_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE trades (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id),
            market_id BIGINT NOT NULL REFERENCES markets(id),
            trade_type TEXT NOT NULL,
            side TEXT NOT NULL,
            shares NUMERIC(20,6) NOT NULL,
            avg_price NUMERIC(20,6) NOT NULL,
            cost NUMERIC(20,6) NOT NULL,
            fee NUMERIC(20,6) NOT NULL,
            q_yes_before NUMERIC(20,6) NOT NULL,
            q_no_before NUMERIC(20,6) NOT NULL,
            q_yes_after NUMERIC(20,6) NOT NULL,
            q_no_after NUMERIC(20,6) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn seed_users_and_wallets(pool: &PgPool, config: &StressConfig) -> Result<Vec<i64>> {
    let mut user_ids = Vec::with_capacity(config.num_users);
    for i in 0..config.num_users {
        let user_id: i64 = sqlx::query_scalar(
            "INSERT INTO users (email, username, password_hash) VALUES ($1, $2, 'stress') RETURNING id",
        )
        .bind(format!("stress-user-{i}@example.com"))
        .bind(format!("stress-user-{i}"))
        .fetch_one(pool)
        .await?;

        sqlx::query("INSERT INTO wallets (user_id, balance) VALUES ($1, $2)")
            .bind(user_id)
            .bind(config.starting_balance)
            .execute(pool)
            .await?;

        user_ids.push(user_id);
    }
    Ok(user_ids)
}

async fn seed_market(pool: &PgPool, creator_id: i64, liquidity_b: Decimal) -> Result<i64> {
    let now = chrono::Utc::now();
    let market_id: i64 = sqlx::query_scalar(
        "INSERT INTO markets (title, liquidity_b, status, start_time, end_time, creator_id)
         VALUES ('stress market', $1, 'active', $2, $3, $4) RETURNING id",
    )
    .bind(liquidity_b)
    .bind(now - chrono::Duration::days(1))
    .bind(now + chrono::Duration::days(30))
    .bind(creator_id)
    .fetch_one(pool)
    .await?;
    Ok(market_id)
}

pub async fn run_stress_test(pool: &PgPool, config: &Config) -> Result<()> {
    let stress = stress_config();
    info!(?stress, "starting stress test");

    let user_ids = seed_users_and_wallets(pool, stress).await?;
    let market_id = seed_market(pool, user_ids[0], stress.liquidity_b).await?;

    let started = Instant::now();
    let mut executed = 0u64;
    let mut failed = 0u64;
    let mut rng = StdRng::from_entropy();

    for &user_id in &user_ids {
        for _ in 0..stress.trades_per_user {
            let side = if rng.gen_bool(0.5) { Side::Yes } else { Side::No };
            let is_sell = rng.gen_bool(stress.sell_probability);

            let result = if is_sell {
                trade::execute_sell(pool, config, user_id, market_id, side, dec!(1)).await
            } else {
                let amount = Decimal::from(rng.gen_range(1..=20));
                trade::execute_buy(pool, config, user_id, market_id, side, BuyRequest::Amount(amount)).await
            };

            match result {
                Ok(_) => executed += 1,
                Err(_) => failed += 1,
            }
        }
    }

    let elapsed = started.elapsed();
    info!(
        executed,
        failed,
        elapsed_ms = elapsed.as_millis(),
        throughput_per_sec = executed as f64 / elapsed.as_secs_f64().max(0.001),
        "stress test complete"
    );
    Ok(())
}
