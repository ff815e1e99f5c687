//! Entity structs for the data model (spec §3).
//!
//! Every monetary/share/price field is `rust_decimal::Decimal` (spec §6.4);
//! binary floats only ever appear transiently inside the pricing engine's
//! math (`pricing.rs`).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub balance: Decimal,
    pub frozen_balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum WalletTransactionKind {
    Deposit,
    Withdraw,
    Trade,
    Settlement,
    Refund,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: i64,
    pub wallet_id: i64,
    pub kind: WalletTransactionKind,
    /// Signed: positive = credit, negative = debit.
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub reference_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum MarketStatus {
    Draft,
    Active,
    Suspended,
    Resolved,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Outcome {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TradeType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Market {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub image_url: Option<String>,
    pub resolution_source: Option<String>,
    pub status: MarketStatus,
    pub outcome: Option<Outcome>,
    pub q_yes: Decimal,
    pub q_no: Decimal,
    pub liquidity_b: Decimal,
    pub volume: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub user_id: i64,
    pub market_id: i64,
    pub yes_shares: Decimal,
    pub no_shares: Decimal,
    pub avg_yes_price: Decimal,
    pub avg_no_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub user_id: i64,
    pub market_id: i64,
    #[sqlx(rename = "trade_type")]
    pub trade_type: TradeType,
    pub side: Side,
    pub shares: Decimal,
    pub avg_price: Decimal,
    pub cost: Decimal,
    pub fee: Decimal,
    pub q_yes_before: Decimal,
    pub q_no_before: Decimal,
    pub q_yes_after: Decimal,
    pub q_no_after: Decimal,
    pub created_at: DateTime<Utc>,
}
