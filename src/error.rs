//! Typed error surface for the exchange core (spec §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("insufficient shares")]
    InsufficientShares,

    #[error("market closed")]
    MarketClosed,

    #[error("outside trading window")]
    OutOfWindow,

    #[error("invalid trade: {0}")]
    InvalidTrade(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ExchangeError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ExchangeError::NotFound("row".to_string()),
            other => ExchangeError::Internal(other.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
