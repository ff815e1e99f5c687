//! Configuration for the exchange core (spec §6.5).
//!
//! Supports environment variables with fallback to defaults, following the
//! same loading/validation shape as a typical market-parameters config.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub market: MarketConfig,
    pub admin_seed: Option<AdminSeed>,
}

/// Market-specific configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Default liquidity parameter `b` used when a market is created
    /// without one (default: 1000).
    pub liquidity_default: Decimal,

    /// Minimum allowed liquidity parameter `b` (default: 100).
    pub liquidity_minimum: Decimal,

    /// Trading fee rate applied to buys (on top) and sells (taken out).
    pub fee_rate: Decimal,

    /// Number of bisection iterations before `quote_buy_by_amount` gives up.
    pub bisection_max_iterations: u32,

    /// Convergence tolerance for `quote_buy_by_amount`'s bisection.
    pub bisection_tolerance: Decimal,
}

/// Optional bootstrap admin account, seeded at startup by the surrounding
/// service (password hashing itself is outside this core's scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSeed {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub bootstrap_credit: Option<Decimal>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            liquidity_default: dec!(1000),
            liquidity_minimum: dec!(100),
            fee_rate: dec!(0.02),
            bisection_max_iterations: 100,
            bisection_tolerance: Decimal::new(1, 4), // 1e-4
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            admin_seed: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(v) = env::var("MARKET_LIQUIDITY_DEFAULT") {
            if let Ok(parsed) = v.parse() {
                config.market.liquidity_default = parsed;
            }
        }
        if let Ok(v) = env::var("MARKET_LIQUIDITY_MINIMUM") {
            if let Ok(parsed) = v.parse() {
                config.market.liquidity_minimum = parsed;
            }
        }
        if let Ok(v) = env::var("MARKET_FEE_RATE") {
            if let Ok(parsed) = v.parse() {
                config.market.fee_rate = parsed;
            }
        }
        if let Ok(v) = env::var("MARKET_BISECTION_MAX_ITERATIONS") {
            if let Ok(parsed) = v.parse() {
                config.market.bisection_max_iterations = parsed;
            }
        }

        if let (Ok(email), Ok(username), Ok(password_hash)) = (
            env::var("ADMIN_SEED_EMAIL"),
            env::var("ADMIN_SEED_USERNAME"),
            env::var("ADMIN_SEED_PASSWORD_HASH"),
        ) {
            let bootstrap_credit = env::var("ADMIN_SEED_BOOTSTRAP_CREDIT")
                .ok()
                .and_then(|v| v.parse().ok());
            config.admin_seed = Some(AdminSeed {
                email,
                username,
                password_hash,
                bootstrap_credit,
            });
        }

        config.validate();
        config
    }

    /// Clamp obviously-invalid values to safe defaults, warning loudly.
    fn validate(&mut self) {
        if self.market.liquidity_minimum <= Decimal::ZERO {
            tracing::warn!(
                value = %self.market.liquidity_minimum,
                "invalid liquidity_minimum, using default"
            );
            self.market.liquidity_minimum = dec!(100);
        }
        if self.market.liquidity_default < self.market.liquidity_minimum {
            tracing::warn!(
                default = %self.market.liquidity_default,
                minimum = %self.market.liquidity_minimum,
                "liquidity_default below liquidity_minimum, raising to minimum"
            );
            self.market.liquidity_default = self.market.liquidity_minimum;
        }
        if self.market.fee_rate < Decimal::ZERO || self.market.fee_rate >= Decimal::ONE {
            tracing::warn!(value = %self.market.fee_rate, "invalid fee_rate, using default");
            self.market.fee_rate = dec!(0.02);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.market.liquidity_default, dec!(1000));
        assert_eq!(config.market.liquidity_minimum, dec!(100));
        assert_eq!(config.market.fee_rate, dec!(0.02));
    }

    #[test]
    fn validate_clamps_liquidity_default_below_minimum() {
        let mut config = Config {
            market: MarketConfig {
                liquidity_default: dec!(50),
                liquidity_minimum: dec!(100),
                ..MarketConfig::default()
            },
            admin_seed: None,
        };
        config.validate();
        assert_eq!(config.market.liquidity_default, dec!(100));
    }
}
