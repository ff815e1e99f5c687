//! LMSR pricing engine (spec §4.1).
//!
//! A pure module: no state beyond the `fee_rate` and liquidity parameter
//! `b` passed in per call (Design Notes: "Singleton pricing utility").
//! Internally mirrors the teacher's `lmsr_core.rs` log-domain math (f64),
//! but the public surface takes and returns `rust_decimal::Decimal` —
//! precision is restored on every observable output by rounding to 6
//! fractional digits, per spec §6.4.

use crate::error::{ExchangeError, Result};
use crate::models::Side;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

const OUTPUT_SCALE: u32 = 6;

fn to_f64(label: &str, d: Decimal) -> Result<f64> {
    d.to_f64()
        .ok_or_else(|| ExchangeError::Internal(anyhow::anyhow!("{label} not representable as f64: {d}")))
}

fn from_f64(x: f64) -> Result<Decimal> {
    if !x.is_finite() {
        return Err(ExchangeError::InvalidTrade(format!(
            "non-finite result in pricing computation: {x}"
        )));
    }
    Decimal::from_f64(x)
        .map(|d| d.round_dp(OUTPUT_SCALE))
        .ok_or_else(|| ExchangeError::Internal(anyhow::anyhow!("value not representable as Decimal: {x}")))
}

#[inline]
fn log_sum_exp(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// `C(q_yes, q_no; b) = b * ln(exp(q_yes/b) + exp(q_no/b))`.
pub fn cost(q_yes: Decimal, q_no: Decimal, b: Decimal) -> Result<Decimal> {
    let (qy, qn, b) = (to_f64("q_yes", q_yes)?, to_f64("q_no", q_no)?, to_f64("b", b)?);
    from_f64(b * log_sum_exp(qy / b, qn / b))
}

/// `P_yes = exp(q_yes/b) / (exp(q_yes/b) + exp(q_no/b))`, `P_no = 1 - P_yes`.
pub fn prices(q_yes: Decimal, q_no: Decimal, b: Decimal) -> Result<(Decimal, Decimal)> {
    let (qy, qn, b) = (to_f64("q_yes", q_yes)?, to_f64("q_no", q_no)?, to_f64("b", b)?);
    let (ay, an) = (qy / b, qn / b);
    let m = ay.max(an);
    let ey = (ay - m).exp();
    let en = (an - m).exp();
    let p_yes = ey / (ey + en);
    Ok((from_f64(p_yes)?, from_f64(1.0 - p_yes)?))
}

fn price_of_side(q_yes: Decimal, q_no: Decimal, b: Decimal, side: Side) -> Result<Decimal> {
    let (p_yes, p_no) = prices(q_yes, q_no, b)?;
    Ok(match side {
        Side::Yes => p_yes,
        Side::No => p_no,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct BuyQuote {
    pub side: Side,
    pub shares: Decimal,
    pub raw_cost: Decimal,
    pub total_cost: Decimal,
    pub fee: Decimal,
    pub avg_price: Decimal,
    pub new_q_yes: Decimal,
    pub new_q_no: Decimal,
    pub price_impact: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct SellQuote {
    pub side: Side,
    pub shares: Decimal,
    pub raw_return: Decimal,
    pub net_return: Decimal,
    pub fee: Decimal,
    pub avg_price: Decimal,
    pub new_q_yes: Decimal,
    pub new_q_no: Decimal,
}

fn apply_delta(q_yes: Decimal, q_no: Decimal, side: Side, delta: Decimal) -> (Decimal, Decimal) {
    match side {
        Side::Yes => (q_yes + delta, q_no),
        Side::No => (q_yes, q_no + delta),
    }
}

/// `quote_buy_by_shares(Δ)` — spec §4.1.
pub fn quote_buy_by_shares(
    q_yes: Decimal,
    q_no: Decimal,
    b: Decimal,
    side: Side,
    shares: Decimal,
    fee_rate: Decimal,
) -> Result<BuyQuote> {
    if shares <= Decimal::ZERO {
        return Err(ExchangeError::InvalidTrade("shares must be positive".into()));
    }

    let p_old = price_of_side(q_yes, q_no, b, side)?;
    let (new_q_yes, new_q_no) = apply_delta(q_yes, q_no, side, shares);

    let raw_cost = cost(new_q_yes, new_q_no, b)? - cost(q_yes, q_no, b)?;
    if raw_cost <= Decimal::ZERO {
        return Err(ExchangeError::InvalidTrade(
            "buy produced non-positive cost".into(),
        ));
    }
    let fee = (raw_cost * fee_rate).round_dp(OUTPUT_SCALE);
    let total_cost = (raw_cost + fee).round_dp(OUTPUT_SCALE);
    let avg_price = (total_cost / shares).round_dp(OUTPUT_SCALE);

    let p_new = price_of_side(new_q_yes, new_q_no, b, side)?;
    let price_impact = if p_old == Decimal::ZERO {
        Decimal::ZERO
    } else {
        ((p_new - p_old).abs() / p_old).round_dp(OUTPUT_SCALE)
    };

    Ok(BuyQuote {
        side,
        shares,
        raw_cost: raw_cost.round_dp(OUTPUT_SCALE),
        total_cost,
        fee,
        avg_price,
        new_q_yes: new_q_yes.round_dp(OUTPUT_SCALE),
        new_q_no: new_q_no.round_dp(OUTPUT_SCALE),
        price_impact,
    })
}

/// `quote_sell_by_shares(Δ)` — spec §4.1.
pub fn quote_sell_by_shares(
    q_yes: Decimal,
    q_no: Decimal,
    b: Decimal,
    side: Side,
    shares: Decimal,
    fee_rate: Decimal,
) -> Result<SellQuote> {
    if shares <= Decimal::ZERO {
        return Err(ExchangeError::InvalidTrade("shares must be positive".into()));
    }
    let current_q_side = match side {
        Side::Yes => q_yes,
        Side::No => q_no,
    };
    if shares > current_q_side {
        return Err(ExchangeError::InvalidTrade(
            "sell would take the AMM negative on this side".into(),
        ));
    }

    let (new_q_yes, new_q_no) = apply_delta(q_yes, q_no, side, -shares);
    let raw_return = cost(q_yes, q_no, b)? - cost(new_q_yes, new_q_no, b)?;
    if raw_return <= Decimal::ZERO {
        return Err(ExchangeError::InvalidTrade(
            "sell produced non-positive return".into(),
        ));
    }
    let fee = (raw_return * fee_rate).round_dp(OUTPUT_SCALE);
    let net_return = (raw_return - fee).round_dp(OUTPUT_SCALE);
    let avg_price = (net_return / shares).round_dp(OUTPUT_SCALE);

    Ok(SellQuote {
        side,
        shares,
        raw_return: raw_return.round_dp(OUTPUT_SCALE),
        net_return,
        fee,
        avg_price,
        new_q_yes: new_q_yes.round_dp(OUTPUT_SCALE),
        new_q_no: new_q_no.round_dp(OUTPUT_SCALE),
    })
}

/// `quote_buy_by_amount(A)` — invert `quote_buy_by_shares` via bisection
/// (spec §4.1). The bisection upper bound is `A * 10`; non-convergence
/// after `max_iterations` is a hard `InvalidTrade`, not a silently
/// returned midpoint (Open Question 1, resolved in SPEC_FULL.md).
pub fn quote_buy_by_amount(
    q_yes: Decimal,
    q_no: Decimal,
    b: Decimal,
    side: Side,
    amount: Decimal,
    fee_rate: Decimal,
    max_iterations: u32,
    tolerance: Decimal,
) -> Result<BuyQuote> {
    if amount <= Decimal::ZERO {
        return Err(ExchangeError::InvalidTrade("amount must be positive".into()));
    }

    let target_raw_cost = amount / (Decimal::ONE + fee_rate);
    let mut lo = Decimal::ZERO;
    let mut hi = amount * Decimal::from(10);
    let mut mid = hi / Decimal::from(2);

    let raw_cost_at = |delta: Decimal| -> Result<Decimal> {
        let (ny, nn) = apply_delta(q_yes, q_no, side, delta);
        Ok(cost(ny, nn, b)? - cost(q_yes, q_no, b)?)
    };

    let mut converged = false;
    for _ in 0..max_iterations {
        mid = (lo + hi) / Decimal::from(2);
        let c = raw_cost_at(mid)?;
        if (c - target_raw_cost).abs() < tolerance {
            converged = true;
            break;
        }
        if c < target_raw_cost {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    if !converged {
        return Err(ExchangeError::InvalidTrade(
            "buy-by-amount bisection did not converge".into(),
        ));
    }
    if mid <= Decimal::ZERO {
        return Err(ExchangeError::InvalidTrade("amount too small to acquire any shares".into()));
    }

    quote_buy_by_shares(q_yes, q_no, b, side, mid.round_dp(OUTPUT_SCALE), fee_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fresh_market_is_fifty_fifty() {
        let (p_yes, p_no) = prices(dec!(0), dec!(0), dec!(1000)).unwrap();
        assert_eq!(p_yes, dec!(0.5));
        assert_eq!(p_no, dec!(0.5));
    }

    #[test]
    fn prices_always_sum_to_one() {
        let (p_yes, p_no) = prices(dec!(123.456), dec!(45.2), dec!(1000)).unwrap();
        assert_eq!((p_yes + p_no).round_dp(9), dec!(1));
    }

    #[test]
    fn buy_quote_debits_exactly_total_cost() {
        let q = quote_buy_by_shares(dec!(0), dec!(0), dec!(1000), Side::Yes, dec!(10), dec!(0.02)).unwrap();
        assert_eq!(q.total_cost, (q.raw_cost + q.fee).round_dp(6));
        assert_eq!(q.fee, (q.raw_cost * dec!(0.02)).round_dp(6));
        assert!(q.avg_price > dec!(0.5));
        assert_eq!(q.avg_price, (q.total_cost / q.shares).round_dp(6));
    }

    #[test]
    fn sell_more_than_held_is_invalid_trade() {
        let err = quote_sell_by_shares(dec!(5), dec!(0), dec!(1000), Side::Yes, dec!(10), dec!(0.02))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidTrade(_)));
    }

    #[test]
    fn buy_by_amount_round_trips_to_matching_shares_quote() {
        let by_amount =
            quote_buy_by_amount(dec!(0), dec!(0), dec!(1000), Side::Yes, dec!(10), dec!(0.02), 100, dec!(0.0001))
                .unwrap();
        let by_shares = quote_buy_by_shares(
            dec!(0),
            dec!(0),
            dec!(1000),
            Side::Yes,
            by_amount.shares,
            dec!(0.02),
        )
        .unwrap();
        assert!((by_amount.total_cost - by_shares.total_cost).abs() <= dec!(0.01));
    }

    #[test]
    fn zero_fee_round_trip_returns_to_initial_state() {
        let b = dec!(1000);
        let buy = quote_buy_by_shares(dec!(0), dec!(0), b, Side::Yes, dec!(50), Decimal::ZERO).unwrap();
        let sell = quote_sell_by_shares(buy.new_q_yes, buy.new_q_no, b, Side::Yes, dec!(50), Decimal::ZERO)
            .unwrap();
        assert_eq!(sell.new_q_yes, dec!(0));
        assert_eq!(sell.new_q_no, dec!(0));
        assert!((buy.total_cost - sell.net_return).abs() <= dec!(0.000001));
    }

    proptest! {
        #[test]
        fn prob_yes_is_always_in_unit_interval(qy in 0.0f64..5000.0, qn in 0.0f64..5000.0) {
            let (p_yes, p_no) = prices(
                Decimal::from_f64(qy).unwrap(),
                Decimal::from_f64(qn).unwrap(),
                dec!(1000),
            ).unwrap();
            prop_assert!(p_yes > Decimal::ZERO && p_yes < Decimal::ONE);
            prop_assert!(p_no > Decimal::ZERO && p_no < Decimal::ONE);
        }

        #[test]
        fn price_is_monotonic_in_own_quantity(qy in 0.0f64..1000.0, bump in 0.1f64..500.0) {
            let b = dec!(1000);
            let qy = Decimal::from_f64(qy).unwrap();
            let bump = Decimal::from_f64(bump).unwrap();
            let (p_before, _) = prices(qy, dec!(0), b).unwrap();
            let (p_after, _) = prices(qy + bump, dec!(0), b).unwrap();
            prop_assert!(p_after >= p_before);
        }
    }
}
