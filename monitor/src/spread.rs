//! Spread Calculator.
//!
//! Combines the two normalized legs of one cycle into a `SpreadRecord`.
//! Spread is measured against the cash leg:
//!
//! `spread_pct = (derivative - cash) / cash * 100`
//!
//! Urgency is left at `Normal`; the anomaly guard classifies accepted records.

use serde::Serialize;

use crate::error::MonitorError;
use crate::quote::NormalizedQuote;
use crate::registry::{InstrumentPair, PairId, Sector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Derivative trades above cash (contango).
    DerivativeOverCash,
    /// Cash trades above derivative (backwardation).
    CashOverDerivative,
    Flat,
}

impl Direction {
    fn of(spread_pct: f64) -> Self {
        if spread_pct > 0.0 {
            Direction::DerivativeOverCash
        } else if spread_pct < 0.0 {
            Direction::CashOverDerivative
        } else {
            Direction::Flat
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    Normal,
    Elevated,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadRecord {
    pub pair: PairId,
    pub sector: Sector,
    pub spread_pct: f64,
    pub direction: Direction,
    pub urgency: UrgencyTier,
    pub cycle_ts_ms: u64,
    pub cash_price: f64,
    pub derivative_price: f64,
}

impl SpreadRecord {
    pub fn abs_spread_pct(&self) -> f64 {
        self.spread_pct.abs()
    }
}

/// Builds a spread record from both legs of one cycle.
///
/// Fails with `QuoteMismatch` if a quote is not for the expected leg, and with
/// `StaleQuote` if the legs were observed more than `staleness_window_ms` apart.
pub fn compute(
    pair: &InstrumentPair,
    cash: &NormalizedQuote,
    derivative: &NormalizedQuote,
    staleness_window_ms: u64,
    cycle_ts_ms: u64,
) -> Result<SpreadRecord, MonitorError> {
    check_leg(&pair.id.cash, cash)?;
    check_leg(&pair.id.derivative, derivative)?;

    let gap_ms = cash.observed_at_ms().abs_diff(derivative.observed_at_ms());
    if gap_ms > staleness_window_ms {
        return Err(MonitorError::StaleQuote {
            gap_ms,
            window_ms: staleness_window_ms,
        });
    }

    let cash_price = cash.price();
    let derivative_price = derivative.price();
    let spread_pct = (derivative_price - cash_price) / cash_price * 100.0;

    Ok(SpreadRecord {
        pair: pair.id.clone(),
        sector: pair.sector,
        spread_pct,
        direction: Direction::of(spread_pct),
        urgency: UrgencyTier::Normal,
        cycle_ts_ms,
        cash_price,
        derivative_price,
    })
}

fn check_leg(expected: &str, quote: &NormalizedQuote) -> Result<(), MonitorError> {
    if quote.symbol() != expected {
        return Err(MonitorError::QuoteMismatch {
            expected: expected.to_string(),
            got: quote.symbol().to_string(),
        });
    }
    Ok(())
}
