use serde::Serialize;

use crate::registry::RuleId;

/// A raw price as reported by one source, in whatever unit that market quotes.
///
/// Not `Clone`: a raw quote is consumed exactly once by the normalizer.
#[derive(Debug, PartialEq)]
pub struct Quote {
    symbol: String,
    raw_price: f64,
    source_id: String,
    observed_at_ms: u64,
}

impl Quote {
    pub fn new(
        symbol: impl Into<String>,
        raw_price: f64,
        source_id: impl Into<String>,
        observed_at_ms: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            raw_price,
            source_id: source_id.into(),
            observed_at_ms,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn raw_price(&self) -> f64 {
        self.raw_price
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn observed_at_ms(&self) -> u64 {
        self.observed_at_ms
    }

    /// A quote is usable only with a finite, strictly positive price.
    pub fn is_valid(&self) -> bool {
        self.raw_price.is_finite() && self.raw_price > 0.0
    }
}

/// A quote expressed in canonical currency units.
///
/// Only `PriceNormalizer` can build one, and only from a `Quote` taken by
/// value; there is no way back to a `Quote`, so a price cannot be converted
/// twice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedQuote {
    symbol: String,
    price: f64,
    raw_price: f64,
    rule: RuleId,
    source_id: String,
    observed_at_ms: u64,
}

impl NormalizedQuote {
    pub(crate) fn from_raw(quote: Quote, price: f64, rule: RuleId) -> Self {
        let Quote {
            symbol,
            raw_price,
            source_id,
            observed_at_ms,
        } = quote;

        Self {
            symbol,
            price,
            raw_price,
            rule,
            source_id,
            observed_at_ms,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Canonical price.
    pub fn price(&self) -> f64 {
        self.price
    }

    /// The source's original figure, kept for auditing.
    pub fn raw_price(&self) -> f64 {
        self.raw_price
    }

    /// The rule that produced `price`.
    pub fn rule(&self) -> &RuleId {
        &self.rule
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn observed_at_ms(&self) -> u64 {
        self.observed_at_ms
    }
}
