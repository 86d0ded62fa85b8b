//! Price Normalizer
//!
//! Converts a raw `Quote` into a `NormalizedQuote` using the one conversion
//! rule registered for its symbol.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::MonitorError;
use crate::quote::{NormalizedQuote, Quote};
use crate::registry::InstrumentRegistry;

#[derive(Clone)]
pub struct PriceNormalizer {
    registry: Arc<InstrumentRegistry>,
}

impl PriceNormalizer {
    pub fn new(registry: Arc<InstrumentRegistry>) -> Self {
        Self { registry }
    }

    /// Applies the symbol's rule exactly once.
    ///
    /// The quote is consumed, and a `NormalizedQuote` is not a `Quote`:
    ///
    /// ```compile_fail
    /// # use std::sync::Arc;
    /// # use spreadguard::normalizer::PriceNormalizer;
    /// # use spreadguard::quote::Quote;
    /// # fn demo(n: PriceNormalizer) {
    /// let once = n.normalize(Quote::new("SRZ5", 64128.0, "moex", 0)).unwrap();
    /// let twice = n.normalize(once);
    /// # }
    /// ```
    pub fn normalize(&self, quote: Quote) -> Result<NormalizedQuote, MonitorError> {
        if !quote.is_valid() {
            return Err(MonitorError::InvalidQuote {
                symbol: quote.symbol().to_string(),
                price: quote.raw_price(),
            });
        }

        let Some((rule_id, rule)) = self.registry.rule_for(quote.symbol()) else {
            warn!(symbol = %quote.symbol(), "no conversion rule registered");
            return Err(MonitorError::ConversionError {
                symbol: quote.symbol().to_string(),
                reason: "no conversion rule registered".into(),
            });
        };

        let price = rule.apply(quote.raw_price());
        if !price.is_finite() || price <= 0.0 {
            return Err(MonitorError::InvalidQuote {
                symbol: quote.symbol().to_string(),
                price,
            });
        }

        debug!(
            symbol = %quote.symbol(),
            raw = quote.raw_price(),
            price,
            rule = %rule_id,
            "quote normalized"
        );

        Ok(NormalizedQuote::from_raw(quote, price, rule_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PairDef, RuleDef, RuleId, RuleKind, Sector};

    fn normalizer() -> PriceNormalizer {
        let rules = vec![
            RuleDef {
                id: RuleId::new("points"),
                kind: RuleKind::Scaled,
                factor: Some(0.01),
                contract_size: None,
            },
            RuleDef {
                id: RuleId::new("lot100"),
                kind: RuleKind::ContractDivisor,
                factor: None,
                contract_size: Some(100.0),
            },
        ];
        let pairs = vec![
            PairDef {
                cash: "SBER".into(),
                derivative: "SRZ5".into(),
                rule: RuleId::new("points"),
                cash_rule: None,
                sector: Sector::Banks,
            },
            PairDef {
                cash: "GAZP".into(),
                derivative: "GZZ5".into(),
                rule: RuleId::new("lot100"),
                cash_rule: None,
                sector: Sector::OilGas,
            },
        ];
        PriceNormalizer::new(Arc::new(
            InstrumentRegistry::from_defs(&rules, &pairs).unwrap(),
        ))
    }

    #[test]
    fn points_are_scaled_to_currency() {
        let nq = normalizer()
            .normalize(Quote::new("SRZ5", 64_128.0, "moex", 10))
            .unwrap();

        assert!((nq.price() - 641.28).abs() < 1e-9);
        assert_eq!(nq.raw_price(), 64_128.0);
        assert_eq!(nq.rule().as_str(), "points");
        assert_eq!(nq.observed_at_ms(), 10);
        assert_eq!(nq.source_id(), "moex");
    }

    #[test]
    fn contract_price_is_divided_by_contract_size() {
        let nq = normalizer()
            .normalize(Quote::new("GZZ5", 13_250.0, "moex", 0))
            .unwrap();
        assert!((nq.price() - 132.5).abs() < 1e-9);
    }

    #[test]
    fn cash_leg_uses_identity() {
        let nq = normalizer()
            .normalize(Quote::new("SBER", 641.28, "moex", 0))
            .unwrap();
        assert_eq!(nq.price(), 641.28);
        assert_eq!(nq.rule(), &RuleId::identity());
    }

    #[test]
    fn unknown_symbol_is_a_conversion_error() {
        let err = normalizer()
            .normalize(Quote::new("LKOH", 7_000.0, "moex", 0))
            .unwrap_err();
        assert!(matches!(err, MonitorError::ConversionError { symbol, .. } if symbol == "LKOH"));
    }

    #[test]
    fn non_positive_prices_are_rejected() {
        let n = normalizer();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = n.normalize(Quote::new("SBER", bad, "moex", 0)).unwrap_err();
            assert!(matches!(err, MonitorError::InvalidQuote { .. }));
        }
    }
}
