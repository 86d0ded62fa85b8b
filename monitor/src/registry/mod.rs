//! Instrument Registry
//!
//! Static catalog of monitored pairs and the conversion rule of every symbol.
//! The symbol→rule table is built once and checked to be total and
//! single-valued, so a symbol can never be converted twice or not at all.

pub mod types;

use std::collections::HashMap;

use thiserror::Error;
use tracing::info;

pub use types::*;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("no pairs configured")]
    Empty,

    #[error("pair {0} configured more than once")]
    DuplicatePair(PairId),

    #[error("rule {0} defined more than once")]
    DuplicateRule(RuleId),

    #[error("rule {rule} is invalid: {reason}")]
    InvalidRule { rule: RuleId, reason: String },

    #[error("symbol {symbol} references unknown rule {rule}")]
    UnknownRule { symbol: String, rule: RuleId },

    #[error("symbol {symbol} mapped to both {existing} and {requested}")]
    ConflictingRule {
        symbol: String,
        existing: RuleId,
        requested: RuleId,
    },
}

#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    pairs: Vec<InstrumentPair>,
    rules: HashMap<RuleId, ConversionRule>,
    by_symbol: HashMap<String, RuleId>,
}

impl InstrumentRegistry {
    pub fn from_defs(rule_defs: &[RuleDef], pair_defs: &[PairDef]) -> Result<Self, RegistryError> {
        if pair_defs.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut rules: HashMap<RuleId, ConversionRule> = HashMap::new();
        for def in rule_defs {
            let rule = build_rule(def)?;
            if rules.insert(def.id.clone(), rule).is_some() {
                return Err(RegistryError::DuplicateRule(def.id.clone()));
            }
        }

        match rules.get(&RuleId::identity()) {
            None => {
                rules.insert(RuleId::identity(), ConversionRule::Identity);
            }
            Some(ConversionRule::Identity) => {}
            Some(_) => {
                return Err(RegistryError::InvalidRule {
                    rule: RuleId::identity(),
                    reason: "the identity rule id is reserved".into(),
                });
            }
        }

        let mut pairs: Vec<InstrumentPair> = Vec::with_capacity(pair_defs.len());
        let mut by_symbol: HashMap<String, RuleId> = HashMap::new();

        for def in pair_defs {
            let id = PairId::new(def.cash.trim(), def.derivative.trim());
            if pairs.iter().any(|p| p.id == id) {
                return Err(RegistryError::DuplicatePair(id));
            }

            let cash_rule = def.cash_rule.clone().unwrap_or_else(RuleId::identity);
            bind_symbol(&mut by_symbol, &rules, &id.cash, &cash_rule)?;
            bind_symbol(&mut by_symbol, &rules, &id.derivative, &def.rule)?;

            pairs.push(InstrumentPair {
                id,
                rule: def.rule.clone(),
                cash_rule,
                sector: def.sector,
            });
        }

        info!(
            pairs = pairs.len(),
            rules = rules.len(),
            symbols = by_symbol.len(),
            "instrument registry loaded"
        );

        Ok(Self {
            pairs,
            rules,
            by_symbol,
        })
    }

    pub fn pairs(&self) -> &[InstrumentPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// The single rule registered for `symbol`, if any.
    pub fn rule_for(&self, symbol: &str) -> Option<(&RuleId, ConversionRule)> {
        let id = self.by_symbol.get(symbol)?;
        self.rules.get(id).map(|rule| (id, *rule))
    }
}

fn build_rule(def: &RuleDef) -> Result<ConversionRule, RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidRule {
        rule: def.id.clone(),
        reason: reason.to_string(),
    };

    match def.kind {
        RuleKind::Identity => Ok(ConversionRule::Identity),
        RuleKind::Scaled => match def.factor {
            Some(f) if f.is_finite() && f > 0.0 => Ok(ConversionRule::Scaled { factor: f }),
            Some(_) => Err(invalid("factor must be a positive number")),
            None => Err(invalid("scaled rule needs `factor`")),
        },
        RuleKind::ContractDivisor => match def.contract_size {
            Some(c) if c.is_finite() && c > 0.0 => {
                Ok(ConversionRule::ContractDivisor { contract_size: c })
            }
            Some(_) => Err(invalid("contract_size must be a positive number")),
            None => Err(invalid("contract_divisor rule needs `contract_size`")),
        },
    }
}

fn bind_symbol(
    by_symbol: &mut HashMap<String, RuleId>,
    rules: &HashMap<RuleId, ConversionRule>,
    symbol: &str,
    rule: &RuleId,
) -> Result<(), RegistryError> {
    if !rules.contains_key(rule) {
        return Err(RegistryError::UnknownRule {
            symbol: symbol.to_string(),
            rule: rule.clone(),
        });
    }

    match by_symbol.get(symbol) {
        Some(existing) if existing != rule => Err(RegistryError::ConflictingRule {
            symbol: symbol.to_string(),
            existing: existing.clone(),
            requested: rule.clone(),
        }),
        Some(_) => Ok(()),
        None => {
            by_symbol.insert(symbol.to_string(), rule.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaled(id: &str, factor: f64) -> RuleDef {
        RuleDef {
            id: RuleId::new(id),
            kind: RuleKind::Scaled,
            factor: Some(factor),
            contract_size: None,
        }
    }

    fn pair(cash: &str, deriv: &str, rule: &str) -> PairDef {
        PairDef {
            cash: cash.into(),
            derivative: deriv.into(),
            rule: RuleId::new(rule),
            cash_rule: None,
            sector: Sector::Other,
        }
    }

    #[test]
    fn every_symbol_maps_to_exactly_one_rule() {
        let reg = InstrumentRegistry::from_defs(
            &[scaled("pts", 0.01)],
            &[pair("SBER", "SRZ5", "pts"), pair("GAZP", "GZZ5", "identity")],
        )
        .unwrap();

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.rule_for("SRZ5").unwrap().0.as_str(), "pts");
        assert_eq!(reg.rule_for("SBER").unwrap().1, ConversionRule::Identity);
        assert_eq!(reg.rule_for("GZZ5").unwrap().1, ConversionRule::Identity);
        assert!(reg.rule_for("LKOH").is_none());
    }

    #[test]
    fn conflicting_rules_for_one_symbol_are_rejected() {
        let err = InstrumentRegistry::from_defs(
            &[scaled("pts", 0.01), scaled("lot100", 100.0)],
            &[pair("SBER", "SRZ5", "pts"), pair("SBERP", "SRZ5", "lot100")],
        )
        .unwrap_err();

        assert!(matches!(err, RegistryError::ConflictingRule { symbol, .. } if symbol == "SRZ5"));
    }

    #[test]
    fn unknown_rule_is_rejected() {
        let err = InstrumentRegistry::from_defs(&[], &[pair("SBER", "SRZ5", "missing")])
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownRule { .. }));
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let err = InstrumentRegistry::from_defs(
            &[],
            &[pair("SBER", "SRZ5", "identity"), pair("SBER", "SRZ5", "identity")],
        )
        .unwrap_err();
        assert_eq!(err, RegistryError::DuplicatePair(PairId::new("SBER", "SRZ5")));
    }

    #[test]
    fn non_positive_factor_is_rejected() {
        let err = InstrumentRegistry::from_defs(&[scaled("bad", 0.0)], &[pair("A", "B", "bad")])
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRule { .. }));
    }

    #[test]
    fn identity_id_cannot_be_redefined() {
        let err = InstrumentRegistry::from_defs(
            &[scaled("identity", 2.0)],
            &[pair("A", "B", "identity")],
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRule { .. }));
    }

    #[test]
    fn pair_id_displays_as_cash_slash_derivative() {
        assert_eq!(PairId::new("SBER", "SRZ5").to_string(), "SBER/SRZ5");
    }

    #[test]
    fn contract_divisor_divides() {
        let rule = ConversionRule::ContractDivisor {
            contract_size: 100.0,
        };
        assert_eq!(rule.apply(25_000.0), 250.0);
    }
}
