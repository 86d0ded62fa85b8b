use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a monitored pair: the (cash, derivative) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairId {
    pub cash: String,
    pub derivative: String,
}

impl PairId {
    pub fn new(cash: impl Into<String>, derivative: impl Into<String>) -> Self {
        Self {
            cash: cash.into(),
            derivative: derivative.into(),
        }
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cash, self.derivative)
    }
}

/// Which leg of a pair a symbol trades on. Adapters use it to pick the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Cash,
    Derivative,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    pub symbol: String,
    pub kind: InstrumentKind,
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl RuleId {
    pub const IDENTITY: &'static str = "identity";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn identity() -> Self {
        Self(Self::IDENTITY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a raw quote is brought into the canonical currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConversionRule {
    /// Already quoted in canonical units.
    Identity,
    /// Quoted in points; multiply by a constant (e.g. 0.01 points→currency).
    Scaled { factor: f64 },
    /// Quoted per contract; divide by the underlying units per contract.
    ContractDivisor { contract_size: f64 },
}

impl ConversionRule {
    pub fn apply(&self, raw: f64) -> f64 {
        match self {
            ConversionRule::Identity => raw,
            ConversionRule::Scaled { factor } => raw * factor,
            ConversionRule::ContractDivisor { contract_size } => raw / contract_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Identity,
    Scaled,
    ContractDivisor,
}

/// Rule entry as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDef {
    pub id: RuleId,
    pub kind: RuleKind,
    #[serde(default)]
    pub factor: Option<f64>,
    #[serde(default)]
    pub contract_size: Option<f64>,
}

/// Pair entry as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PairDef {
    pub cash: String,
    pub derivative: String,
    pub rule: RuleId,
    /// Rule for the cash leg; defaults to `identity`.
    #[serde(default)]
    pub cash_rule: Option<RuleId>,
    #[serde(default)]
    pub sector: Sector,
}

/// Economic sector tag used for grouping pairs downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Banks,
    OilGas,
    Metals,
    Telecom,
    Retail,
    Tech,
    Transport,
    Utilities,
    Chemicals,
    RealEstate,
    Food,
    ConsumerGoods,
    Pharmaceuticals,
    Construction,
    Media,
    Index,
    Currency,
    #[default]
    #[serde(other)]
    Other,
}

/// A cash instrument and its derivative, loaded once and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentPair {
    pub id: PairId,
    pub rule: RuleId,
    pub cash_rule: RuleId,
    pub sector: Sector,
}

impl InstrumentPair {
    pub fn cash(&self) -> Instrument {
        Instrument {
            symbol: self.id.cash.clone(),
            kind: InstrumentKind::Cash,
        }
    }

    pub fn derivative(&self) -> Instrument {
        Instrument {
            symbol: self.id.derivative.clone(),
            kind: InstrumentKind::Derivative,
        }
    }
}
