use serde::{Deserialize, Serialize};

use crate::registry::PairId;
use crate::spread::SpreadRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    Active,
    Blocked,
    Unavailable,
}

impl PairState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairState::Active => "active",
            PairState::Blocked => "blocked",
            PairState::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PairState::Active),
            "blocked" => Some(PairState::Blocked),
            "unavailable" => Some(PairState::Unavailable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStatus {
    pub pair: PairId,
    pub state: PairState,
    /// Why the pair left `active`; empty while active.
    pub reason: String,
    pub since_ms: u64,
    /// Sane cycles observed since the pair was blocked.
    pub consecutive_passes: u32,
    pub last_spread_pct: Option<f64>,
}

impl PairStatus {
    pub fn new(pair: PairId, now_ms: u64) -> Self {
        Self {
            pair,
            state: PairState::Active,
            reason: String::new(),
            since_ms: now_ms,
            consecutive_passes: 0,
            last_spread_pct: None,
        }
    }

    pub(crate) fn enter(&mut self, state: PairState, reason: impl Into<String>, now_ms: u64) {
        self.state = state;
        self.reason = reason.into();
        self.since_ms = now_ms;
        self.consecutive_passes = 0;
    }
}

/// What the guard decided about one live reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Accepted and classified; forward to the emitter.
    Emit(SpreadRecord),
    /// Accepted, pair stays active, spread too small to signal.
    BelowSignal(SpreadRecord),
    /// Anomalous reading; the pair is (or stays) blocked.
    Blocked { reason: String },
    /// Blocked pair with a sane reading, not yet recovered.
    Recovering { passes: u32, needed: u32 },
    /// The pair is not accepting readings.
    Suppressed(PairState),
}

/// Result of one validation probe of a pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// Both legs priced and a spread computed.
    Resolved(SpreadRecord),
    /// The ticker cannot be priced (not found, delisted, no usable price,
    /// or persistently no source).
    Unresolved(String),
    /// Nothing learned this time.
    Inconclusive,
}
