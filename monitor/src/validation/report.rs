use serde::Serialize;
use uuid::Uuid;

use crate::guard::{PairState, PairStatus};
use crate::registry::PairId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// Every configured pair.
    Full,
    /// Only blocked and unavailable pairs.
    Light,
}

impl SweepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepKind::Full => "full",
            SweepKind::Light => "light",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub pair: PairId,
    pub error: String,
    /// True when the failure moved (or kept) the pair unavailable.
    pub unresolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub id: Uuid,
    pub kind: SweepKind,
    pub started_ms: u64,
    pub finished_ms: u64,

    pub checked: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub inconclusive: usize,

    // pair states after the sweep, across all pairs
    pub active: usize,
    pub blocked: usize,
    pub unavailable: usize,

    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn new(kind: SweepKind, started_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            started_ms,
            finished_ms: started_ms,
            checked: 0,
            resolved: 0,
            unresolved: 0,
            inconclusive: 0,
            active: 0,
            blocked: 0,
            unavailable: 0,
            failures: Vec::new(),
        }
    }

    pub(crate) fn count_states(&mut self, statuses: &[PairStatus]) {
        for st in statuses {
            match st.state {
                PairState::Active => self.active += 1,
                PairState::Blocked => self.blocked += 1,
                PairState::Unavailable => self.unavailable += 1,
            }
        }
    }
}
