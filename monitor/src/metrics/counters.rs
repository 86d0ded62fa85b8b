use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub cycles: Arc<AtomicU64>,
    pub emitted: Arc<AtomicU64>,

    // per-pair outcomes that produced no signal
    pub below_signal: Arc<AtomicU64>,
    pub blocked: Arc<AtomicU64>,
    pub suppressed: Arc<AtomicU64>,
    pub stale: Arc<AtomicU64>,
    pub conversion_failures: Arc<AtomicU64>,
    pub cycle_timeouts: Arc<AtomicU64>,

    // source pool
    pub source_failures: Arc<AtomicU64>,
    pub replacements: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub cycles: u64,
    pub emitted: u64,
    pub below_signal: u64,
    pub blocked: u64,
    pub suppressed: u64,
    pub stale: u64,
    pub conversion_failures: u64,
    pub cycle_timeouts: u64,
    pub source_failures: u64,
    pub replacements: u64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            cycles: get(&self.cycles),
            emitted: get(&self.emitted),
            below_signal: get(&self.below_signal),
            blocked: get(&self.blocked),
            suppressed: get(&self.suppressed),
            stale: get(&self.stale),
            conversion_failures: get(&self.conversion_failures),
            cycle_timeouts: get(&self.cycle_timeouts),
            source_failures: get(&self.source_failures),
            replacements: get(&self.replacements),
        }
    }
}
