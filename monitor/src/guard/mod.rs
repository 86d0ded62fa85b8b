//! Anomaly Guard
//!
//! Per-pair quality-control state machine:
//!
//! ```text
//! active ──|spread| > threshold──▶ blocked ──N sane cycles──▶ active
//!   │                                │
//!   └───────ticker unresolved────────┴──▶ unavailable ──validation ok──▶ active
//!                                                    └──anomalous──▶ blocked
//! ```
//!
//! Live polling and validation sweeps both write here. Each pair has its own
//! async mutex, held across the transition and its persistence.

pub mod model;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GuardConfig;
use crate::emitter::SignalEmitter;
use crate::metrics::Counters;
use crate::registry::PairId;
use crate::spread::{SpreadRecord, UrgencyTier};
use crate::store::StateStore;

pub use model::{PairState, PairStatus, ValidationOutcome, Verdict};

type Slot = Arc<Mutex<PairStatus>>;

pub struct AnomalyGuard {
    cfg: GuardConfig,
    pairs: RwLock<HashMap<PairId, Slot>>,
    store: Option<Arc<StateStore>>,
    counters: Counters,
}

impl AnomalyGuard {
    pub fn new(cfg: GuardConfig, pairs: impl IntoIterator<Item = PairId>, counters: Counters) -> Self {
        let pairs = pairs
            .into_iter()
            .map(|id| (id.clone(), Arc::new(Mutex::new(PairStatus::new(id, 0)))))
            .collect();

        Self {
            cfg,
            pairs: RwLock::new(pairs),
            store: None,
            counters,
        }
    }

    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn slot(&self, pair: &PairId) -> Slot {
        if let Some(slot) = self.pairs.read().get(pair) {
            return slot.clone();
        }
        self.pairs
            .write()
            .entry(pair.clone())
            .or_insert_with(|| Arc::new(Mutex::new(PairStatus::new(pair.clone(), 0))))
            .clone()
    }

    fn is_anomalous(&self, record: &SpreadRecord) -> bool {
        record.abs_spread_pct() > self.cfg.block_threshold_pct
    }

    /// Urgency band of an accepted reading.
    pub fn classify(&self, abs_spread_pct: f64) -> UrgencyTier {
        if abs_spread_pct >= self.cfg.critical_pct {
            UrgencyTier::Critical
        } else if abs_spread_pct >= self.cfg.elevated_pct {
            UrgencyTier::Elevated
        } else {
            UrgencyTier::Normal
        }
    }

    fn accept(&self, mut record: SpreadRecord) -> Verdict {
        record.urgency = self.classify(record.abs_spread_pct());
        if record.abs_spread_pct() < self.cfg.min_signal_pct {
            Counters::incr(&self.counters.below_signal);
            Verdict::BelowSignal(record)
        } else {
            Verdict::Emit(record)
        }
    }

    fn block_reason(&self, record: &SpreadRecord) -> String {
        format!(
            "anomalous spread: {:.2}% (> {:.2}%)",
            record.spread_pct, self.cfg.block_threshold_pct
        )
    }

    /// Filters one live reading. The record's cycle timestamp is the clock.
    ///
    /// An accepted record is handed to `emitter` while the pair lock is held;
    /// validation observes the pair strictly before or after the hand-off.
    /// An emit failure is returned as the error.
    pub async fn observe(
        &self,
        record: SpreadRecord,
        emitter: &dyn SignalEmitter,
    ) -> anyhow::Result<Verdict> {
        let slot = self.slot(&record.pair);
        let mut st = slot.lock().await;

        let verdict = self.apply(&mut st, record).await;
        if let Verdict::Emit(accepted) = &verdict {
            emitter.emit(accepted.clone()).await?;
        }
        Ok(verdict)
    }

    async fn apply(&self, st: &mut PairStatus, record: SpreadRecord) -> Verdict {
        let now_ms = record.cycle_ts_ms;

        match st.state {
            PairState::Unavailable => {
                Counters::incr(&self.counters.suppressed);
                Verdict::Suppressed(PairState::Unavailable)
            }

            PairState::Active => {
                st.last_spread_pct = Some(record.spread_pct);
                if self.is_anomalous(&record) {
                    let reason = self.block_reason(&record);
                    warn!(pair = %record.pair, spread_pct = record.spread_pct, "pair blocked");
                    st.enter(PairState::Blocked, reason.clone(), now_ms);
                    self.persist(st).await;
                    Counters::incr(&self.counters.blocked);
                    return Verdict::Blocked { reason };
                }
                self.accept(record)
            }

            PairState::Blocked => {
                st.last_spread_pct = Some(record.spread_pct);
                if self.is_anomalous(&record) {
                    st.consecutive_passes = 0;
                    st.reason = self.block_reason(&record);
                    self.persist(st).await;
                    Counters::incr(&self.counters.blocked);
                    return Verdict::Blocked {
                        reason: st.reason.clone(),
                    };
                }

                st.consecutive_passes += 1;
                if st.consecutive_passes >= self.cfg.recovery_cycles {
                    info!(pair = %record.pair, passes = st.consecutive_passes, "pair recovered");
                    st.enter(PairState::Active, "", now_ms);
                    st.last_spread_pct = Some(record.spread_pct);
                    self.persist(st).await;
                    return self.accept(record);
                }

                debug!(
                    pair = %record.pair,
                    passes = st.consecutive_passes,
                    needed = self.cfg.recovery_cycles,
                    "blocked pair recovering"
                );
                self.persist(st).await;
                Counters::incr(&self.counters.suppressed);
                Verdict::Recovering {
                    passes: st.consecutive_passes,
                    needed: self.cfg.recovery_cycles,
                }
            }
        }
    }

    /// Applies a validation result. Returns the pair's resulting state.
    pub async fn observe_validation(
        &self,
        pair: &PairId,
        outcome: ValidationOutcome,
        now_ms: u64,
    ) -> PairState {
        let slot = self.slot(pair);
        let mut st = slot.lock().await;
        let before = st.state;

        match outcome {
            ValidationOutcome::Inconclusive => {}

            ValidationOutcome::Unresolved(why) => {
                if st.state != PairState::Unavailable {
                    warn!(%pair, reason = %why, "pair marked unavailable");
                    st.enter(PairState::Unavailable, format!("ticker unavailable: {why}"), now_ms);
                }
            }

            ValidationOutcome::Resolved(record) => {
                st.last_spread_pct = Some(record.spread_pct);
                let anomalous = self.is_anomalous(&record);

                match (st.state, anomalous) {
                    (PairState::Active, false) => {}
                    (PairState::Active, true) | (PairState::Unavailable, true) => {
                        warn!(%pair, spread_pct = record.spread_pct, "pair blocked by validation");
                        st.enter(PairState::Blocked, self.block_reason(&record), now_ms);
                    }
                    (PairState::Unavailable, false) => {
                        info!(%pair, "pair available again");
                        st.enter(PairState::Active, "", now_ms);
                    }
                    (PairState::Blocked, true) => {
                        st.consecutive_passes = 0;
                        st.reason = self.block_reason(&record);
                    }
                    (PairState::Blocked, false) => {
                        st.consecutive_passes += 1;
                        if st.consecutive_passes >= self.cfg.recovery_cycles {
                            info!(%pair, "pair recovered on validation");
                            st.enter(PairState::Active, "", now_ms);
                        }
                    }
                }
            }
        }

        if st.state != before {
            debug!(%pair, from = before.as_str(), to = st.state.as_str(), "pair transition");
        }
        self.persist(&st).await;
        st.state
    }

    /// Live-path `TickerNotFound`.
    pub async fn mark_unavailable(&self, pair: &PairId, why: &str, now_ms: u64) {
        self.observe_validation(pair, ValidationOutcome::Unresolved(why.to_string()), now_ms)
            .await;
    }

    pub async fn status(&self, pair: &PairId) -> Option<PairStatus> {
        let slot = self.pairs.read().get(pair).cloned()?;
        let st = slot.lock().await;
        Some(st.clone())
    }

    pub async fn state(&self, pair: &PairId) -> Option<PairState> {
        self.status(pair).await.map(|s| s.state)
    }

    pub async fn snapshot(&self) -> Vec<PairStatus> {
        let slots: Vec<Slot> = self.pairs.read().values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.lock().await.clone());
        }
        out.sort_by(|a, b| a.pair.cmp(&b.pair));
        out
    }

    /// Pairs currently in any of `states`.
    pub async fn pairs_in(&self, states: &[PairState]) -> Vec<PairId> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|s| states.contains(&s.state))
            .map(|s| s.pair)
            .collect()
    }

    /// Loads saved statuses for pairs that are still configured.
    pub async fn restore(&self, saved: Vec<PairStatus>) {
        let mut applied = 0usize;
        for status in saved {
            let slot = self.pairs.read().get(&status.pair).cloned();
            match slot {
                Some(slot) => {
                    *slot.lock().await = status;
                    applied += 1;
                }
                None => debug!(pair = %status.pair, "saved status for unknown pair ignored"),
            }
        }
        info!(applied, "pair statuses restored");
    }

    async fn persist(&self, status: &PairStatus) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_pair_status(status).await {
                warn!(pair = %status.pair, error = ?e, "failed to persist pair status");
            }
        }
    }
}
