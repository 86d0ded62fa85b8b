//! Live Monitor
//!
//! Every tick, each configured pair runs as its own short task:
//! poll both legs → normalize → compute → guard → emit.
//! Pairs are independent; a slow or failing pair never delays the others.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{Instrument, debug, info, warn};

use common::logger::{TraceId, child_span, root_span};

use crate::config::PollingConfig;
use crate::emitter::SignalEmitter;
use crate::error::MonitorError;
use crate::guard::{AnomalyGuard, PairState, Verdict};
use crate::hours::TradingHours;
use crate::metrics::Counters;
use crate::probe::PairProbe;
use crate::registry::{InstrumentPair, InstrumentRegistry};
use crate::time::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairOutcome {
    Emitted,
    BelowSignal,
    Blocked,
    Suppressed,
    Skipped,
    Failed,
    TimedOut,
}

/// Per-cycle tally, logged at the end of every cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub pairs: usize,
    pub emitted: usize,
    pub below_signal: usize,
    pub blocked: usize,
    pub suppressed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl CycleSummary {
    fn add(&mut self, outcome: PairOutcome) {
        self.pairs += 1;
        match outcome {
            PairOutcome::Emitted => self.emitted += 1,
            PairOutcome::BelowSignal => self.below_signal += 1,
            PairOutcome::Blocked => self.blocked += 1,
            PairOutcome::Suppressed => self.suppressed += 1,
            PairOutcome::Skipped => self.skipped += 1,
            PairOutcome::Failed => self.failed += 1,
            PairOutcome::TimedOut => self.timed_out += 1,
        }
    }
}

pub struct LiveMonitor {
    registry: Arc<InstrumentRegistry>,
    probe: PairProbe,
    guard: Arc<AnomalyGuard>,
    emitter: Arc<dyn SignalEmitter>,
    cfg: PollingConfig,
    hours: TradingHours,
    counters: Counters,
}

impl LiveMonitor {
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        probe: PairProbe,
        guard: Arc<AnomalyGuard>,
        emitter: Arc<dyn SignalEmitter>,
        cfg: PollingConfig,
        hours: TradingHours,
        counters: Counters,
    ) -> Self {
        Self {
            registry,
            probe,
            guard,
            emitter,
            cfg,
            hours,
            counters,
        }
    }

    /// Cycle loop. Ticks that fall outside trading hours are skipped.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.cfg.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            pairs = self.registry.len(),
            every_ms = self.cfg.interval_ms,
            "live monitor started"
        );

        loop {
            ticker.tick().await;

            if !self.hours.is_open(Utc::now()) {
                debug!("market closed; cycle skipped");
                continue;
            }

            let trace_id = TraceId::new();
            let span = root_span("live_cycle", &trace_id);
            self.run_cycle(now_ms()).instrument(span).await;
        }
    }

    pub async fn run_cycle(self: &Arc<Self>, cycle_ts_ms: u64) -> CycleSummary {
        Counters::incr(&self.counters.cycles);

        let mut set = JoinSet::new();
        for pair in self.registry.pairs() {
            let this = Arc::clone(self);
            let pair = pair.clone();
            let span = child_span("pair_cycle", &pair.id.to_string());

            set.spawn(
                async move {
                    match timeout(this.cfg.cycle_timeout(), this.process_pair(&pair, cycle_ts_ms))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(pair = %pair.id, timeout_ms = this.cfg.cycle_timeout_ms, "pair cycle timed out");
                            Counters::incr(&this.counters.cycle_timeouts);
                            PairOutcome::TimedOut
                        }
                    }
                }
                .instrument(span),
            );
        }

        let mut summary = CycleSummary::default();
        while let Some(res) = set.join_next().await {
            match res {
                Ok(outcome) => summary.add(outcome),
                Err(e) => {
                    warn!(error = %e, "pair task failed");
                    summary.add(PairOutcome::Failed);
                }
            }
        }

        info!(
            pairs = summary.pairs,
            emitted = summary.emitted,
            below_signal = summary.below_signal,
            blocked = summary.blocked,
            suppressed = summary.suppressed,
            skipped = summary.skipped,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "live cycle complete"
        );

        summary
    }

    async fn process_pair(&self, pair: &InstrumentPair, cycle_ts_ms: u64) -> PairOutcome {
        if self.guard.state(&pair.id).await == Some(PairState::Unavailable) {
            return PairOutcome::Skipped;
        }

        let record = match self.probe.measure(pair, cycle_ts_ms).await {
            Ok(r) => r,
            Err(e) => return self.on_failure(pair, e, cycle_ts_ms).await,
        };

        match self.guard.observe(record, self.emitter.as_ref()).await {
            Ok(Verdict::Emit(record)) => {
                Counters::incr(&self.counters.emitted);
                debug!(pair = %pair.id, spread_pct = record.spread_pct, urgency = ?record.urgency, "signal emitted");
                PairOutcome::Emitted
            }
            Ok(Verdict::BelowSignal(_)) => PairOutcome::BelowSignal,
            Ok(Verdict::Blocked { .. }) => PairOutcome::Blocked,
            Ok(Verdict::Recovering { .. } | Verdict::Suppressed(_)) => PairOutcome::Suppressed,
            Err(e) => {
                warn!(pair = %pair.id, error = ?e, "signal emit failed");
                PairOutcome::Failed
            }
        }
    }

    async fn on_failure(&self, pair: &InstrumentPair, err: MonitorError, cycle_ts_ms: u64) -> PairOutcome {
        match &err {
            MonitorError::TickerNotFound { .. } => {
                self.guard
                    .mark_unavailable(&pair.id, &err.to_string(), cycle_ts_ms)
                    .await;
            }
            MonitorError::StaleQuote { gap_ms, window_ms } => {
                Counters::incr(&self.counters.stale);
                debug!(pair = %pair.id, gap_ms, window_ms, "legs too far apart; cycle dropped");
            }
            MonitorError::ConversionError { .. }
            | MonitorError::InvalidQuote { .. }
            | MonitorError::QuoteMismatch { .. } => {
                Counters::incr(&self.counters.conversion_failures);
                warn!(pair = %pair.id, error = %err, "pair dropped this cycle");
            }
            MonitorError::SourceUnavailable { .. } | MonitorError::CatalogExhausted { .. } => {
                warn!(pair = %pair.id, error = %err, "no price this cycle");
            }
        }
        PairOutcome::Failed
    }
}
