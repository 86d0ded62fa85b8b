//! Validation Scheduler
//!
//! Re-checks pair health on its own cadence, independently of live polling:
//! a full sweep over every pair and a light sweep over blocked and
//! unavailable pairs. Sweeps only move `PairStatus`; they never emit.

pub mod report;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, info, instrument, warn};

use common::logger::{TraceId, root_span};

use crate::alerts::{AlertSink, OperatorAlert};
use crate::config::ValidationConfig;
use crate::error::MonitorError;
use crate::guard::{AnomalyGuard, PairState, ValidationOutcome};
use crate::probe::PairProbe;
use crate::registry::{InstrumentPair, InstrumentRegistry, PairId};
use crate::spread::SpreadRecord;
use crate::store::StateStore;
use crate::time::now_ms;

pub use report::{SweepFailure, SweepKind, SweepReport};

/// Pairs probed at once within a sweep.
const SWEEP_CONCURRENCY: usize = 4;

pub struct ValidationScheduler {
    registry: Arc<InstrumentRegistry>,
    probe: PairProbe,
    guard: Arc<AnomalyGuard>,
    store: Option<Arc<StateStore>>,
    alerts: AlertSink,
    cfg: ValidationConfig,
    /// Consecutive sweeps in which no source could answer, per pair.
    inconclusive: Mutex<HashMap<PairId, u32>>,
}

impl ValidationScheduler {
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        probe: PairProbe,
        guard: Arc<AnomalyGuard>,
        alerts: AlertSink,
        cfg: ValidationConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            guard,
            store: None,
            alerts,
            cfg,
            inconclusive: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Starts the full and light sweep loops. The full sweep runs once
    /// immediately; the light sweep waits one period.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let full_every = Duration::from_millis(self.cfg.full_every_ms);
        let light_every = Duration::from_millis(self.cfg.light_every_ms);

        let full = {
            let this = self.clone();
            tokio::spawn(async move { this.run_every(SweepKind::Full, Instant::now(), full_every).await })
        };
        let light = {
            let this = self;
            tokio::spawn(async move {
                this.run_every(SweepKind::Light, Instant::now() + light_every, light_every)
                    .await
            })
        };

        vec![full, light]
    }

    async fn run_every(&self, kind: SweepKind, start: Instant, every: Duration) {
        let mut ticker = interval_at(start, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(sweep = kind.as_str(), every_ms = every.as_millis() as u64, "validation loop started");

        loop {
            ticker.tick().await;
            let trace_id = TraceId::new();
            let span = root_span("validation_sweep", &trace_id);
            self.run_sweep(kind).instrument(span).await;
        }
    }

    pub async fn run_sweep(&self, kind: SweepKind) -> SweepReport {
        self.run_sweep_at(kind, now_ms()).await
    }

    #[instrument(skip(self), target = "validation", fields(sweep = kind.as_str()))]
    pub async fn run_sweep_at(&self, kind: SweepKind, now_ms: u64) -> SweepReport {
        let mut report = SweepReport::new(kind, now_ms);
        let targets = self.targets(kind).await;

        debug!(pairs = targets.len(), "sweep started");

        let checks: Vec<_> = targets.iter().map(|pair| self.check_pair(pair, now_ms)).collect();
        let results: Vec<(Tally, Option<SweepFailure>)> = stream::iter(checks)
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        for (tally, failure) in results {
            report.checked += 1;
            match tally {
                Tally::Resolved => report.resolved += 1,
                Tally::Unresolved => report.unresolved += 1,
                Tally::Inconclusive => report.inconclusive += 1,
            }
            report.failures.extend(failure);
        }
        report.failures.sort_by(|a, b| a.pair.cmp(&b.pair));

        report.count_states(&self.guard.snapshot().await);
        report.finished_ms = crate::time::now_ms().max(now_ms);

        self.finish(&report).await;
        report
    }

    async fn targets(&self, kind: SweepKind) -> Vec<InstrumentPair> {
        match kind {
            SweepKind::Full => self.registry.pairs().to_vec(),
            SweepKind::Light => {
                let flagged = self
                    .guard
                    .pairs_in(&[PairState::Blocked, PairState::Unavailable])
                    .await;
                self.registry
                    .pairs()
                    .iter()
                    .filter(|p| flagged.contains(&p.id))
                    .cloned()
                    .collect()
            }
        }
    }

    async fn check_pair(&self, pair: &InstrumentPair, now_ms: u64) -> (Tally, Option<SweepFailure>) {
        let measured = self.probe.measure(pair, now_ms).await;
        let (outcome, tally, failure) = self.classify(&pair.id, measured);

        let state = self.guard.observe_validation(&pair.id, outcome, now_ms).await;
        debug!(pair = %pair.id, state = state.as_str(), "pair validated");

        (tally, failure)
    }

    /// Maps a probe result onto a guard outcome, tracking repeated
    /// source-side failures per pair.
    fn classify(
        &self,
        pair: &PairId,
        measured: Result<SpreadRecord, MonitorError>,
    ) -> (ValidationOutcome, Tally, Option<SweepFailure>) {
        let failure = |e: &dyn std::fmt::Display, unresolved: bool| SweepFailure {
            pair: pair.clone(),
            error: e.to_string(),
            unresolved,
        };

        match measured {
            Ok(record) => {
                self.inconclusive.lock().remove(pair);
                (ValidationOutcome::Resolved(record), Tally::Resolved, None)
            }

            Err(e) if e.is_unresolved_ticker() => {
                self.inconclusive.lock().remove(pair);
                (
                    ValidationOutcome::Unresolved(e.to_string()),
                    Tally::Unresolved,
                    Some(failure(&e, true)),
                )
            }

            Err(e) if e.is_source_side() => {
                let streak = {
                    let mut map = self.inconclusive.lock();
                    let n = map.entry(pair.clone()).or_insert(0);
                    *n += 1;
                    *n
                };

                if streak >= self.cfg.unresolved_after {
                    let why = format!("no source answered in {streak} consecutive sweeps ({e})");
                    (
                        ValidationOutcome::Unresolved(why.clone()),
                        Tally::Unresolved,
                        Some(failure(&why, true)),
                    )
                } else {
                    (
                        ValidationOutcome::Inconclusive,
                        Tally::Inconclusive,
                        Some(failure(&e, false)),
                    )
                }
            }

            // stale legs, conversion problems: nothing learned about the ticker
            Err(e) => (
                ValidationOutcome::Inconclusive,
                Tally::Inconclusive,
                Some(failure(&e, false)),
            ),
        }
    }

    async fn finish(&self, report: &SweepReport) {
        info!(
            report_id = %report.id,
            sweep = report.kind.as_str(),
            checked = report.checked,
            resolved = report.resolved,
            unresolved = report.unresolved,
            inconclusive = report.inconclusive,
            active = report.active,
            blocked = report.blocked,
            unavailable = report.unavailable,
            elapsed_ms = report.finished_ms.saturating_sub(report.started_ms),
            "validation sweep complete"
        );

        if !report.failures.is_empty() {
            for f in &report.failures {
                warn!(pair = %f.pair, unresolved = f.unresolved, error = %f.error, "pair failed validation");
            }
            self.alerts.raise(OperatorAlert::ValidationFailures {
                sweep: report.kind.as_str(),
                pairs: report
                    .failures
                    .iter()
                    .map(|f| (f.pair.clone(), f.error.clone()))
                    .collect(),
                at_ms: report.finished_ms,
            });
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save_sweep_report(report).await {
                warn!(error = ?e, "failed to persist sweep report");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tally {
    Resolved,
    Unresolved,
    Inconclusive,
}
