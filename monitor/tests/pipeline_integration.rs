use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use spreadguard::alerts::{AlertSink, OperatorAlert};
use spreadguard::config::{GuardConfig, PollingConfig, PoolConfig, ValidationConfig};
use spreadguard::emitter::ChannelEmitter;
use spreadguard::guard::{AnomalyGuard, PairState};
use spreadguard::hours::TradingHours;
use spreadguard::live::LiveMonitor;
use spreadguard::metrics::Counters;
use spreadguard::normalizer::PriceNormalizer;
use spreadguard::probe::PairProbe;
use spreadguard::registry::{
    InstrumentKind, InstrumentRegistry, PairDef, PairId, RuleDef, RuleId, RuleKind, Sector,
};
use spreadguard::sources::{FetchError, RawQuote, SourceAdapter, SourcePool};
use spreadguard::spread::{Direction, SpreadRecord, UrgencyTier};
use spreadguard::validation::{SweepKind, ValidationScheduler};

/// Market stand-in: per-symbol price and observation time, editable between cycles.
#[derive(Default)]
struct FakeMarket {
    quotes: Mutex<HashMap<String, Result<(f64, u64), FetchError>>>,
    stalled: Mutex<HashSet<String>>,
}

impl FakeMarket {
    fn set(&self, symbol: &str, price: f64, at_ms: u64) {
        self.quotes.lock().insert(symbol.to_string(), Ok((price, at_ms)));
    }

    fn fail(&self, symbol: &str, err: FetchError) {
        self.quotes.lock().insert(symbol.to_string(), Err(err));
    }

    /// Requests for `symbol` hang for an hour.
    fn stall(&self, symbol: &str) {
        self.stalled.lock().insert(symbol.to_string());
    }
}

#[async_trait]
impl SourceAdapter for FakeMarket {
    fn id(&self) -> &str {
        "fake"
    }

    fn endpoint(&self) -> &str {
        "fake://"
    }

    async fn fetch(&self, symbol: &str, _: InstrumentKind) -> Result<RawQuote, FetchError> {
        let stalled = self.stalled.lock().contains(symbol);
        if stalled {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        let entry = self.quotes.lock().get(symbol).cloned();
        match entry {
            Some(Ok((price, observed_at_ms))) => Ok(RawQuote {
                price,
                observed_at_ms,
            }),
            Some(Err(e)) => Err(e),
            None => Err(FetchError::NotFound {
                symbol: symbol.to_string(),
            }),
        }
    }
}

struct Harness {
    market: Arc<FakeMarket>,
    guard: Arc<AnomalyGuard>,
    live: Arc<LiveMonitor>,
    validation: ValidationScheduler,
    signals: mpsc::Receiver<SpreadRecord>,
    alerts: mpsc::Receiver<OperatorAlert>,
}

fn sber() -> PairId {
    PairId::new("SBER", "SRZ5")
}

fn gazp() -> PairId {
    PairId::new("GAZP", "GZZ5")
}

fn harness(guard_cfg: GuardConfig) -> Harness {
    build(guard_cfg, &[sber()], PollingConfig::default())
}

/// Every pair's derivative is quoted in points (x100).
fn build(guard_cfg: GuardConfig, pairs: &[PairId], polling: PollingConfig) -> Harness {
    let defs: Vec<PairDef> = pairs
        .iter()
        .map(|id| PairDef {
            cash: id.cash.clone(),
            derivative: id.derivative.clone(),
            rule: RuleId::new("points"),
            cash_rule: None,
            sector: Sector::Banks,
        })
        .collect();
    let registry = Arc::new(
        InstrumentRegistry::from_defs(
            &[RuleDef {
                id: RuleId::new("points"),
                kind: RuleKind::Scaled,
                factor: Some(0.01),
                contract_size: None,
            }],
            &defs,
        )
        .unwrap(),
    );

    let counters = Counters::default();
    let (alerts, alert_rx) = AlertSink::channel(16);
    let market = Arc::new(FakeMarket::default());

    let pool = Arc::new(SourcePool::new(
        vec![(market.clone() as Arc<dyn SourceAdapter>, 0.9)],
        PoolConfig {
            active_size: 1,
            max_retries: 0,
            failure_threshold: 100,
            requests_per_minute: 60_000,
            ..Default::default()
        },
        alerts.clone(),
        counters.clone(),
    ));

    let guard = Arc::new(AnomalyGuard::new(
        guard_cfg,
        registry.pairs().iter().map(|p| p.id.clone()),
        counters.clone(),
    ));

    let probe = PairProbe::new(pool, PriceNormalizer::new(registry.clone()), 5_000);
    let (emitter, signals) = ChannelEmitter::channel(16);

    let live = Arc::new(LiveMonitor::new(
        registry.clone(),
        probe.clone(),
        guard.clone(),
        Arc::new(emitter),
        polling,
        TradingHours::always_open(),
        counters,
    ));

    let validation = ValidationScheduler::new(
        registry,
        probe,
        guard.clone(),
        alerts,
        ValidationConfig::default(),
    );

    Harness {
        market,
        guard,
        live,
        validation,
        signals,
        alerts: alert_rx,
    }
}

/// Sets cash price and the derivative in points (x100).
fn quote(h: &Harness, cash: f64, derivative: f64) {
    h.market.set("SBER", cash, 1_000);
    h.market.set("SRZ5", derivative * 100.0, 1_000);
}

#[tokio::test]
async fn scaled_derivative_matches_cash_at_zero_spread() {
    let mut h = harness(GuardConfig {
        min_signal_pct: 0.0,
        ..Default::default()
    });
    h.market.set("SBER", 641.28, 1_000);
    h.market.set("SRZ5", 64_128.0, 1_200);

    let summary = h.live.run_cycle(2_000).await;
    assert_eq!(summary.emitted, 1);

    let rec = h.signals.try_recv().unwrap();
    assert!(rec.spread_pct.abs() < 1e-9);
    assert_eq!(rec.urgency, UrgencyTier::Normal);
    assert_eq!(rec.cycle_ts_ms, 2_000);
}

#[tokio::test]
async fn spread_below_signal_threshold_is_not_emitted() {
    let mut h = harness(GuardConfig::default());
    quote(&h, 100.0, 100.5);

    let summary = h.live.run_cycle(1).await;

    assert_eq!(summary.below_signal, 1);
    assert!(h.signals.try_recv().is_err());
    assert_eq!(h.guard.state(&sber()).await, Some(PairState::Active));
}

#[tokio::test]
async fn elevated_spread_is_emitted_with_urgency() {
    let mut h = harness(GuardConfig::default());
    quote(&h, 100.0, 97.5);

    h.live.run_cycle(1).await;

    let rec = h.signals.try_recv().unwrap();
    assert_eq!(rec.urgency, UrgencyTier::Elevated);
    assert_eq!(rec.direction, Direction::CashOverDerivative);
}

#[tokio::test]
async fn anomalous_spread_blocks_and_suppresses() {
    let mut h = harness(GuardConfig::default());
    quote(&h, 100.0, 190.0);

    let summary = h.live.run_cycle(1).await;

    assert_eq!(summary.blocked, 1);
    assert_eq!(summary.emitted, 0);
    assert!(h.signals.try_recv().is_err());
    assert_eq!(h.guard.state(&sber()).await, Some(PairState::Blocked));
}

#[tokio::test]
async fn blocked_pair_recovers_on_third_sane_cycle() {
    let mut h = harness(GuardConfig::default());
    quote(&h, 100.0, 190.0);
    h.live.run_cycle(1).await;

    quote(&h, 100.0, 105.0);
    for ts in 2..4 {
        let summary = h.live.run_cycle(ts).await;
        assert_eq!(summary.suppressed, 1);
        assert!(h.signals.try_recv().is_err());
        assert_eq!(h.guard.state(&sber()).await, Some(PairState::Blocked));
    }

    let summary = h.live.run_cycle(4).await;
    assert_eq!(summary.emitted, 1);
    assert_eq!(h.guard.state(&sber()).await, Some(PairState::Active));

    let rec = h.signals.try_recv().unwrap();
    assert_eq!(rec.urgency, UrgencyTier::Critical);
    assert!((rec.spread_pct - 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn stale_legs_produce_nothing() {
    let mut h = harness(GuardConfig::default());
    h.market.set("SBER", 100.0, 0);
    h.market.set("SRZ5", 10_500.0, 6_000);

    let summary = h.live.run_cycle(7_000).await;

    assert_eq!(summary.failed, 1);
    assert!(h.signals.try_recv().is_err());
    assert_eq!(h.guard.state(&sber()).await, Some(PairState::Active));
}

#[tokio::test]
async fn missing_ticker_on_live_path_makes_pair_unavailable() {
    let h = harness(GuardConfig::default());
    h.market.set("SBER", 100.0, 1_000);
    // SRZ5 unknown to the market

    h.live.run_cycle(1).await;
    let st = h.guard.status(&sber()).await.unwrap();
    assert_eq!(st.state, PairState::Unavailable);
    assert!(st.reason.starts_with("ticker unavailable"));

    // later cycles skip the pair, even once prices come back
    quote(&h, 100.0, 102.0);
    let summary = h.live.run_cycle(2).await;
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn full_sweep_marks_unresolved_and_light_sweep_restores() {
    let mut h = harness(GuardConfig::default());
    h.market.set("SBER", 100.0, 1_000);

    let report = h.validation.run_sweep_at(SweepKind::Full, 10).await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.unresolved, 1);
    assert_eq!(report.unavailable, 1);
    assert!(h.signals.try_recv().is_err());
    assert!(matches!(
        h.alerts.try_recv(),
        Ok(OperatorAlert::ValidationFailures { .. })
    ));

    quote(&h, 100.0, 102.0);
    let report = h.validation.run_sweep_at(SweepKind::Light, 20).await;
    assert_eq!(report.resolved, 1);
    assert_eq!(report.active, 1);
    assert!(report.failures.is_empty());
    assert_eq!(h.guard.state(&sber()).await, Some(PairState::Active));

    // sweeps never emit
    assert!(h.signals.try_recv().is_err());
}

#[tokio::test]
async fn light_sweep_ignores_active_pairs() {
    let h = harness(GuardConfig::default());
    quote(&h, 100.0, 102.0);

    let report = h.validation.run_sweep_at(SweepKind::Light, 0).await;
    assert_eq!(report.checked, 0);
}

#[tokio::test]
async fn validation_with_anomalous_spread_blocks_unavailable_pair() {
    let h = harness(GuardConfig::default());
    h.guard.mark_unavailable(&sber(), "delisted", 0).await;
    quote(&h, 100.0, 160.0);

    h.validation.run_sweep_at(SweepKind::Light, 5).await;

    assert_eq!(h.guard.state(&sber()).await, Some(PairState::Blocked));
}

#[tokio::test]
async fn repeated_source_failures_escalate_to_unresolved() {
    let h = harness(GuardConfig::default());
    h.market.fail("SBER", FetchError::Connection("refused".into()));
    h.market.fail("SRZ5", FetchError::Connection("refused".into()));

    let first = h.validation.run_sweep_at(SweepKind::Full, 0).await;
    assert_eq!(first.inconclusive, 1);
    assert_eq!(h.guard.state(&sber()).await, Some(PairState::Active));

    let second = h.validation.run_sweep_at(SweepKind::Full, 1).await;
    assert_eq!(second.unresolved, 1);
    assert_eq!(h.guard.state(&sber()).await, Some(PairState::Unavailable));
}

#[tokio::test]
async fn stale_validation_is_inconclusive_without_escalation() {
    let h = harness(GuardConfig::default());
    h.market.set("SBER", 100.0, 0);
    h.market.set("SRZ5", 10_000.0, 60_000);

    for ts in 0..3 {
        let report = h.validation.run_sweep_at(SweepKind::Full, ts).await;
        assert_eq!(report.inconclusive, 1);
    }
    assert_eq!(h.guard.state(&sber()).await, Some(PairState::Active));
}

#[tokio::test]
async fn missing_ticker_does_not_hold_back_other_pairs() {
    let mut h = build(GuardConfig::default(), &[sber(), gazp()], PollingConfig::default());
    quote(&h, 100.0, 102.0);
    h.market.set("GAZP", 150.0, 1_000);
    // GZZ5 unknown to the market

    let summary = h.live.run_cycle(1).await;

    assert_eq!(summary.pairs, 2);
    assert_eq!(summary.emitted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(h.signals.try_recv().unwrap().pair, sber());
    assert_eq!(h.guard.state(&gazp()).await, Some(PairState::Unavailable));
}

#[tokio::test(start_paused = true)]
async fn stalled_pair_times_out_alone() {
    let polling = PollingConfig {
        cycle_timeout_ms: 1_000,
        ..Default::default()
    };
    let mut h = build(GuardConfig::default(), &[sber(), gazp()], polling);
    quote(&h, 100.0, 102.0);
    h.market.set("GAZP", 150.0, 1_000);
    h.market.stall("GZZ5");

    let summary = h.live.run_cycle(1).await;

    assert_eq!(summary.pairs, 2);
    assert_eq!(summary.emitted, 1);
    assert_eq!(summary.timed_out, 1);
    assert_eq!(h.signals.try_recv().unwrap().pair, sber());
    assert_eq!(h.guard.state(&gazp()).await, Some(PairState::Active));
}
