//! Source Pool Manager
//!
//! Owns the source catalog and answers `poll(instrument)` by walking the
//! eligible sources in score order until one returns a price.
//!
//! Lifecycle of a source:
//! - `standby` → `active` when promoted: startup top-K, and whenever the
//!   active set falls below `active_size` (cooldown or replacement)
//! - `active` → `cooldown` after `failure_threshold` consecutive counted failures
//! - `cooldown` (expired) is probed first on the next poll; success → `active`,
//!   failure → `replaced` once `probation_attempts` probes have failed
//! - `active` → `standby` when the set is over `active_size`; the weakest goes
//!
//! Each source's record sits behind its own `parking_lot::Mutex`, never held
//! across an await.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use super::gate::RequestGate;
use super::{FetchError, RawQuote, Source, SourceAdapter, SourceStatus};
use crate::alerts::{AlertSink, OperatorAlert};
use crate::config::PoolConfig;
use crate::error::MonitorError;
use crate::metrics::Counters;
use crate::quote::Quote;
use crate::registry::Instrument;
use crate::store::StateStore;
use crate::time::now_ms;

struct PooledSource {
    adapter: Arc<dyn SourceAdapter>,
    state: Mutex<Source>,
}

pub struct SourcePool {
    sources: Vec<PooledSource>,
    cfg: PoolConfig,
    gate: RequestGate,
    store: Option<Arc<StateStore>>,
    alerts: AlertSink,
    counters: Counters,
    exhausted: AtomicBool,
}

impl SourcePool {
    /// Builds the pool from `(adapter, prior reliability)` pairs. The
    /// `active_size` best priors start active, the rest in standby.
    pub fn new(
        catalog: Vec<(Arc<dyn SourceAdapter>, f64)>,
        cfg: PoolConfig,
        alerts: AlertSink,
        counters: Counters,
    ) -> Self {
        let mut catalog = catalog;
        catalog.sort_by(|a, b| b.1.total_cmp(&a.1));

        let sources = catalog
            .into_iter()
            .enumerate()
            .map(|(rank, (adapter, prior))| {
                let mut source = Source::new(adapter.id(), adapter.endpoint(), prior);
                if rank < cfg.active_size {
                    source.status = SourceStatus::Active;
                }
                PooledSource {
                    adapter,
                    state: Mutex::new(source),
                }
            })
            .collect::<Vec<_>>();

        let gate = RequestGate::new(cfg.max_concurrent_requests, cfg.requests_per_minute);

        info!(
            sources = sources.len(),
            active = cfg.active_size.min(sources.len()),
            "source pool initialized"
        );

        Self {
            sources,
            cfg,
            gate,
            store: None,
            alerts,
            counters,
            exhausted: AtomicBool::new(false),
        }
    }

    /// Persists every counted outcome through `store`.
    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn poll(&self, instrument: &Instrument) -> Result<Quote, MonitorError> {
        self.poll_at(instrument, now_ms()).await
    }

    /// `poll` against an explicit clock, used for cooldown bookkeeping.
    #[instrument(skip(self), target = "pool", fields(symbol = %instrument.symbol))]
    pub async fn poll_at(&self, instrument: &Instrument, now_ms: u64) -> Result<Quote, MonitorError> {
        let mut ranked = self.ranked_eligible(now_ms);
        if ranked.is_empty() {
            self.rebalance().await;
            ranked = self.ranked_eligible(now_ms);
        }

        if ranked.is_empty() {
            if !self.exhausted.swap(true, Ordering::SeqCst) {
                self.alerts.raise(OperatorAlert::CatalogExhausted {
                    symbol: instrument.symbol.clone(),
                    at_ms: now_ms,
                });
            }
            return Err(MonitorError::CatalogExhausted {
                symbol: instrument.symbol.clone(),
            });
        }
        self.exhausted.store(false, Ordering::SeqCst);

        let mut failures: Vec<String> = Vec::new();

        for idx in ranked {
            let src = &self.sources[idx];
            let source_id = src.adapter.id().to_string();

            match self.fetch_with_retry(src, instrument).await {
                Ok(raw) => {
                    self.record_success(idx, now_ms).await;
                    debug!(source = %source_id, price = raw.price, "quote polled");
                    return Ok(Quote::new(
                        instrument.symbol.clone(),
                        raw.price,
                        source_id,
                        raw.observed_at_ms,
                    ));
                }
                Err(e) if !e.penalizes_source() => {
                    debug!(source = %source_id, error = %e, "ticker not found upstream");
                    return Err(MonitorError::TickerNotFound {
                        symbol: instrument.symbol.clone(),
                        source_id,
                    });
                }
                Err(e) => {
                    warn!(source = %source_id, error = %e, "source failed; failing over");
                    self.record_failure(idx, now_ms).await;
                    failures.push(format!("{source_id}: {e}"));
                }
            }
        }

        Err(MonitorError::SourceUnavailable {
            symbol: instrument.symbol.clone(),
            reason: failures.join("; "),
        })
    }

    /// Retries transient errors with exponential backoff. Every attempt goes
    /// through the request gate and has its own timeout.
    async fn fetch_with_retry(
        &self,
        src: &PooledSource,
        instrument: &Instrument,
    ) -> Result<RawQuote, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            let result = {
                let _permit = self.gate.enter().await?;
                match timeout(
                    self.cfg.request_timeout(),
                    src.adapter.fetch(&instrument.symbol, instrument.kind),
                )
                .await
                {
                    Ok(r) => r,
                    Err(_) => Err(FetchError::Timeout),
                }
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.cfg.max_retries => {
                    let delay = self.cfg.backoff(attempt);
                    debug!(
                        source = src.adapter.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Eligible sources in poll order: expired cooldowns first so each gets
    /// its probation probe, then actives by score.
    fn ranked_eligible(&self, now_ms: u64) -> Vec<usize> {
        let mut eligible: Vec<(usize, bool, f64)> = self
            .sources
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let st = s.state.lock();
                st.is_eligible(now_ms)
                    .then_some((i, st.status == SourceStatus::Cooldown, st.reliability))
            })
            .collect();

        eligible.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.total_cmp(&a.2)));
        eligible.into_iter().map(|(i, _, _)| i).collect()
    }

    async fn record_success(&self, idx: usize, now_ms: u64) {
        let (snapshot, restored) = {
            let mut s = self.sources[idx].state.lock();
            s.record_outcome(true, self.cfg.smoothing_alpha);
            s.consecutive_failures = 0;
            s.probation_failures = 0;
            s.last_success_ms = Some(now_ms);
            let restored = s.status == SourceStatus::Cooldown;
            if restored {
                info!(source = %s.id, "probation passed; source restored");
                s.status = SourceStatus::Active;
                s.cooldown_until_ms = 0;
            }
            (s.clone(), restored)
        };
        self.persist(&snapshot).await;

        if restored {
            self.rebalance().await;
        }
    }

    async fn record_failure(&self, idx: usize, now_ms: u64) {
        Counters::incr(&self.counters.source_failures);

        let (snapshot, left_active, replaced) = {
            let mut s = self.sources[idx].state.lock();
            s.record_outcome(false, self.cfg.smoothing_alpha);

            let mut left_active = false;
            let mut replaced = false;
            match s.status {
                SourceStatus::Active => {
                    s.consecutive_failures += 1;
                    if s.consecutive_failures >= self.cfg.failure_threshold {
                        s.status = SourceStatus::Cooldown;
                        s.cooldown_until_ms = now_ms.saturating_add(self.cfg.cooldown_ms);
                        left_active = true;
                        warn!(
                            source = %s.id,
                            failures = s.consecutive_failures,
                            until_ms = s.cooldown_until_ms,
                            "source moved to cooldown"
                        );
                    }
                }
                // only a probe after expiry counts; in-flight stragglers do not
                SourceStatus::Cooldown if now_ms >= s.cooldown_until_ms => {
                    s.probation_failures += 1;
                    if s.probation_failures >= self.cfg.probation_attempts {
                        s.status = SourceStatus::Replaced;
                        replaced = true;
                        warn!(source = %s.id, "probation failed; source replaced");
                    } else {
                        s.cooldown_until_ms = now_ms.saturating_add(self.cfg.cooldown_ms);
                    }
                }
                _ => {}
            }
            (s.clone(), left_active, replaced)
        };

        self.persist(&snapshot).await;

        if replaced {
            Counters::incr(&self.counters.replacements);
        }
        if left_active || replaced {
            self.rebalance().await;
        }
    }

    /// Brings the active set back to `active_size`: promotes the best standby
    /// sources while short, demotes the weakest actives while over.
    async fn rebalance(&self) {
        loop {
            let active = self
                .sources
                .iter()
                .filter(|s| s.state.lock().status == SourceStatus::Active)
                .count();

            let changed = if active < self.cfg.active_size {
                let promoted = self.promote_standby();
                match &promoted {
                    Some(s) => info!(source = %s.id, "standby source promoted"),
                    None => debug!(active, wanted = self.cfg.active_size, "no standby source left to promote"),
                }
                promoted
            } else if active > self.cfg.active_size {
                let demoted = self.demote_weakest();
                if let Some(s) = &demoted {
                    info!(source = %s.id, "active set over size; source moved to standby");
                }
                demoted
            } else {
                None
            };

            match changed {
                Some(source) => self.persist(&source).await,
                None => break,
            }
        }
    }

    fn demote_weakest(&self) -> Option<Source> {
        let weakest = self
            .sources
            .iter()
            .filter_map(|s| {
                let st = s.state.lock();
                (st.status == SourceStatus::Active).then_some((s, st.reliability))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s)?;

        let mut st = weakest.state.lock();
        if st.status != SourceStatus::Active {
            return None;
        }
        st.status = SourceStatus::Standby;
        st.consecutive_failures = 0;
        Some(st.clone())
    }

    /// Activates the best-scoring standby source.
    fn promote_standby(&self) -> Option<Source> {
        let best = self
            .sources
            .iter()
            .filter_map(|s| {
                let st = s.state.lock();
                (st.status == SourceStatus::Standby).then_some((s, st.reliability))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s)?;

        let mut st = best.state.lock();
        // re-check: another replacement may have taken it meanwhile
        if st.status != SourceStatus::Standby {
            return None;
        }
        st.status = SourceStatus::Active;
        st.consecutive_failures = 0;
        st.probation_failures = 0;
        st.cooldown_until_ms = 0;
        Some(st.clone())
    }

    async fn persist(&self, source: &Source) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_source(source).await {
                warn!(source = %source.id, error = ?e, "failed to persist source record");
            }
        }
    }

    /// Current records of every source in the catalog.
    pub fn snapshot(&self) -> Vec<Source> {
        self.sources.iter().map(|s| s.state.lock().clone()).collect()
    }

    pub fn source(&self, id: &str) -> Option<Source> {
        self.sources
            .iter()
            .find(|s| s.adapter.id() == id)
            .map(|s| s.state.lock().clone())
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(|s| {
                let st = s.state.lock();
                (st.status == SourceStatus::Active).then(|| st.id.clone())
            })
            .collect()
    }

    /// Applies saved records to sources still present in the catalog, then
    /// tops the active set back up from standby if it shrank.
    pub fn restore(&self, saved: Vec<Source>) {
        let mut applied = 0usize;
        for record in saved {
            let Some(src) = self.sources.iter().find(|s| s.adapter.id() == record.id) else {
                debug!(source = %record.id, "saved source no longer in catalog");
                continue;
            };
            let mut st = src.state.lock();
            let endpoint = st.endpoint.clone();
            *st = Source { endpoint, ..record };
            applied += 1;
        }

        let active = self
            .sources
            .iter()
            .filter(|s| s.state.lock().status == SourceStatus::Active)
            .count();

        for _ in active..self.cfg.active_size {
            if self.promote_standby().is_none() {
                break;
            }
        }

        info!(applied, active = ?self.active_ids(), "source records restored");
    }
}
