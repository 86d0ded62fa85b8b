use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::hours::TradingHours;
use crate::registry::{PairDef, RuleDef};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// JSON log output. Forced on when `APP_ENV=production`.
    pub json_logs: bool,

    pub polling: PollingConfig,
    pub pool: PoolConfig,
    pub guard: GuardConfig,
    pub validation: ValidationConfig,
    pub trading_hours: TradingHours,
    pub emitter: EmitterConfig,

    pub rules: Vec<RuleDef>,
    pub pairs: Vec<PairDef>,
    pub sources: Vec<SourceDef>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://spreadguard_dev.db?mode=rwc".to_string(),
            json_logs: false,
            polling: PollingConfig::default(),
            pool: PoolConfig::default(),
            guard: GuardConfig::default(),
            validation: ValidationConfig::default(),
            trading_hours: TradingHours::default(),
            emitter: EmitterConfig::default(),
            rules: Vec::new(),
            pairs: Vec::new(),
            sources: Vec::new(),
        }
    }
}

// =========================
// Live polling
// =========================
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Cadence of live cycles over all pairs.
    pub interval_ms: u64,

    /// Budget for one pair within a cycle (both legs + classification).
    /// A pair that overruns is abandoned for that cycle only.
    pub cycle_timeout_ms: u64,

    /// Maximum distance between the two legs' observation times.
    pub staleness_window_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            cycle_timeout_ms: 20_000,
            staleness_window_ms: 5_000,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }
}

// =========================
// Source pool
// =========================
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of sources kept `active`; the rest of the catalog waits in standby.
    pub active_size: usize,

    /// Retries of a transient failure before it is counted against the source.
    pub max_retries: u32,

    /// Backoff before retry `n` is `backoff_base_ms * 2^n`.
    pub backoff_base_ms: u64,

    /// Consecutive counted failures that move an active source to cooldown.
    pub failure_threshold: u32,

    pub cooldown_ms: u64,

    /// Failed probes after cooldown before the source is replaced.
    pub probation_attempts: u32,

    /// Weight of the newest outcome in the reliability score.
    pub smoothing_alpha: f64,

    pub max_concurrent_requests: usize,
    pub requests_per_minute: u32,
    pub request_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            active_size: 2,
            max_retries: 3,
            backoff_base_ms: 250,
            failure_threshold: 3,
            cooldown_ms: 300_000,
            probation_attempts: 1,
            smoothing_alpha: 0.2,
            max_concurrent_requests: 8,
            requests_per_minute: 300,
            request_timeout_ms: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

// =========================
// Anomaly guard
// =========================
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// |spread| above this blocks the pair.
    pub block_threshold_pct: f64,

    /// Consecutive sane cycles required to unblock.
    pub recovery_cycles: u32,

    /// Active readings below this are accepted but not emitted.
    pub min_signal_pct: f64,

    pub elevated_pct: f64,
    pub critical_pct: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            block_threshold_pct: 30.0,
            recovery_cycles: 3,
            min_signal_pct: 1.0,
            elevated_pct: 2.0,
            critical_pct: 3.0,
        }
    }
}

// =========================
// Validation sweeps
// =========================
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Full sweep over every pair.
    pub full_every_ms: u64,

    /// Light sweep over blocked and unavailable pairs.
    pub light_every_ms: u64,

    /// Consecutive inconclusive sweeps (no source could answer) before the
    /// pair is treated as unresolved.
    pub unresolved_after: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            full_every_ms: 24 * 60 * 60 * 1_000,
            light_every_ms: 6 * 60 * 60 * 1_000,
            unresolved_after: 2,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Capacity of the hand-off channel towards delivery.
    pub channel_capacity: usize,
    pub alert_capacity: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            alert_capacity: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    MoexIss,
}

/// One entry of the source catalog.
#[derive(Clone, Debug, Deserialize)]
pub struct SourceDef {
    pub id: String,
    pub kind: SourceKind,
    pub endpoint: String,
    /// Starting reliability in [0, 1]; also decides the initial active set.
    #[serde(default = "default_prior_reliability")]
    pub prior_reliability: f64,
}

fn default_prior_reliability() -> f64 {
    0.5
}

impl AppConfig {
    /// Reads a TOML file and applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;

        let mut cfg = Self::parse(&raw)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("invalid config")
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if std::env::var("APP_ENV").unwrap_or_default() == "production" {
            self.json_logs = true;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.pool;
        if p.active_size == 0 {
            bail!("pool.active_size must be at least 1");
        }
        if !(p.smoothing_alpha > 0.0 && p.smoothing_alpha <= 1.0) {
            bail!("pool.smoothing_alpha must be in (0, 1]");
        }
        if p.failure_threshold == 0 || p.probation_attempts == 0 {
            bail!("pool.failure_threshold and pool.probation_attempts must be positive");
        }
        if p.max_concurrent_requests == 0 || p.requests_per_minute == 0 {
            bail!("pool request limits must be positive");
        }

        let g = &self.guard;
        if g.block_threshold_pct <= 0.0 {
            bail!("guard.block_threshold_pct must be positive");
        }
        if !(g.elevated_pct < g.critical_pct && g.critical_pct <= g.block_threshold_pct) {
            bail!("guard urgency bands must satisfy elevated < critical <= block threshold");
        }
        if g.min_signal_pct < 0.0 || g.recovery_cycles == 0 {
            bail!("guard.min_signal_pct must be >= 0 and guard.recovery_cycles >= 1");
        }

        if self.polling.interval_ms == 0
            || self.validation.full_every_ms == 0
            || self.validation.light_every_ms == 0
        {
            bail!("polling and sweep intervals must be positive");
        }
        if self.polling.cycle_timeout_ms == 0 || p.request_timeout_ms == 0 {
            bail!("polling.cycle_timeout_ms and pool.request_timeout_ms must be positive");
        }
        if self.validation.unresolved_after == 0 {
            bail!("validation.unresolved_after must be at least 1");
        }

        if self.sources.is_empty() {
            bail!("at least one source must be configured");
        }
        for s in &self.sources {
            if !(0.0..=1.0).contains(&s.prior_reliability) {
                bail!("source {} prior_reliability must be in [0, 1]", s.id);
            }
        }

        self.trading_hours.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RuleKind, Sector};

    const SAMPLE: &str = r#"
database_url = "sqlite::memory:"

[polling]
interval_ms = 30000

[guard]
block_threshold_pct = 25.0

[[rules]]
id = "points"
kind = "scaled"
factor = 0.01

[[pairs]]
cash = "SBER"
derivative = "SRZ5"
rule = "points"
sector = "banks"

[[pairs]]
cash = "AFLT"
derivative = "AFZ5"
rule = "identity"
sector = "airlines"

[[sources]]
id = "moex"
kind = "moex_iss"
endpoint = "https://iss.moex.com/iss"
prior_reliability = 0.95
"#;

    #[test]
    fn parses_sections_and_fills_defaults() {
        let cfg = AppConfig::parse(SAMPLE).unwrap();

        assert_eq!(cfg.polling.interval_ms, 30_000);
        assert_eq!(cfg.polling.staleness_window_ms, 5_000);
        assert_eq!(cfg.guard.block_threshold_pct, 25.0);
        assert_eq!(cfg.guard.recovery_cycles, 3);
        assert_eq!(cfg.pool.max_retries, 3);
        assert_eq!(cfg.rules[0].kind, RuleKind::Scaled);
        assert_eq!(cfg.pairs[0].sector, Sector::Banks);
        assert_eq!(cfg.sources[0].kind, SourceKind::MoexIss);
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_sector_falls_back_to_other() {
        let cfg = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.pairs[1].sector, Sector::Other);
    }

    #[test]
    fn unordered_urgency_bands_are_rejected() {
        let mut cfg = AppConfig::parse(SAMPLE).unwrap();
        cfg.guard.elevated_pct = 5.0;
        cfg.guard.critical_pct = 4.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn alpha_out_of_range_is_rejected() {
        let mut cfg = AppConfig::parse(SAMPLE).unwrap();
        cfg.pool.smoothing_alpha = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_periods_are_rejected() {
        let base = AppConfig::parse(SAMPLE).unwrap();
        assert!(base.validate().is_ok());

        let mut cfg = base.clone();
        cfg.validation.full_every_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.validation.light_every_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base;
        cfg.polling.cycle_timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = PoolConfig {
            backoff_base_ms: 100,
            ..Default::default()
        };
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(800));
        assert_eq!(p.backoff(80), Duration::from_millis(u64::MAX));
    }
}
