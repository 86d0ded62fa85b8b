use anyhow::{Context, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use crate::guard::{PairState, PairStatus};
use crate::registry::PairId;
use crate::sources::{Source, SourceStatus};
use crate::store::repository::StateRepository;
use crate::validation::SweepReport;

/// SQLx-backed implementation of StateRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxStateRepository {
    pool: AnyPool,
}

impl SqlxStateRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateRepository for SqlxStateRepository {
    async fn load_sources(&self) -> anyhow::Result<Vec<Source>> {
        let rows = sqlx::query(
            r#"
SELECT
  id, endpoint, reliability,
  consecutive_failures, probation_failures,
  last_success_ms, cooldown_until_ms, status
FROM sources;
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_source(&r) {
                Ok(s) => out.push(s),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the load
                    tracing::warn!(error = %e, "skipping malformed source row");
                }
            }
        }

        Ok(out)
    }

    async fn save_source(&self, s: &Source) -> anyhow::Result<()> {
        let last_success = s.last_success_ms.map(u64_to_i64).transpose()?;

        sqlx::query(
            r#"
INSERT INTO sources (
  id, endpoint, reliability,
  consecutive_failures, probation_failures,
  last_success_ms, cooldown_until_ms, status
) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
  endpoint = excluded.endpoint,
  reliability = excluded.reliability,
  consecutive_failures = excluded.consecutive_failures,
  probation_failures = excluded.probation_failures,
  last_success_ms = excluded.last_success_ms,
  cooldown_until_ms = excluded.cooldown_until_ms,
  status = excluded.status;
"#,
        )
        .bind(s.id.clone())
        .bind(s.endpoint.clone())
        .bind(s.reliability)
        .bind(i64::from(s.consecutive_failures))
        .bind(i64::from(s.probation_failures))
        .bind(last_success)
        .bind(u64_to_i64(s.cooldown_until_ms)?)
        .bind(s.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_pair_statuses(&self) -> anyhow::Result<Vec<PairStatus>> {
        let rows = sqlx::query(
            r#"
SELECT
  cash, derivative, state, reason,
  since_ms, consecutive_passes, last_spread_pct
FROM pair_statuses;
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_pair_status(&r) {
                Ok(s) => out.push(s),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed pair status row");
                }
            }
        }

        Ok(out)
    }

    async fn save_pair_status(&self, st: &PairStatus) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO pair_statuses (
  pair_id, cash, derivative, state, reason,
  since_ms, consecutive_passes, last_spread_pct
) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(pair_id) DO UPDATE SET
  state = excluded.state,
  reason = excluded.reason,
  since_ms = excluded.since_ms,
  consecutive_passes = excluded.consecutive_passes,
  last_spread_pct = excluded.last_spread_pct;
"#,
        )
        .bind(st.pair.to_string())
        .bind(st.pair.cash.clone())
        .bind(st.pair.derivative.clone())
        .bind(st.state.as_str())
        .bind(st.reason.clone())
        .bind(u64_to_i64(st.since_ms)?)
        .bind(i64::from(st.consecutive_passes))
        .bind(st.last_spread_pct)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_sweep_report(&self, rep: &SweepReport) -> anyhow::Result<()> {
        let failures = serde_json::to_string(&rep.failures).context("encode sweep failures")?;

        sqlx::query(
            r#"
INSERT INTO validation_reports (
  report_id, kind, started_ms, finished_ms,
  checked, resolved, unresolved, inconclusive,
  active, blocked, unavailable, failures
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(rep.id.to_string())
        .bind(rep.kind.as_str())
        .bind(u64_to_i64(rep.started_ms)?)
        .bind(u64_to_i64(rep.finished_ms)?)
        .bind(usize_to_i64(rep.checked)?)
        .bind(usize_to_i64(rep.resolved)?)
        .bind(usize_to_i64(rep.unresolved)?)
        .bind(usize_to_i64(rep.inconclusive)?)
        .bind(usize_to_i64(rep.active)?)
        .bind(usize_to_i64(rep.blocked)?)
        .bind(usize_to_i64(rep.unavailable)?)
        .bind(failures)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_source(r: &sqlx::any::AnyRow) -> anyhow::Result<Source> {
    let status: String = r.try_get("status")?;
    let status =
        SourceStatus::parse(&status).ok_or_else(|| anyhow!("unknown source status {status}"))?;

    let last_success: Option<i64> = r.try_get("last_success_ms")?;

    let reliability: f64 = r.try_get("reliability")?;
    if !(0.0..=1.0).contains(&reliability) {
        return Err(anyhow!("reliability out of range: {reliability}"));
    }

    Ok(Source {
        id: r.try_get("id")?,
        endpoint: r.try_get("endpoint")?,
        reliability,
        consecutive_failures: i64_to_u32(r.try_get("consecutive_failures")?)?,
        probation_failures: i64_to_u32(r.try_get("probation_failures")?)?,
        last_success_ms: last_success.map(i64_to_u64).transpose()?,
        cooldown_until_ms: i64_to_u64(r.try_get("cooldown_until_ms")?)?,
        status,
    })
}

fn row_to_pair_status(r: &sqlx::any::AnyRow) -> anyhow::Result<PairStatus> {
    let state: String = r.try_get("state")?;
    let state = PairState::parse(&state).ok_or_else(|| anyhow!("unknown pair state {state}"))?;

    Ok(PairStatus {
        pair: PairId::new(
            r.try_get::<String, _>("cash")?,
            r.try_get::<String, _>("derivative")?,
        ),
        state,
        reason: r.try_get("reason")?,
        since_ms: i64_to_u64(r.try_get("since_ms")?)?,
        consecutive_passes: i64_to_u32(r.try_get("consecutive_passes")?)?,
        last_spread_pct: r.try_get("last_spread_pct")?,
    })
}

/* =========================
Numeric safety helpers
========================= */

fn i64_to_u32(v: i64) -> anyhow::Result<u32> {
    u32::try_from(v).map_err(|_| anyhow!("out of range for u32: {v}"))
}

fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    u64::try_from(v).map_err(|_| anyhow!("negative i64 where u64 expected: {v}"))
}

fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    i64::try_from(v).map_err(|_| anyhow!("u64 too large for i64: {v}"))
}

fn usize_to_i64(v: usize) -> anyhow::Result<i64> {
    i64::try_from(v).map_err(|_| anyhow!("usize too large for i64: {v}"))
}
