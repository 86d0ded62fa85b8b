use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Source reliability records
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS sources (
  id TEXT PRIMARY KEY,
  endpoint TEXT NOT NULL,
  reliability REAL NOT NULL,
  consecutive_failures BIGINT NOT NULL,
  probation_failures BIGINT NOT NULL,
  last_success_ms BIGINT,
  cooldown_until_ms BIGINT NOT NULL,
  status TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Guard state per pair
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS pair_statuses (
  pair_id TEXT PRIMARY KEY,
  cash TEXT NOT NULL,
  derivative TEXT NOT NULL,
  state TEXT NOT NULL,
  reason TEXT NOT NULL,
  since_ms BIGINT NOT NULL,
  consecutive_passes BIGINT NOT NULL,
  last_spread_pct REAL
);
"#,
    )
    .execute(pool)
    .await?;

    // Sweep summaries
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS validation_reports (
  report_id TEXT PRIMARY KEY,
  kind TEXT NOT NULL,
  started_ms BIGINT NOT NULL,
  finished_ms BIGINT NOT NULL,
  checked BIGINT NOT NULL,
  resolved BIGINT NOT NULL,
  unresolved BIGINT NOT NULL,
  inconclusive BIGINT NOT NULL,
  active BIGINT NOT NULL,
  blocked BIGINT NOT NULL,
  unavailable BIGINT NOT NULL,
  failures TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_pair_statuses_state ON pair_statuses(state);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_validation_reports_started ON validation_reports(started_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
