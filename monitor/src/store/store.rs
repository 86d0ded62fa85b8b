use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use common::logger::warn_if_slow;

use crate::guard::PairStatus;
use crate::sources::Source;
use crate::store::repository::StateRepository;
use crate::validation::SweepReport;

/// Pipeline-facing state store: slow-call warnings and error context
/// around the repository.
pub struct StateStore {
    repo: Arc<dyn StateRepository>,
}

impl StateStore {
    pub fn new(repo: Arc<dyn StateRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self), target = "store")]
    pub async fn load_sources(&self) -> Result<Vec<Source>> {
        let sources = warn_if_slow("db_load_sources", Duration::from_millis(200), async {
            self.repo.load_sources().await
        })
        .await
        .context("failed to load source records")?;

        info!(count = sources.len(), "source records loaded");
        Ok(sources)
    }

    #[instrument(skip(self, source), target = "store", fields(source = %source.id, status = source.status.as_str()))]
    pub async fn save_source(&self, source: &Source) -> Result<()> {
        debug!(reliability = source.reliability, "persisting source record");

        warn_if_slow("db_save_source", Duration::from_millis(50), async {
            self.repo.save_source(source).await
        })
        .await
        .context("failed to persist source record")
    }

    #[instrument(skip(self), target = "store")]
    pub async fn load_pair_statuses(&self) -> Result<Vec<PairStatus>> {
        let statuses = warn_if_slow("db_load_pair_statuses", Duration::from_millis(200), async {
            self.repo.load_pair_statuses().await
        })
        .await
        .context("failed to load pair statuses")?;

        info!(count = statuses.len(), "pair statuses loaded");
        Ok(statuses)
    }

    #[instrument(skip(self, status), target = "store", fields(pair = %status.pair, state = status.state.as_str()))]
    pub async fn save_pair_status(&self, status: &PairStatus) -> Result<()> {
        debug!("persisting pair status");

        warn_if_slow("db_save_pair_status", Duration::from_millis(50), async {
            self.repo.save_pair_status(status).await
        })
        .await
        .context("failed to persist pair status")
    }

    #[instrument(skip(self, report), target = "store", fields(report_id = %report.id))]
    pub async fn save_sweep_report(&self, report: &SweepReport) -> Result<()> {
        warn_if_slow("db_save_sweep_report", Duration::from_millis(100), async {
            self.repo.save_sweep_report(report).await
        })
        .await
        .context("failed to persist sweep report")
    }
}
