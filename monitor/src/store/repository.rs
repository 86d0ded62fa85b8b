use anyhow::Result;
use async_trait::async_trait;

use crate::guard::PairStatus;
use crate::sources::Source;
use crate::validation::SweepReport;

/// Durable state the pipeline reads at startup and writes on every transition.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn load_sources(&self) -> Result<Vec<Source>>;

    async fn save_source(&self, source: &Source) -> Result<()>;

    async fn load_pair_statuses(&self) -> Result<Vec<PairStatus>>;

    async fn save_pair_status(&self, status: &PairStatus) -> Result<()>;

    async fn save_sweep_report(&self, report: &SweepReport) -> Result<()>;
}
