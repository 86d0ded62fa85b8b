use std::sync::Arc;

use crate::error::MonitorError;
use crate::normalizer::PriceNormalizer;
use crate::registry::InstrumentPair;
use crate::sources::SourcePool;
use crate::spread::{self, SpreadRecord};

/// poll both legs → normalize → compute. Shared by live cycles and sweeps.
#[derive(Clone)]
pub struct PairProbe {
    pool: Arc<SourcePool>,
    normalizer: PriceNormalizer,
    staleness_window_ms: u64,
}

impl PairProbe {
    pub fn new(pool: Arc<SourcePool>, normalizer: PriceNormalizer, staleness_window_ms: u64) -> Self {
        Self {
            pool,
            normalizer,
            staleness_window_ms,
        }
    }

    /// Fetches both legs concurrently and builds the cycle's spread record.
    pub async fn measure(
        &self,
        pair: &InstrumentPair,
        cycle_ts_ms: u64,
    ) -> Result<SpreadRecord, MonitorError> {
        let cash_leg = pair.cash();
        let deriv_leg = pair.derivative();

        let (cash, deriv) = tokio::join!(self.pool.poll(&cash_leg), self.pool.poll(&deriv_leg));

        let (cash, deriv) = match (cash, deriv) {
            (Ok(c), Ok(d)) => (c, d),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => return Err(e),
            // prefer the error that says something about the ticker itself
            (Err(c), Err(d)) => {
                return Err(if !c.is_unresolved_ticker() && d.is_unresolved_ticker() {
                    d
                } else {
                    c
                });
            }
        };

        let cash = self.normalizer.normalize(cash)?;
        let deriv = self.normalizer.normalize(deriv)?;

        spread::compute(pair, &cash, &deriv, self.staleness_window_ms, cycle_ts_ms)
    }
}
