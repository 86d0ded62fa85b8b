use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::spread::SpreadRecord;

/// Hand-off point towards message delivery. Receives accepted records only.
#[async_trait]
pub trait SignalEmitter: Send + Sync {
    async fn emit(&self, record: SpreadRecord) -> anyhow::Result<()>;
}

/// Bounded channel to the delivery side. Never blocks the cycle: a full
/// channel drops the signal and reports an error.
pub struct ChannelEmitter {
    tx: mpsc::Sender<SpreadRecord>,
}

impl ChannelEmitter {
    pub fn new(tx: mpsc::Sender<SpreadRecord>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SpreadRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SignalEmitter for ChannelEmitter {
    async fn emit(&self, record: SpreadRecord) -> anyhow::Result<()> {
        self.tx
            .try_send(record)
            .map_err(|e| anyhow!("signal channel rejected record: {e}"))
    }
}

/// Writes every signal to the log as structured JSON.
#[derive(Default)]
pub struct LogEmitter;

#[async_trait]
impl SignalEmitter for LogEmitter {
    async fn emit(&self, record: SpreadRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&record)?;
        info!(
            target: "signal",
            pair = %record.pair,
            spread_pct = record.spread_pct,
            urgency = ?record.urgency,
            %payload,
            "spread signal"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PairId, Sector};
    use crate::spread::{Direction, UrgencyTier};

    fn record() -> SpreadRecord {
        SpreadRecord {
            pair: PairId::new("SBER", "SRZ5"),
            sector: Sector::Banks,
            spread_pct: 2.4,
            direction: Direction::DerivativeOverCash,
            urgency: UrgencyTier::Elevated,
            cycle_ts_ms: 1,
            cash_price: 100.0,
            derivative_price: 102.4,
        }
    }

    #[tokio::test]
    async fn channel_emitter_forwards_and_reports_backpressure() {
        let (em, mut rx) = ChannelEmitter::channel(1);

        em.emit(record()).await.unwrap();
        assert!(em.emit(record()).await.is_err());

        assert_eq!(rx.recv().await, Some(record()));
    }

    #[tokio::test]
    async fn log_emitter_accepts_records() {
        LogEmitter.emit(record()).await.unwrap();
    }
}
