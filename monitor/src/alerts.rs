use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::registry::PairId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorAlert {
    /// No source is active and no cooldown has expired.
    CatalogExhausted { symbol: String, at_ms: u64 },
    /// A validation sweep could not confirm some pairs.
    ValidationFailures {
        sweep: &'static str,
        pairs: Vec<(PairId, String)>,
        at_ms: u64,
    },
}

/// Operator channel. Every alert is logged; when a receiver is attached it is
/// also forwarded without blocking.
#[derive(Clone, Default)]
pub struct AlertSink {
    tx: Option<mpsc::Sender<OperatorAlert>>,
}

impl AlertSink {
    pub fn new(tx: mpsc::Sender<OperatorAlert>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OperatorAlert>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Log-only sink.
    pub fn log_only() -> Self {
        Self::default()
    }

    pub fn raise(&self, alert: OperatorAlert) {
        match &alert {
            OperatorAlert::CatalogExhausted { symbol, at_ms } => {
                error!(target: "operator", %symbol, at_ms, "source catalog exhausted");
            }
            OperatorAlert::ValidationFailures { sweep, pairs, .. } => {
                let list = pairs
                    .iter()
                    .map(|(p, why)| format!("{p}: {why}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                error!(target: "operator", sweep, failed = pairs.len(), pairs = %list, "validation sweep failures");
            }
        }

        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(alert) {
                warn!(error = %e, "operator alert channel full or closed; alert dropped");
            }
        }
    }
}
