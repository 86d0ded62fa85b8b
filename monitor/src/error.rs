use thiserror::Error;

/// Failure taxonomy of the detection pipeline.
///
/// Every variant is scoped to one symbol or one pair; only `CatalogExhausted`
/// concerns the whole process and is escalated to the operator channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// Every eligible source failed for this symbol (after retries).
    #[error("no source could serve {symbol}: {reason}")]
    SourceUnavailable { symbol: String, reason: String },

    /// The symbol does not resolve upstream; not the source's fault.
    #[error("ticker {symbol} not found by source {source_id}")]
    TickerNotFound { symbol: String, source_id: String },

    #[error("cannot convert {symbol}: {reason}")]
    ConversionError { symbol: String, reason: String },

    #[error("invalid price {price} for {symbol}")]
    InvalidQuote { symbol: String, price: f64 },

    #[error("quotes {gap_ms}ms apart exceed staleness window of {window_ms}ms")]
    StaleQuote { gap_ms: u64, window_ms: u64 },

    #[error("quote for {got} does not belong to pair leg {expected}")]
    QuoteMismatch { expected: String, got: String },

    /// No source is active and no cooldown has expired.
    #[error("source catalog exhausted while polling {symbol}")]
    CatalogExhausted { symbol: String },
}

impl MonitorError {
    /// True when the failure says the ticker itself is unusable
    /// (as opposed to a source or timing problem).
    pub fn is_unresolved_ticker(&self) -> bool {
        matches!(
            self,
            MonitorError::TickerNotFound { .. } | MonitorError::InvalidQuote { .. }
        )
    }

    /// True when no source could answer at all.
    pub fn is_source_side(&self) -> bool {
        matches!(
            self,
            MonitorError::SourceUnavailable { .. } | MonitorError::CatalogExhausted { .. }
        )
    }
}
