pub mod error;
pub mod gate;
pub mod model;
pub mod moex;
pub mod pool;

use async_trait::async_trait;

use crate::registry::InstrumentKind;

pub use error::FetchError;
pub use model::{Source, SourceStatus};
pub use pool::SourcePool;

/// Price as returned by an adapter, before it is attributed to a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawQuote {
    pub price: f64,
    pub observed_at_ms: u64,
}

/// One upstream market-data provider.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn endpoint(&self) -> &str;

    async fn fetch(&self, symbol: &str, kind: InstrumentKind) -> Result<RawQuote, FetchError>;
}
