use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use super::types::{PriceLookup, SecuritiesEnvelope};
use crate::registry::InstrumentKind;
use crate::sources::{FetchError, RawQuote, SourceAdapter};
use crate::time::now_ms;

const STOCK_BOARD: &str = "engines/stock/markets/shares/boards/TQBR/securities";
const FUTURES_BOARD: &str = "engines/futures/markets/forts/boards/RFUD/securities";

/// Moscow Exchange ISS adapter.
///
/// Cash legs are read from the TQBR board, derivatives from RFUD.
#[derive(Clone)]
pub struct MoexIssClient {
    id: String,
    http: Client,
    url: String,
}

impl MoexIssClient {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            id: id.into(),
            http,
            url: url.into().trim_end_matches('/').to_string(),
        })
    }

    fn security_url(&self, symbol: &str, kind: InstrumentKind) -> String {
        let board = match kind {
            InstrumentKind::Cash => STOCK_BOARD,
            InstrumentKind::Derivative => FUTURES_BOARD,
        };
        format!("{}/{}/{}.json", self.url, board, symbol)
    }
}

#[async_trait]
impl SourceAdapter for MoexIssClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(source = %self.id), level = "debug")]
    async fn fetch(&self, symbol: &str, kind: InstrumentKind) -> Result<RawQuote, FetchError> {
        let resp = self
            .http
            .get(self.security_url(symbol, kind))
            .query(&[
                ("iss.meta", "off"),
                ("iss.only", "securities"),
                ("securities.columns", "SECID,LAST,PREVPRICE"),
            ])
            .send()
            .await?;

        if let Some(err) = status_error(resp.status(), symbol) {
            return Err(err);
        }

        let envelope: SecuritiesEnvelope = resp
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        let price = match envelope
            .securities
            .price_of(symbol)
            .map_err(FetchError::Malformed)?
        {
            PriceLookup::Price(p) => p,
            PriceLookup::Missing => {
                return Err(FetchError::NotFound {
                    symbol: symbol.to_string(),
                });
            }
            // listed but not priced; rejected downstream as an invalid quote
            PriceLookup::NoPrice => f64::NAN,
        };

        debug!(price, "moex quote fetched");

        Ok(RawQuote {
            price,
            observed_at_ms: now_ms(),
        })
    }
}

fn status_error(status: StatusCode, symbol: &str) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status == StatusCode::NOT_FOUND {
        Some(FetchError::NotFound {
            symbol: symbol.to_string(),
        })
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(FetchError::Throttled(status.as_u16()))
    } else {
        Some(FetchError::Rejected(status.as_u16()))
    }
}
