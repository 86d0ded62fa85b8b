use thiserror::Error;

/// Failure of a single adapter request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    /// HTTP 429 or 5xx.
    #[error("throttled or server error (status {0})")]
    Throttled(u16),

    /// Any other non-success status; retrying will not help.
    #[error("request rejected (status {0})")]
    Rejected(u16),

    #[error("symbol {symbol} not found")]
    NotFound { symbol: String },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Worth retrying against the same source.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout | FetchError::Connection(_) | FetchError::Throttled(_)
        )
    }

    /// Counts against the source's reliability. A missing ticker is not the
    /// source's fault.
    pub fn penalizes_source(&self) -> bool {
        !matches!(self, FetchError::NotFound { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            if status.as_u16() == 429 || status.is_server_error() {
                FetchError::Throttled(status.as_u16())
            } else {
                FetchError::Rejected(status.as_u16())
            }
        } else {
            FetchError::Connection(e.to_string())
        }
    }
}
