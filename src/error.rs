use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("no market data available for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("insufficient history to train {model}: at least {required} days required, got {actual}")]
    InsufficientHistory {
        model: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("{model} model is not trained; call train() first")]
    ModelNotTrained { model: &'static str },

    #[error("invalid forecast horizon {horizon}: allowed range is 7-30 days")]
    InvalidHorizon { horizon: usize },

    #[error("model artifact error: {0}")]
    Artifact(String),

    #[error("cache entry unreadable: {0}")]
    CacheRead(String),
}

impl ForecastError {
    /// Errors caused by the request itself rather than by the engine.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            ForecastError::InsufficientHistory { .. }
                | ForecastError::ModelNotTrained { .. }
                | ForecastError::InvalidHorizon { .. }
        )
    }
}

pub type ForecastResult<T> = std::result::Result<T, ForecastError>;

/// Failure of a single market data provider. Never leaves the fallback chain.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(String),

    /// Connection or timeout failure; the request may succeed if repeated.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("no rows returned for {0}")]
    Empty(String),
}

impl ProviderError {
    /// Only transport failures, throttling (429) and server errors (5xx) are
    /// worth another attempt. Client errors and bad payloads are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            ProviderError::Http(_) | ProviderError::Payload(_) | ProviderError::Empty(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProviderError::Transport(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Status {
                status: status.as_u16(),
                detail: err.to_string(),
            }
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Payload(err.to_string())
    }
}
