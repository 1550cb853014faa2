//! Error type shared by the observers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[cfg(feature = "json")]
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "prometheus")]
    #[error("prometheus error: {0}")]
    Prometheus(#[from] PrometheusError),

    #[cfg(feature = "opentelemetry")]
    #[error("opentelemetry error: {0}")]
    OpenTelemetry(#[from] OtelError),

    #[error("utf8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Reading the data to export failed.
    #[error("store error: {0}")]
    Store(#[from] crate::error::Error),
}

pub type Result<T> = std::result::Result<T, ObserverError>;

#[cfg(feature = "prometheus")]
#[derive(Debug, Error)]
pub enum PrometheusError {
    /// Creating or registering a metric failed.
    #[error("metric error: {0}")]
    MetricError(String),

    #[error("encode error: {0}")]
    EncodeError(String),
}

#[cfg(feature = "prometheus")]
impl From<prometheus::Error> for PrometheusError {
    fn from(err: prometheus::Error) -> Self {
        PrometheusError::MetricError(err.to_string())
    }
}

#[cfg(feature = "prometheus")]
impl From<prometheus::Error> for ObserverError {
    fn from(err: prometheus::Error) -> Self {
        ObserverError::Prometheus(PrometheusError::from(err))
    }
}

#[cfg(feature = "opentelemetry")]
#[derive(Debug, Error)]
pub enum OtelError {
    #[error("metric error: {0}")]
    MetricError(String),
}
