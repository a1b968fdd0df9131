//! The measurement contract consumed by the health diagnoser.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from metrics backends.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("metrics API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unsupported latency percentile {0} (use 50, 95 or 99)")]
    InvalidPercentile(f64),

    #[error("time series returned no data point")]
    NoDataPoint,

    #[error("query execution error: {0}")]
    Execution(String),

    #[error("no metrics row matches region {region:?} and service {service:?}")]
    RowNotFound { region: String, service: String },

    #[error("malformed metrics value: {0}")]
    Malformed(String),
}

/// Paired per-series aligner and cross-series reducer for a latency
/// percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignReduce {
    Percentile50,
    Percentile95,
    Percentile99,
}

impl AlignReduce {
    pub fn aligner(self) -> &'static str {
        match self {
            AlignReduce::Percentile50 => "ALIGN_PERCENTILE_50",
            AlignReduce::Percentile95 => "ALIGN_PERCENTILE_95",
            AlignReduce::Percentile99 => "ALIGN_PERCENTILE_99",
        }
    }

    pub fn reducer(self) -> &'static str {
        match self {
            AlignReduce::Percentile50 => "REDUCE_PERCENTILE_50",
            AlignReduce::Percentile95 => "REDUCE_PERCENTILE_95",
            AlignReduce::Percentile99 => "REDUCE_PERCENTILE_99",
        }
    }
}

/// Translate a configured percentile into its aligner/reducer pair.
pub fn percentile_to_align_reduce(percentile: f64) -> Result<AlignReduce, MetricsError> {
    match percentile {
        p if p == 50.0 => Ok(AlignReduce::Percentile50),
        p if p == 95.0 => Ok(AlignReduce::Percentile95),
        p if p == 99.0 => Ok(AlignReduce::Percentile99),
        other => Err(MetricsError::InvalidPercentile(other)),
    }
}

/// A metrics backend scoped to one service (and optionally one revision).
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Narrow the query scope to a candidate revision. Backends without
    /// revision granularity ignore this.
    fn scope_to_revision(&mut self, revision: &str);

    /// Latency over the lookback window at the given percentile, in
    /// milliseconds. Zero when no request was served.
    async fn latency(
        &self,
        offset: Duration,
        align_reduce: AlignReduce,
    ) -> Result<f64, MetricsError>;

    /// Server-error rate over the window, as a fraction in [0, 1]. Zero when
    /// no request was served.
    async fn error_rate(&self, offset: Duration) -> Result<f64, MetricsError>;

    /// Number of requests served during the window.
    async fn request_count(&self, offset: Duration) -> Result<i64, MetricsError>;
}
