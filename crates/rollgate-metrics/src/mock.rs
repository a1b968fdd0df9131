//! Canned metrics provider for tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{AlignReduce, MetricsError, MetricsProvider};

/// A metrics provider returning fixed values.
#[derive(Debug, Clone)]
pub struct MockMetrics {
    pub latency_ms: f64,
    /// Fraction in [0, 1], like the real backends.
    pub error_rate: f64,
    pub request_count: i64,
    fail: bool,
    /// The revision the engine scoped this provider to, if any.
    pub scoped_revision: Option<String>,
}

impl Default for MockMetrics {
    fn default() -> Self {
        MockMetrics {
            latency_ms: 500.0,
            error_rate: 0.01,
            request_count: 1000,
            fail: false,
            scoped_revision: None,
        }
    }
}

impl MockMetrics {
    /// Values comfortably inside the usual test criteria
    /// (latency-p99 ≤ 750, error-rate ≤ 5%).
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = error_rate;
        self
    }

    pub fn with_request_count(mut self, request_count: i64) -> Self {
        self.request_count = request_count;
        self
    }

    /// Make every call fail.
    pub fn failing() -> Self {
        MockMetrics {
            fail: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), MetricsError> {
        if self.fail {
            return Err(MetricsError::Api {
                status: 500,
                message: "mock metrics failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsProvider for MockMetrics {
    fn scope_to_revision(&mut self, revision: &str) {
        self.scoped_revision = Some(revision.to_string());
    }

    async fn latency(
        &self,
        _offset: Duration,
        _align_reduce: AlignReduce,
    ) -> Result<f64, MetricsError> {
        self.check()?;
        Ok(self.latency_ms)
    }

    async fn error_rate(&self, _offset: Duration) -> Result<f64, MetricsError> {
        self.check()?;
        Ok(self.error_rate)
    }

    async fn request_count(&self, _offset: Duration) -> Result<i64, MetricsError> {
        self.check()?;
        Ok(self.request_count)
    }
}
