//! Tabular sheet backend.
//!
//! Reads metrics from a spreadsheet where each row, starting at row 2, holds:
//!
//! region, service, request count, error rate, latency p99, latency p95,
//! latency p50
//!
//! e.g. `us-east1, tester, 1000, 0.01, 1000, 750, 500`. The sheet always
//! describes the candidate revision, so revision scoping is a no-op.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::provider::{AlignReduce, MetricsError, MetricsProvider};

const DEFAULT_ENDPOINT: &str = "https://sheets.googleapis.com";

// Column positions within a row.
const COL_REGION: usize = 0;
const COL_SERVICE: usize = 1;
const COL_REQUEST_COUNT: usize = 2;
const COL_ERROR_RATE: usize = 3;
const COL_LATENCY_P99: usize = 4;
const COL_LATENCY_P95: usize = 5;
const COL_LATENCY_P50: usize = 6;

/// Connection options for the sheet backend.
#[derive(Debug, Clone, Default)]
pub struct SheetOptions {
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
}

/// A metrics provider reading one spreadsheet row.
pub struct SheetProvider {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    sheet_id: String,
    sheet_name: Option<String>,
    region: String,
    service: String,
}

impl SheetProvider {
    pub fn new(
        sheet_id: impl Into<String>,
        sheet_name: Option<String>,
        region: impl Into<String>,
        service: impl Into<String>,
        options: &SheetOptions,
    ) -> Result<Self, MetricsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let base = Url::parse(
            options
                .endpoint
                .as_deref()
                .unwrap_or(DEFAULT_ENDPOINT),
        )?;
        Ok(SheetProvider {
            http,
            base,
            token: options.auth_token.clone(),
            sheet_id: sheet_id.into(),
            sheet_name,
            region: region.into(),
            service: service.into(),
        })
    }

    /// Fetch the row matching this provider's region and service.
    async fn service_row(&self) -> Result<Vec<serde_json::Value>, MetricsError> {
        let range = match &self.sheet_name {
            Some(name) => format!("{name}!A2:G"),
            None => "A2:G".to_string(),
        };
        let path = format!("v4/spreadsheets/{}/values/{range}", self.sheet_id);
        let url = self.base.join(&path)?;

        let mut req = self.http.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MetricsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ValueRange = response.json().await?;
        debug!(rows = body.values.len(), "queried sheet rows");

        body.values
            .into_iter()
            .find(|row| {
                cell(row, COL_REGION) == Some(self.region.as_str())
                    && cell(row, COL_SERVICE) == Some(self.service.as_str())
            })
            .ok_or_else(|| MetricsError::RowNotFound {
                region: self.region.clone(),
                service: self.service.clone(),
            })
    }

    fn parse_f64(row: &[serde_json::Value], col: usize, what: &str) -> Result<f64, MetricsError> {
        let raw = cell(row, col)
            .ok_or_else(|| MetricsError::Malformed(format!("{what} cell must be a string")))?;
        raw.parse::<f64>()
            .map_err(|e| MetricsError::Malformed(format!("bad {what} value {raw:?}: {e}")))
    }
}

fn cell(row: &[serde_json::Value], col: usize) -> Option<&str> {
    row.get(col).and_then(serde_json::Value::as_str)
}

#[async_trait]
impl MetricsProvider for SheetProvider {
    fn scope_to_revision(&mut self, _revision: &str) {}

    async fn latency(
        &self,
        _offset: Duration,
        align_reduce: AlignReduce,
    ) -> Result<f64, MetricsError> {
        let row = self.service_row().await?;
        let col = match align_reduce {
            AlignReduce::Percentile99 => COL_LATENCY_P99,
            AlignReduce::Percentile95 => COL_LATENCY_P95,
            AlignReduce::Percentile50 => COL_LATENCY_P50,
        };
        Self::parse_f64(&row, col, "latency")
    }

    async fn error_rate(&self, _offset: Duration) -> Result<f64, MetricsError> {
        let row = self.service_row().await?;
        Self::parse_f64(&row, COL_ERROR_RATE, "error rate")
    }

    async fn request_count(&self, _offset: Duration) -> Result<i64, MetricsError> {
        let row = self.service_row().await?;
        let raw = cell(&row, COL_REQUEST_COUNT)
            .ok_or_else(|| MetricsError::Malformed("request count cell must be a string".into()))?;
        raw.parse::<i64>()
            .map_err(|e| MetricsError::Malformed(format!("bad request count value {raw:?}: {e}")))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}
