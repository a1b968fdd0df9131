//! Time-series monitoring backend.
//!
//! Queries the monitoring API's `timeSeries` listing with an aggregation over
//! the lookback window: latency uses the percentile aligner/reducer pair,
//! request count sums deltas, and error rate groups deltas by response-code
//! class and takes the 5xx share.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::provider::{AlignReduce, MetricsError, MetricsProvider};

const DEFAULT_ENDPOINT: &str = "https://monitoring.googleapis.com";

/// Metric type names differ between the hosted platform and cluster serving.
#[derive(Debug, Clone, Copy)]
struct MetricKinds {
    latencies: &'static str,
    count: &'static str,
}

const HOSTED_KINDS: MetricKinds = MetricKinds {
    latencies: "run.googleapis.com/request_latencies",
    count: "run.googleapis.com/request_count",
};

const CLUSTER_KINDS: MetricKinds = MetricKinds {
    latencies: "knative.dev/serving/revision/request_latencies",
    count: "knative.dev/serving/revision/request_count",
};

/// Connection options for the time-series backend.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesOptions {
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
}

/// A time-series metrics provider scoped to one service.
pub struct TimeSeriesProvider {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    project: String,
    kinds: MetricKinds,
    /// Label filters identifying the resource, in insertion order.
    filters: Vec<(String, String)>,
}

impl TimeSeriesProvider {
    /// A provider scoped to a service on the hosted platform.
    pub fn new(
        project: impl Into<String>,
        region: &str,
        service: &str,
        options: &TimeSeriesOptions,
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
        Ok(TimeSeriesProvider {
            http,
            base,
            token: options.auth_token.clone(),
            project: project.into(),
            kinds: HOSTED_KINDS,
            filters: vec![
                ("resource.labels.location".into(), region.into()),
                ("resource.labels.service_name".into(), service.into()),
            ],
        })
    }

    /// Switch the scope to cluster serving metrics.
    pub fn on_cluster(mut self, namespace: &str, cluster_name: &str) -> Self {
        self.kinds = CLUSTER_KINDS;
        self.filters
            .push(("resource.labels.namespace_name".into(), namespace.into()));
        self.filters
            .push(("resource.labels.cluster_name".into(), cluster_name.into()));
        self
    }

    /// Render the filter string for a query on `metric_type`.
    fn filter(&self, metric_type: &str) -> String {
        let mut parts = vec![format!(
            "resource.labels.project_id={:?}",
            self.project
        )];
        parts.extend(
            self.filters
                .iter()
                .map(|(key, value)| format!("{key}={value:?}")),
        );
        parts.push(format!("metric.type={metric_type:?}"));
        parts.join(" AND ")
    }

    async fn list_time_series(
        &self,
        filter: &str,
        offset: Duration,
        aligner: &str,
        group_by: &str,
        reducer: &str,
    ) -> Result<Vec<TimeSeries>, MetricsError> {
        let end = Utc::now();
        let start = end - chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::zero());
        let alignment_period = format!("{}s", offset.as_secs());

        let path = format!("v3/projects/{}/timeSeries", self.project);
        let url = self.base.join(&path)?;

        debug!(filter, aligner, reducer, "querying time series");
        let mut req = self.http.get(url).query(&[
            ("filter", filter),
            (
                "interval.startTime",
                &start.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
            (
                "interval.endTime",
                &end.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
            ("aggregation.alignmentPeriod", &alignment_period),
            ("aggregation.perSeriesAligner", aligner),
            ("aggregation.groupByFields", group_by),
            ("aggregation.crossSeriesReducer", reducer),
        ]);
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
        let body: ListTimeSeriesResponse = response.json().await?;
        if let Some(error) = body.execution_errors.first() {
            return Err(MetricsError::Execution(error.message.clone()));
        }
        Ok(body.time_series)
    }
}

#[async_trait]
impl MetricsProvider for TimeSeriesProvider {
    fn scope_to_revision(&mut self, revision: &str) {
        self.filters
            .push(("resource.labels.revision_name".into(), revision.into()));
    }

    async fn latency(
        &self,
        offset: Duration,
        align_reduce: AlignReduce,
    ) -> Result<f64, MetricsError> {
        let series = self
            .list_time_series(
                &self.filter(self.kinds.latencies),
                offset,
                align_reduce.aligner(),
                "resource.labels.service_name",
                align_reduce.reducer(),
            )
            .await?;

        // No series means no request during the window.
        let Some(series) = series.first() else {
            return Ok(0.0);
        };
        // The aggregation collapses the window into a single point.
        let point = series.points.first().ok_or(MetricsError::NoDataPoint)?;
        point
            .value
            .double_value
            .ok_or_else(|| MetricsError::Malformed("latency point has no double value".into()))
    }

    async fn error_rate(&self, offset: Duration) -> Result<f64, MetricsError> {
        let series = self
            .list_time_series(
                &self.filter(self.kinds.count),
                offset,
                "ALIGN_DELTA",
                "metric.labels.response_code_class",
                "REDUCE_SUM",
            )
            .await?;
        if series.is_empty() {
            return Ok(0.0);
        }

        let mut errors: i64 = 0;
        let mut others: i64 = 0;
        for entry in &series {
            let point = entry.points.first().ok_or(MetricsError::NoDataPoint)?;
            let count = point.value.int64()?;
            match entry.metric.labels.get("response_code_class").map(String::as_str) {
                Some("5xx") => errors += count,
                _ => others += count,
            }
        }

        let total = errors + others;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(errors as f64 / total as f64)
    }

    async fn request_count(&self, offset: Duration) -> Result<i64, MetricsError> {
        let series = self
            .list_time_series(
                &self.filter(self.kinds.count),
                offset,
                "ALIGN_DELTA",
                "resource.labels.service_name",
                "REDUCE_SUM",
            )
            .await?;

        let Some(series) = series.first() else {
            return Ok(0);
        };
        let point = series.points.first().ok_or(MetricsError::NoDataPoint)?;
        point.value.int64()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTimeSeriesResponse {
    #[serde(default)]
    time_series: Vec<TimeSeries>,
    #[serde(default)]
    execution_errors: Vec<ExecutionError>,
}

#[derive(Debug, Deserialize)]
struct ExecutionError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct TimeSeries {
    #[serde(default)]
    metric: Metric,
    #[serde(default)]
    points: Vec<Point>,
}

#[derive(Debug, Default, Deserialize)]
struct Metric {
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct Point {
    #[serde(default)]
    value: TypedValue,
}

/// The API encodes int64 values as JSON strings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypedValue {
    int64_value: Option<String>,
    double_value: Option<f64>,
}

impl TypedValue {
    fn int64(&self) -> Result<i64, MetricsError> {
        let raw = self
            .int64_value
            .as_deref()
            .ok_or_else(|| MetricsError::Malformed("point has no int64 value".into()))?;
        raw.parse::<i64>()
            .map_err(|e| MetricsError::Malformed(format!("bad int64 value {raw:?}: {e}")))
    }
}
