//! rollgate-health — candidate health diagnosis.
//!
//! Collects one measurement per configured criterion and reduces them to a
//! diagnosis: `Healthy` when every criterion is met, `Unhealthy` when any is
//! missed, `Inconclusive` when the candidate saw too little traffic to judge,
//! and `Unknown` when no judgment was possible at all. Unknown means missing
//! or inconsistent criteria and is always surfaced as an error, never as
//! health.

pub mod report;

use std::time::Duration;

use thiserror::Error;

use rollgate_config::Criterion;
use rollgate_metrics::{percentile_to_align_reduce, MetricsError, MetricsProvider};

/// Why a diagnosis could not be produced.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("no health criteria configured")]
    NoCriteria,

    #[error("criteria and collected values disagree: {criteria} criteria, {values} values")]
    CriteriaMismatch { criteria: usize, values: usize },

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Overall verdict on a candidate revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisResult {
    Unknown,
    Inconclusive,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for DiagnosisResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiagnosisResult::Unknown => "unknown",
            DiagnosisResult::Inconclusive => "inconclusive",
            DiagnosisResult::Healthy => "healthy",
            DiagnosisResult::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// One criterion's outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub threshold: f64,
    pub actual: f64,
    pub met: bool,
}

/// The verdict plus the per-criterion evidence behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub overall: DiagnosisResult,
    pub results: Vec<CheckResult>,
}

impl Diagnosis {
    /// A diagnosis with no evidence, for the gated and unknown cases.
    pub fn overall(overall: DiagnosisResult) -> Self {
        Diagnosis {
            overall,
            results: Vec::new(),
        }
    }
}

/// Evaluate criteria against already-collected values.
///
/// Values must align index-for-index with the criteria. Each criterion is an
/// upper bound: it is met when the actual value does not exceed the
/// threshold.
pub fn diagnose(criteria: &[Criterion], values: &[f64]) -> Result<Diagnosis, HealthError> {
    if criteria.is_empty() {
        return Err(HealthError::NoCriteria);
    }
    if criteria.len() != values.len() {
        return Err(HealthError::CriteriaMismatch {
            criteria: criteria.len(),
            values: values.len(),
        });
    }

    let mut healthy = true;
    let mut results = Vec::with_capacity(criteria.len());
    for (criterion, &actual) in criteria.iter().zip(values) {
        let threshold = criterion.threshold();
        let met = actual <= threshold;
        if !met {
            healthy = false;
        }
        results.push(CheckResult {
            threshold,
            actual,
            met,
        });
    }

    Ok(Diagnosis {
        overall: if healthy {
            DiagnosisResult::Healthy
        } else {
            DiagnosisResult::Unhealthy
        },
        results,
    })
}

/// Collect one value per criterion from the metrics backend.
///
/// Latency is queried at the configured percentile; error rate is converted
/// from a fraction to a percentage so it compares against the configured
/// threshold; request count is returned as-is for the minimum-traffic gate.
pub async fn collect_metrics(
    provider: &dyn MetricsProvider,
    offset: Duration,
    criteria: &[Criterion],
) -> Result<Vec<f64>, HealthError> {
    let mut values = Vec::with_capacity(criteria.len());
    for criterion in criteria {
        let value = match criterion {
            Criterion::RequestLatency { percentile, .. } => {
                let align_reduce = percentile_to_align_reduce(*percentile)?;
                provider.latency(offset, align_reduce).await?
            }
            Criterion::ErrorRate { .. } => provider.error_rate(offset).await? * 100.0,
            Criterion::RequestCount { .. } => provider.request_count(offset).await? as f64,
        };
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use rollgate_metrics::mock::MockMetrics;

    use super::*;

    fn latency_p99(threshold: f64) -> Criterion {
        Criterion::RequestLatency {
            percentile: 99.0,
            threshold,
        }
    }

    #[test]
    fn healthy_when_every_criterion_met() {
        let criteria = [latency_p99(750.0), Criterion::ErrorRate { threshold: 5.0 }];
        let diagnosis = diagnose(&criteria, &[500.0, 1.0]).unwrap();

        assert_eq!(diagnosis.overall, DiagnosisResult::Healthy);
        assert_eq!(
            diagnosis.results,
            vec![
                CheckResult {
                    threshold: 750.0,
                    actual: 500.0,
                    met: true
                },
                CheckResult {
                    threshold: 5.0,
                    actual: 1.0,
                    met: true
                },
            ]
        );
    }

    #[test]
    fn thresholds_are_inclusive() {
        let criteria = [latency_p99(500.0), Criterion::ErrorRate { threshold: 1.0 }];
        let diagnosis = diagnose(&criteria, &[500.0, 1.0]).unwrap();
        assert_eq!(diagnosis.overall, DiagnosisResult::Healthy);
    }

    #[test]
    fn one_missed_criterion_makes_it_unhealthy() {
        let criteria = [latency_p99(499.0), Criterion::ErrorRate { threshold: 5.0 }];
        let diagnosis = diagnose(&criteria, &[500.0, 1.0]).unwrap();

        assert_eq!(diagnosis.overall, DiagnosisResult::Unhealthy);
        assert!(!diagnosis.results[0].met);
        assert!(diagnosis.results[1].met);
    }

    #[test]
    fn empty_criteria_is_an_error() {
        assert!(matches!(diagnose(&[], &[]), Err(HealthError::NoCriteria)));
    }

    #[test]
    fn mismatched_lengths_are_an_error() {
        let criteria = [latency_p99(750.0)];
        assert!(matches!(
            diagnose(&criteria, &[1.0, 2.0]),
            Err(HealthError::CriteriaMismatch {
                criteria: 1,
                values: 2
            })
        ));
    }

    #[tokio::test]
    async fn collect_translates_each_criterion() {
        let provider = MockMetrics::healthy()
            .with_latency(321.0)
            .with_error_rate(0.015)
            .with_request_count(800);
        let criteria = [
            latency_p99(750.0),
            Criterion::ErrorRate { threshold: 5.0 },
            Criterion::RequestCount { threshold: 1000.0 },
        ];

        let values = collect_metrics(&provider, Duration::from_secs(600), &criteria)
            .await
            .unwrap();
        // Error rate is reported as a percentage.
        assert_eq!(values, vec![321.0, 1.5, 800.0]);
    }

    #[tokio::test]
    async fn collect_rejects_unsupported_percentiles() {
        let provider = MockMetrics::healthy();
        let criteria = [Criterion::RequestLatency {
            percentile: 80.0,
            threshold: 100.0,
        }];

        let err = collect_metrics(&provider, Duration::from_secs(60), &criteria)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HealthError::Metrics(MetricsError::InvalidPercentile(p)) if p == 80.0
        ));
    }

    #[tokio::test]
    async fn collect_propagates_backend_failures() {
        let provider = MockMetrics::failing();
        let criteria = [latency_p99(750.0)];

        let err = collect_metrics(&provider, Duration::from_secs(60), &criteria)
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::Metrics(_)));
    }
}
