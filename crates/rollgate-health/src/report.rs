//! Human-readable diagnosis summaries for the logs.

use rollgate_config::Criterion;

use crate::Diagnosis;

/// Render a diagnosis as a short multi-line report:
///
/// ```text
/// last status: healthy
/// metrics:
/// - request-latency[p99]: 500.00 (threshold 750.00)
/// - request-count: 800 (threshold 1000)
/// ```
///
/// Criteria and results must align index-for-index, as produced by
/// [`crate::diagnose`].
pub fn string_report(criteria: &[Criterion], diagnosis: &Diagnosis) -> String {
    let mut report = format!("last status: {}\nmetrics:", diagnosis.overall);
    for (criterion, result) in criteria.iter().zip(&diagnosis.results) {
        match criterion {
            Criterion::RequestLatency { percentile, .. } => {
                report.push_str(&format!(
                    "\n- {criterion}[p{percentile:.0}]: {:.2} (threshold {:.2})",
                    result.actual, result.threshold
                ));
            }
            Criterion::RequestCount { .. } => {
                report.push_str(&format!(
                    "\n- {criterion}: {:.0} (threshold {:.0})",
                    result.actual, result.threshold
                ));
            }
            Criterion::ErrorRate { .. } => {
                report.push_str(&format!(
                    "\n- {criterion}: {:.2} (threshold {:.2})",
                    result.actual, result.threshold
                ));
            }
        }
    }
    report
}
