//! The per-service rollout state machine.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use rollgate_config::{Criterion, Strategy};
use rollgate_health::{
    collect_metrics, diagnose, report::string_report, Diagnosis, DiagnosisResult, HealthError,
};
use rollgate_metrics::MetricsProvider;
use rollgate_platform::{PlatformError, PlatformProvider, Service, TrafficTarget};

use crate::events::{tagged_url, EventKind, RolloutEvent};
use crate::revision::{
    detect_candidate, detect_stable, CANDIDATE_REVISION_ANNOTATION, CANDIDATE_TAG,
    LAST_FAILED_CANDIDATE_REVISION_ANNOTATION, LATEST_TAG, STABLE_REVISION_ANNOTATION, STABLE_TAG,
};

/// A discovered service together with where it lives and the provider that
/// can commit changes to it.
#[derive(Clone)]
pub struct ServiceRecord {
    pub service: Service,
    pub project: String,
    pub region: String,
    /// Namespace for API calls: the project on the hosted platform, the
    /// configured namespace on clusters.
    pub namespace: String,
    pub provider: Arc<dyn PlatformProvider>,
}

/// Why a rollout tick failed.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("failed to diagnose candidate health: {0}")]
    Health(#[from] HealthError),

    #[error("could not update service {service:?}: {source}")]
    Commit {
        service: String,
        #[source]
        source: PlatformError,
    },
}

/// The result of one tick for one service.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Whether a replace was committed.
    pub changed: bool,
    /// The committed traffic change, when one happened.
    pub event: Option<RolloutEvent>,
}

/// What the tick decided to do, once a stable and candidate exist.
enum Action {
    Advance,
    Rollback,
    Hold,
}

/// Manages the rollout of a single service for a single tick.
pub struct Rollout {
    platform: Arc<dyn PlatformProvider>,
    metrics: Box<dyn MetricsProvider>,
    strategy: Strategy,
    namespace: String,
}

impl Rollout {
    pub fn new(
        platform: Arc<dyn PlatformProvider>,
        metrics: Box<dyn MetricsProvider>,
        namespace: impl Into<String>,
        strategy: Strategy,
    ) -> Self {
        Rollout {
            platform,
            metrics,
            strategy,
            namespace: namespace.into(),
        }
    }

    /// Perform at most one rollout transition on the service.
    ///
    /// Commits at most one replace; noop paths commit nothing and are not
    /// errors.
    pub async fn rollout(&mut self, mut svc: Service) -> Result<Outcome, RolloutError> {
        let name = svc.metadata.name.clone();

        let Some(stable) = detect_stable(&svc) else {
            info!(service = %name, "could not determine stable revision");
            return Ok(Outcome::default());
        };
        debug!(service = %name, stable = %stable, "detected stable revision");

        let Some(candidate) = detect_candidate(&svc, &stable) else {
            info!(service = %name, "could not determine candidate revision");
            return Ok(Outcome::default());
        };
        debug!(
            service = %name,
            candidate = %candidate.name,
            is_new = candidate.is_new,
            "detected candidate revision"
        );

        // A new candidate has no metrics yet: give it its first step without
        // diagnosing.
        let action = if candidate.is_new {
            Action::Advance
        } else {
            let diagnosis = self.diagnose_candidate(&name, &candidate.name).await?;
            match diagnosis.overall {
                DiagnosisResult::Healthy => Action::Advance,
                DiagnosisResult::Unhealthy => Action::Rollback,
                DiagnosisResult::Inconclusive => Action::Hold,
                // diagnose_candidate surfaces Unknown as an error.
                DiagnosisResult::Unknown => unreachable!("unknown diagnosis is an error"),
            }
        };

        let event = match action {
            Action::Hold => {
                debug!(
                    service = %name,
                    "not enough requests to determine health, holding the rollout"
                );
                return Ok(Outcome::default());
            }
            Action::Advance => {
                let (percent, promoted) = self.roll_forward(&mut svc, &stable, &candidate.name);
                self.update_annotations(
                    &mut svc,
                    &stable,
                    &candidate.name,
                    if promoted {
                        AnnotationUpdate::Promote
                    } else {
                        AnnotationUpdate::Advance
                    },
                );
                RolloutEvent {
                    event: EventKind::Rollout,
                    service: name.clone(),
                    candidate_revision_name: candidate.name.clone(),
                    candidate_revision_percent: percent,
                    candidate_revision_url: tagged_url(
                        &svc.status.url,
                        if promoted { STABLE_TAG } else { CANDIDATE_TAG },
                    ),
                    candidate_was_promoted: promoted,
                }
            }
            Action::Rollback => {
                self.roll_back(&mut svc, &stable, &candidate.name);
                self.update_annotations(
                    &mut svc,
                    &stable,
                    &candidate.name,
                    AnnotationUpdate::Rollback,
                );
                RolloutEvent {
                    event: EventKind::Rollback,
                    service: name.clone(),
                    candidate_revision_name: candidate.name.clone(),
                    candidate_revision_percent: 0,
                    candidate_revision_url: None,
                    candidate_was_promoted: false,
                }
            }
        };

        self.platform
            .replace_service(&self.namespace, &name, svc)
            .await
            .map_err(|source| RolloutError::Commit {
                service: name.clone(),
                source,
            })?;
        debug!(service = %name, "service successfully updated");

        Ok(Outcome {
            changed: true,
            event: Some(event),
        })
    }

    /// Collect metrics for the candidate and reduce them to a diagnosis.
    ///
    /// A configured request-count criterion acts purely as a minimum-traffic
    /// gate: below it, health is inconclusive no matter what the other
    /// criteria say. The remaining criteria decide healthy/unhealthy; with
    /// none of them configured the candidate's health is unknown, which is an
    /// error rather than a pass.
    async fn diagnose_candidate(
        &mut self,
        service: &str,
        candidate: &str,
    ) -> Result<Diagnosis, RolloutError> {
        self.metrics.scope_to_revision(candidate);

        let offset = self.strategy.health_offset();
        let criteria = self.strategy.criteria.clone();
        let values = collect_metrics(self.metrics.as_ref(), offset, &criteria).await?;

        for (criterion, &actual) in criteria.iter().zip(&values) {
            if criterion.is_request_count() && actual < criterion.threshold() {
                info!(
                    service,
                    candidate,
                    requests = actual,
                    minimum = criterion.threshold(),
                    "too few requests to diagnose the candidate"
                );
                return Ok(Diagnosis::overall(DiagnosisResult::Inconclusive));
            }
        }

        let (health_criteria, health_values): (Vec<Criterion>, Vec<f64>) = criteria
            .iter()
            .zip(&values)
            .filter(|(criterion, _)| !criterion.is_request_count())
            .map(|(criterion, &value)| (criterion.clone(), value))
            .unzip();

        let diagnosis = diagnose(&health_criteria, &health_values)?;
        debug!(
            service,
            candidate,
            report = %string_report(&health_criteria, &diagnosis),
            "diagnosed candidate"
        );
        Ok(diagnosis)
    }

    /// Rewrite the traffic assignment one step forward.
    ///
    /// Returns the candidate's new percent and whether it was promoted. A
    /// candidate that already held 100% for a full interval replaces the
    /// stable target outright.
    fn roll_forward(&self, svc: &mut Service, stable: &str, candidate: &str) -> (i64, bool) {
        let (percent, promote) = self.next_candidate_percent(svc, candidate);

        let mut traffic = Vec::new();
        if promote {
            info!(candidate, "will make the candidate revision stable");
            traffic.push(TrafficTarget::new(candidate, 100, STABLE_TAG));
        } else {
            info!(
                stable,
                candidate,
                stable_percent = 100 - percent,
                candidate_percent = percent,
                "splitting traffic"
            );
            traffic.push(TrafficTarget::new(stable, 100 - percent, STABLE_TAG));
            traffic.push(TrafficTarget::new(candidate, percent, CANDIDATE_TAG));
        }
        traffic.push(TrafficTarget::latest(LATEST_TAG));
        traffic.extend(user_defined_targets(&svc.spec.traffic));

        svc.spec.traffic = traffic;
        (if promote { 100 } else { percent }, promote)
    }

    /// Send all traffic back to the stable revision.
    fn roll_back(&self, svc: &mut Service, stable: &str, candidate: &str) {
        warn!(
            stable,
            candidate, "candidate did not meet health criteria, rolling back"
        );

        let mut traffic = vec![TrafficTarget::new(stable, 100, STABLE_TAG)];
        traffic.push(TrafficTarget::latest(LATEST_TAG));
        traffic.extend(user_defined_targets(&svc.spec.traffic));

        svc.spec.traffic = traffic;
    }

    /// The candidate's next traffic share.
    ///
    /// The share only counts while the candidate is actually serving
    /// (observed percent > 0); otherwise the rollout (re)starts at the first
    /// step. When no step exceeds the current share the candidate has held
    /// 100% for a full interval and is ready to become stable.
    fn next_candidate_percent(&self, svc: &Service, candidate: &str) -> (i64, bool) {
        let current = svc
            .status
            .traffic
            .iter()
            .find(|t| t.revision_name == candidate && t.percent > 0)
            .map(|t| t.percent);

        match current {
            None => (self.strategy.steps[0], false),
            Some(current) => {
                let next = self
                    .strategy
                    .steps
                    .iter()
                    .copied()
                    .find(|&step| step > current)
                    .unwrap_or(100);
                (next, next == current)
            }
        }
    }

    /// Keep the rollout state on the service, in the same commit as the
    /// traffic change.
    fn update_annotations(
        &self,
        svc: &mut Service,
        stable: &str,
        candidate: &str,
        update: AnnotationUpdate,
    ) {
        match update {
            AnnotationUpdate::Promote => {
                // Clearing quarantine is only safe when a different revision
                // got promoted; the quarantined one must stay blocked.
                if svc.annotation(LAST_FAILED_CANDIDATE_REVISION_ANNOTATION) != Some(candidate) {
                    svc.remove_annotation(LAST_FAILED_CANDIDATE_REVISION_ANNOTATION);
                }
                svc.set_annotation(STABLE_REVISION_ANNOTATION, candidate);
                svc.remove_annotation(CANDIDATE_REVISION_ANNOTATION);
            }
            AnnotationUpdate::Advance => {
                svc.set_annotation(STABLE_REVISION_ANNOTATION, stable);
                svc.set_annotation(CANDIDATE_REVISION_ANNOTATION, candidate);
            }
            AnnotationUpdate::Rollback => {
                svc.set_annotation(STABLE_REVISION_ANNOTATION, stable);
                svc.set_annotation(LAST_FAILED_CANDIDATE_REVISION_ANNOTATION, candidate);
                svc.remove_annotation(CANDIDATE_REVISION_ANNOTATION);
            }
        }
    }
}

enum AnnotationUpdate {
    Advance,
    Promote,
    Rollback,
}

/// Targets carrying tags introduced by the user out of band.
///
/// They ride along every rewrite unserved: the tag keeps resolving, but
/// traffic is reassigned from scratch between stable and candidate.
fn user_defined_targets(traffic: &[TrafficTarget]) -> Vec<TrafficTarget> {
    traffic
        .iter()
        .filter(|t| {
            !t.tag.is_empty()
                && !t.latest_revision
                && t.tag != STABLE_TAG
                && t.tag != CANDIDATE_TAG
                && t.tag != LATEST_TAG
        })
        .map(|t| TrafficTarget {
            percent: 0,
            ..t.clone()
        })
        .collect()
}
