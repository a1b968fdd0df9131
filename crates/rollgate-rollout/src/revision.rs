//! Stable and candidate revision detection.

use rollgate_platform::Service;

// Tags the engine owns. Everything else is user-defined and preserved.
pub const STABLE_TAG: &str = "stable";
pub const CANDIDATE_TAG: &str = "candidate";
pub const LATEST_TAG: &str = "latest";

// Annotations carrying the rollout state between ticks.
pub const STABLE_REVISION_ANNOTATION: &str = "rollgate.dev/stableRevision";
pub const CANDIDATE_REVISION_ANNOTATION: &str = "rollgate.dev/candidateRevision";
pub const LAST_FAILED_CANDIDATE_REVISION_ANNOTATION: &str =
    "rollgate.dev/lastFailedCandidateRevision";

/// A candidate revision and whether it differs from the previous rollout's.
///
/// A new candidate has served no traffic yet, so it cannot be diagnosed; the
/// engine gives it the first step without looking at metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub is_new: bool,
}

/// Determine the stable revision of a service.
///
/// The revision tagged `stable` in the desired traffic is the declared
/// stable. If a different revision is observed holding 100% of the traffic
/// (deployments done out of band, without holding traffic back), the traffic
/// holder wins: reality overrides the tag.
pub fn detect_stable(svc: &Service) -> Option<String> {
    let tagged = svc
        .spec_revision_with_tag(STABLE_TAG)
        .filter(|name| !name.is_empty());
    let holder = full_traffic_holder(svc);

    match (tagged, holder) {
        (None, None) => None,
        (Some(tagged), None) => Some(tagged.to_string()),
        (None, Some(holder)) => Some(holder.to_string()),
        (Some(tagged), Some(holder)) => {
            if holder != tagged {
                Some(holder.to_string())
            } else {
                Some(tagged.to_string())
            }
        }
    }
}

/// Determine the candidate revision, given the stable one.
///
/// The candidate is always the latest ready revision, unless that revision
/// is the stable itself, or it already failed a rollout and sits in
/// quarantine until something newer shows up.
pub fn detect_candidate(svc: &Service, stable: &str) -> Option<Candidate> {
    let latest = svc.status.latest_ready_revision_name.as_str();
    if latest.is_empty() || latest == stable {
        return None;
    }

    if svc.annotation(LAST_FAILED_CANDIDATE_REVISION_ANNOTATION) == Some(latest) {
        return None;
    }

    let previous = svc.spec_revision_with_tag(CANDIDATE_TAG);
    Some(Candidate {
        name: latest.to_string(),
        is_new: previous != Some(latest),
    })
}

/// The revision observed serving 100% of the traffic, if any. A candidate
/// holding 100% during its final step does not count.
fn full_traffic_holder(svc: &Service) -> Option<&str> {
    svc.status
        .traffic
        .iter()
        .find(|t| t.percent == 100 && t.tag != CANDIDATE_TAG && !t.revision_name.is_empty())
        .map(|t| t.revision_name.as_str())
}

#[cfg(test)]
mod tests {
    use rollgate_platform::TrafficTarget;

    use super::*;

    fn service(spec: Vec<TrafficTarget>, status: Vec<TrafficTarget>, latest: &str) -> Service {
        let mut svc = Service::default();
        svc.metadata.name = "hello".into();
        svc.spec.traffic = spec;
        svc.status.traffic = status;
        svc.status.latest_ready_revision_name = latest.into();
        svc
    }

    #[test]
    fn stable_from_tag() {
        let traffic = vec![
            TrafficTarget::new("rev-001", 100, STABLE_TAG),
            TrafficTarget::latest(LATEST_TAG),
        ];
        let svc = service(traffic.clone(), traffic, "rev-001");
        assert_eq!(detect_stable(&svc), Some("rev-001".into()));
    }

    #[test]
    fn stable_from_traffic_share_when_untagged() {
        let traffic = vec![TrafficTarget::new("rev-002", 100, "")];
        let svc = service(traffic.clone(), traffic, "rev-002");
        assert_eq!(detect_stable(&svc), Some("rev-002".into()));
    }

    #[test]
    fn traffic_holder_overrides_the_tag() {
        // A deployment went out without withholding traffic: rev-002 now
        // serves everything while the tag still points at rev-001.
        let traffic = vec![
            TrafficTarget::new("rev-001", 0, STABLE_TAG),
            TrafficTarget::new("rev-002", 100, ""),
        ];
        let svc = service(traffic.clone(), traffic, "rev-003");
        assert_eq!(detect_stable(&svc), Some("rev-002".into()));
    }

    #[test]
    fn candidate_at_full_traffic_is_not_stable() {
        let traffic = vec![
            TrafficTarget::new("rev-001", 0, STABLE_TAG),
            TrafficTarget::new("rev-002", 100, CANDIDATE_TAG),
        ];
        let svc = service(traffic.clone(), traffic, "rev-002");
        assert_eq!(detect_stable(&svc), Some("rev-001".into()));
    }

    #[test]
    fn no_stable_when_traffic_is_split_and_untagged() {
        let traffic = vec![
            TrafficTarget::new("rev-001", 50, ""),
            TrafficTarget::new("rev-002", 50, ""),
        ];
        let svc = service(traffic.clone(), traffic, "rev-002");
        assert_eq!(detect_stable(&svc), None);
    }

    #[test]
    fn latest_ready_becomes_the_candidate() {
        let svc = service(vec![], vec![], "rev-002");
        assert_eq!(
            detect_candidate(&svc, "rev-001"),
            Some(Candidate {
                name: "rev-002".into(),
                is_new: true,
            })
        );
    }

    #[test]
    fn no_candidate_when_latest_is_stable() {
        let svc = service(vec![], vec![], "rev-001");
        assert_eq!(detect_candidate(&svc, "rev-001"), None);
    }

    #[test]
    fn no_candidate_when_latest_is_quarantined() {
        let mut svc = service(vec![], vec![], "rev-002");
        svc.set_annotation(LAST_FAILED_CANDIDATE_REVISION_ANNOTATION, "rev-002");
        assert_eq!(detect_candidate(&svc, "rev-001"), None);
    }

    #[test]
    fn quarantine_releases_for_a_newer_revision() {
        let mut svc = service(vec![], vec![], "rev-003");
        svc.set_annotation(LAST_FAILED_CANDIDATE_REVISION_ANNOTATION, "rev-002");
        assert_eq!(
            detect_candidate(&svc, "rev-001"),
            Some(Candidate {
                name: "rev-003".into(),
                is_new: true,
            })
        );
    }

    #[test]
    fn ongoing_candidate_is_not_new() {
        let traffic = vec![
            TrafficTarget::new("rev-001", 70, STABLE_TAG),
            TrafficTarget::new("rev-002", 30, CANDIDATE_TAG),
        ];
        let svc = service(traffic.clone(), traffic, "rev-002");
        assert_eq!(
            detect_candidate(&svc, "rev-001"),
            Some(Candidate {
                name: "rev-002".into(),
                is_new: false,
            })
        );
    }

    #[test]
    fn replacing_candidate_restarts_as_new() {
        let traffic = vec![
            TrafficTarget::new("rev-001", 70, STABLE_TAG),
            TrafficTarget::new("rev-002", 30, CANDIDATE_TAG),
        ];
        let svc = service(traffic.clone(), traffic, "rev-003");
        assert_eq!(
            detect_candidate(&svc, "rev-001"),
            Some(Candidate {
                name: "rev-003".into(),
                is_new: true,
            })
        );
    }
}
