//! rollgate-rollout — the rollout decision engine.
//!
//! One [`Rollout`] manages one service for one tick: it detects the stable
//! and candidate revisions from the observed traffic assignment, diagnoses
//! the candidate's health, rewrites the desired traffic (advance, promote or
//! roll back), updates the rollout annotations and commits everything in a
//! single replace. All state lives on the service object itself, so the
//! engine can be restarted at any instant.

mod engine;
pub mod events;
mod revision;

pub use engine::{Outcome, Rollout, RolloutError, ServiceRecord};
pub use events::{EventKind, RolloutEvent};
pub use revision::{
    detect_candidate, detect_stable, Candidate, CANDIDATE_REVISION_ANNOTATION, CANDIDATE_TAG,
    LAST_FAILED_CANDIDATE_REVISION_ANNOTATION, LATEST_TAG, STABLE_REVISION_ANNOTATION, STABLE_TAG,
};
