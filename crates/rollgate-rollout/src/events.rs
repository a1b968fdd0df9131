//! Events describing what a rollout tick did, for notification sinks.

use serde::Serialize;
use url::Url;

/// What happened to the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Rollout,
    Rollback,
}

/// A committed traffic change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutEvent {
    pub event: EventKind,
    pub service: String,
    pub candidate_revision_name: String,
    pub candidate_revision_percent: i64,
    /// The candidate's tagged address. Absent after a rollback, when the
    /// candidate no longer has a tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_revision_url: Option<String>,
    pub candidate_was_promoted: bool,
}

/// Derive the address a tag resolves to from the service's base URL.
///
/// Tagged revisions are served on a `{tag}---` prefixed subdomain of the
/// service host.
pub fn tagged_url(service_url: &str, tag: &str) -> Option<String> {
    let mut url = Url::parse(service_url).ok()?;
    let host = url.host_str()?.to_string();
    url.set_host(Some(&format!("{tag}---{host}"))).ok()?;
    Some(url.to_string())
}
