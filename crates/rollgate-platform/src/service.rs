//! The revisioned service object, as exchanged with the serving API.
//!
//! Field names follow the platform's camelCase JSON. Every struct carries a
//! flattened `extra` map so fields the engine does not model (container
//! template, conditions, ...) survive a read-modify-replace cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A revisioned serverless service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: ServiceSpec,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Object metadata. Annotations are the engine's only persistent state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The desired state: the traffic assignment the engine rewrites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traffic: Vec<TrafficTarget>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The observed state reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traffic: Vec<TrafficTarget>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_ready_revision_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One entry of a traffic assignment: a share of requests routed to a
/// revision (or to whatever is latest), optionally carrying a tag that yields
/// an addressable subdomain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTarget {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision_name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub latest_revision: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub percent: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

fn is_zero(percent: &i64) -> bool {
    *percent == 0
}

impl TrafficTarget {
    /// A target routing `percent` of requests to a named revision.
    pub fn new(revision: impl Into<String>, percent: i64, tag: impl Into<String>) -> Self {
        TrafficTarget {
            revision_name: revision.into(),
            percent,
            tag: tag.into(),
            ..TrafficTarget::default()
        }
    }

    /// A tagged target pinned to the latest ready revision.
    pub fn latest(tag: impl Into<String>) -> Self {
        TrafficTarget {
            latest_revision: true,
            tag: tag.into(),
            ..TrafficTarget::default()
        }
    }
}

impl Service {
    /// The annotation value for `key`, if present.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.annotations.insert(key.into(), value.into());
    }

    pub fn remove_annotation(&mut self, key: &str) {
        self.metadata.annotations.remove(key);
    }

    /// The revision carrying `tag` in the desired traffic assignment.
    pub fn spec_revision_with_tag(&self, tag: &str) -> Option<&str> {
        self.spec
            .traffic
            .iter()
            .find(|t| t.tag == tag)
            .map(|t| t.revision_name.as_str())
    }
}
