//! The capability set the rollout engine consumes from a serving platform.

use async_trait::async_trait;
use thiserror::Error;

use crate::service::Service;

/// Errors from platform API calls.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("platform API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("cluster connection error: {0}")]
    Cluster(String),
}

/// Log context identifying where a provider points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingFields {
    pub project: String,
    /// Region for the hosted platform, cluster location for clusters.
    pub location: String,
}

/// A client to one regional (or one cluster's) serving API.
#[async_trait]
pub trait PlatformProvider: Send + Sync {
    /// List the services in `namespace` matching a label selector.
    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, PlatformError>;

    /// Replace a service definition, returning the stored object.
    async fn replace_service(
        &self,
        namespace: &str,
        service_id: &str,
        service: Service,
    ) -> Result<Service, PlatformError>;

    /// Fields identifying this provider in logs.
    fn logging_fields(&self) -> LoggingFields;
}
