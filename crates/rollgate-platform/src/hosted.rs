//! Provider for the fully managed serving platform.
//!
//! The managed platform is addressed through a regional endpoint
//! (`https://{region}-run.googleapis.com`) and uses the project as the
//! namespace. Region discovery goes through the global endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::client::ApiClient;
use crate::provider::{LoggingFields, PlatformError, PlatformProvider};
use crate::service::Service;

const GLOBAL_ENDPOINT: &str = "https://run.googleapis.com";
const SERVING_API: &str = "apis/serving.knative.dev/v1";

/// Connection options for the hosted platform.
///
/// `endpoint` overrides the regional endpoint entirely; tests point it at a
/// local stub.
#[derive(Debug, Clone, Default)]
pub struct HostedOptions {
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
}

/// A client to one region of the hosted platform.
pub struct HostedProvider {
    client: ApiClient,
    project: String,
    region: String,
}

impl HostedProvider {
    pub fn new(
        project: impl Into<String>,
        region: impl Into<String>,
        options: &HostedOptions,
    ) -> Result<Self, PlatformError> {
        let region = region.into();
        let endpoint = match &options.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{region}-run.googleapis.com"),
        };
        Ok(HostedProvider {
            client: ApiClient::new(&endpoint, options.auth_token.clone())?,
            project: project.into(),
            region,
        })
    }
}

#[async_trait]
impl PlatformProvider for HostedProvider {
    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, PlatformError> {
        let path = format!("{SERVING_API}/namespaces/{namespace}/services");
        let response: ListServicesResponse = self
            .client
            .get_json(&path, &[("labelSelector", label_selector)])
            .await?;
        debug!(
            region = %self.region,
            label_selector,
            n = response.items.len(),
            "listed services"
        );
        Ok(response.items)
    }

    async fn replace_service(
        &self,
        namespace: &str,
        service_id: &str,
        service: Service,
    ) -> Result<Service, PlatformError> {
        let path = format!("{SERVING_API}/namespaces/{namespace}/services/{service_id}");
        self.client.put_json(&path, &service).await
    }

    fn logging_fields(&self) -> LoggingFields {
        LoggingFields {
            project: self.project.clone(),
            location: self.region.clone(),
        }
    }
}

/// List the regions the hosted platform supports for a project.
///
/// Callers are expected to go through [`crate::RegionCache`] rather than
/// hitting the API on every tick.
pub async fn list_regions(
    project: &str,
    options: &HostedOptions,
) -> Result<Vec<String>, PlatformError> {
    let endpoint = options
        .endpoint
        .clone()
        .unwrap_or_else(|| GLOBAL_ENDPOINT.to_string());
    let client = ApiClient::new(&endpoint, options.auth_token.clone())?;

    let path = format!("v1/projects/{project}/locations");
    let response: LocationsResponse = client.get_json(&path, &[]).await?;
    debug!(project, n = response.locations.len(), "listed regions");
    Ok(response
        .locations
        .into_iter()
        .map(|l| l.location_id)
        .collect())
}

#[derive(Debug, Default, Deserialize)]
struct ListServicesResponse {
    #[serde(default)]
    items: Vec<Service>,
}

#[derive(Debug, Default, Deserialize)]
struct LocationsResponse {
    #[serde(default)]
    locations: Vec<Location>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    location_id: String,
}
