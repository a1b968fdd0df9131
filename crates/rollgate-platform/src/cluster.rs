//! Provider for serving installations on user-owned clusters.
//!
//! The serving API surface is the same as the hosted platform's, but the
//! endpoint and its CA certificate must first be resolved from the cluster
//! control-plane API. Tests (and non-TLS setups) can bypass resolution with
//! an explicit serving endpoint.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

use crate::client::ApiClient;
use crate::provider::{LoggingFields, PlatformError, PlatformProvider};
use crate::service::Service;

const CONTROL_PLANE_ENDPOINT: &str = "https://container.googleapis.com";
const SERVING_API: &str = "apis/serving.knative.dev/v1";

/// Connection options for a cluster provider.
#[derive(Debug, Clone, Default)]
pub struct ClusterOptions {
    /// Control-plane API base override (cluster lookup), mainly for tests.
    pub control_plane_endpoint: Option<String>,
    /// Skip endpoint resolution and talk to this serving endpoint directly.
    pub serving_endpoint: Option<String>,
    pub auth_token: Option<String>,
}

/// A client to the serving API of one cluster.
#[derive(Debug)]
pub struct ClusterProvider {
    client: ApiClient,
    project: String,
    location: String,
    cluster_name: String,
}

impl ClusterProvider {
    /// Resolve the cluster's endpoint and build a client for its serving API.
    pub async fn connect(
        project: impl Into<String>,
        location: impl Into<String>,
        cluster_name: impl Into<String>,
        options: &ClusterOptions,
    ) -> Result<Self, PlatformError> {
        let project = project.into();
        let location = location.into();
        let cluster_name = cluster_name.into();

        let client = match &options.serving_endpoint {
            Some(endpoint) => ApiClient::new(endpoint, options.auth_token.clone())?,
            None => {
                resolve_serving_client(&project, &location, &cluster_name, options).await?
            }
        };

        Ok(ClusterProvider {
            client,
            project,
            location,
            cluster_name,
        })
    }
}

#[async_trait]
impl PlatformProvider for ClusterProvider {
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
            cluster = %self.cluster_name,
            namespace,
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
            location: format!("{}/{}", self.location, self.cluster_name),
        }
    }
}

/// Look the cluster up on the control-plane API and build a TLS client
/// trusting its CA.
async fn resolve_serving_client(
    project: &str,
    location: &str,
    cluster_name: &str,
    options: &ClusterOptions,
) -> Result<ApiClient, PlatformError> {
    let control_plane = options
        .control_plane_endpoint
        .clone()
        .unwrap_or_else(|| CONTROL_PLANE_ENDPOINT.to_string());
    let lookup = ApiClient::new(&control_plane, options.auth_token.clone())?;

    let path = format!("v1/projects/{project}/zones/{location}/clusters/{cluster_name}");
    let cluster: ClusterInfo = lookup.get_json(&path, &[]).await?;
    if cluster.endpoint.is_empty() {
        return Err(PlatformError::Cluster(format!(
            "cluster {cluster_name} has no endpoint"
        )));
    }
    debug!(cluster = %cluster_name, endpoint = %cluster.endpoint, "resolved cluster endpoint");

    let mut builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(30));
    if let Some(auth) = &cluster.master_auth {
        if !auth.cluster_ca_certificate.is_empty() {
            let pem = base64::engine::general_purpose::STANDARD
                .decode(&auth.cluster_ca_certificate)
                .map_err(|e| {
                    PlatformError::Cluster(format!("invalid cluster CA certificate: {e}"))
                })?;
            let cert = reqwest::Certificate::from_pem(&pem)?;
            builder = builder.add_root_certificate(cert);
        }
    }
    let http = builder.build()?;

    let endpoint = format!("https://{}", cluster.endpoint);
    Ok(ApiClient::new(&endpoint, options.auth_token.clone())?.with_http(http))
}

#[derive(Debug, Default, Deserialize)]
struct ListServicesResponse {
    #[serde(default)]
    items: Vec<Service>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterInfo {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    master_auth: Option<MasterAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterAuth {
    #[serde(default)]
    cluster_ca_certificate: String,
}
