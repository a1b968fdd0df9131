//! Resolving targets into concrete services.
//!
//! A target selects services by label across a project's regions (hosted) or
//! inside one cluster. Regions of the same target are fetched in parallel;
//! the first failure cancels its siblings and becomes the target's error.

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, warn};

use rollgate_config::{ClusterConfig, Platform, Target};
use rollgate_platform::cluster::{ClusterOptions, ClusterProvider};
use rollgate_platform::hosted::{self, HostedOptions, HostedProvider};
use rollgate_platform::PlatformProvider;
use rollgate_rollout::ServiceRecord;

use crate::AppState;

/// A discovered service plus the cluster block of the target that produced
/// it, which the metrics provider needs for scoping.
pub struct Discovered {
    pub record: ServiceRecord,
    pub cluster: Option<ClusterConfig>,
}

/// Resolve one target into service records.
pub async fn discover_target(
    state: &AppState,
    target: &Target,
) -> anyhow::Result<Vec<Discovered>> {
    match target.platform {
        Platform::Hosted => discover_hosted(state, target).await,
        Platform::Cluster => discover_cluster(target).await,
    }
}

async fn discover_hosted(state: &AppState, target: &Target) -> anyhow::Result<Vec<Discovered>> {
    let options = HostedOptions {
        endpoint: target.endpoint.clone(),
        auth_token: target.auth_token.clone(),
    };

    let regions = if target.regions.is_empty() {
        debug!(project = %target.project, "querying the platform for all regions");
        let fetch_options = options.clone();
        let project = target.project.clone();
        state
            .regions
            .get_or_fetch(&target.project, || async move {
                hosted::list_regions(&project, &fetch_options).await
            })
            .await
            .context("cannot determine regions")?
            .to_vec()
    } else {
        debug!(project = %target.project, "using the configured region list");
        target.regions.clone()
    };

    // First failing region cancels the remaining fetches of this target.
    let fetches = regions.iter().map(|region| {
        let options = options.clone();
        async move {
            let provider = HostedProvider::new(&target.project, region, &options)?;
            let services = provider
                .list_services(&target.project, &target.label_selector)
                .await?;
            debug!(region = %region, n = services.len(), "fetched services");

            let provider: Arc<dyn PlatformProvider> = Arc::new(provider);
            Ok::<_, anyhow::Error>(
                services
                    .into_iter()
                    .map(|service| Discovered {
                        record: ServiceRecord {
                            service,
                            project: target.project.clone(),
                            region: region.clone(),
                            namespace: target.project.clone(),
                            provider: provider.clone(),
                        },
                        cluster: None,
                    })
                    .collect::<Vec<_>>(),
            )
        }
    });

    let per_region = futures::future::try_join_all(fetches)
        .await
        .with_context(|| format!("failed to get services for project {:?}", target.project))?;
    Ok(per_region.into_iter().flatten().collect())
}

async fn discover_cluster(target: &Target) -> anyhow::Result<Vec<Discovered>> {
    // Validation guarantees the block exists for cluster targets.
    let cluster = target
        .cluster
        .as_ref()
        .context("cluster target without a cluster block")?;

    let options = ClusterOptions {
        serving_endpoint: target.endpoint.clone(),
        auth_token: target.auth_token.clone(),
        ..ClusterOptions::default()
    };
    let provider =
        ClusterProvider::connect(&target.project, &cluster.location, &cluster.name, &options)
            .await
            .with_context(|| format!("failed to connect to cluster {:?}", cluster.name))?;

    debug!(
        cluster = %cluster.name,
        namespace = %cluster.namespace,
        "querying for services on the cluster"
    );
    let services = provider
        .list_services(&cluster.namespace, &target.label_selector)
        .await
        .with_context(|| {
            format!(
                "failed to get services with label {:?}",
                target.label_selector
            )
        })?;
    if services.is_empty() {
        warn!(cluster = %cluster.name, "no service matched the label selector");
    }

    let provider: Arc<dyn PlatformProvider> = Arc::new(provider);
    Ok(services
        .into_iter()
        .map(|service| Discovered {
            record: ServiceRecord {
                service,
                project: target.project.clone(),
                region: cluster.location.clone(),
                namespace: cluster.namespace.clone(),
                provider: provider.clone(),
            },
            cluster: Some(cluster.clone()),
        })
        .collect())
}
