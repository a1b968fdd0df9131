//! One tick: discover targeted services and roll each of them out.

use anyhow::Context;
use tracing::{debug, info, warn};

use rollgate_config::{MetricsConfig, Strategy};
use rollgate_metrics::sheet::SheetOptions;
use rollgate_metrics::timeseries::TimeSeriesOptions;
use rollgate_metrics::{MetricsProvider, SheetProvider, TimeSeriesProvider};
use rollgate_rollout::Rollout;

use crate::discovery::{self, Discovered};
use crate::AppState;

/// Run one rollout pass over every targeted service.
///
/// Target discovery failures and per-service rollout failures are collected;
/// neither stops the remaining work.
pub async fn run_rollouts(state: &AppState, strategy: &Strategy) -> Vec<anyhow::Error> {
    let mut errs = Vec::new();

    let mut discovered = Vec::new();
    for target in &state.config.targets {
        match discovery::discover_target(state, target).await {
            Ok(services) => discovered.extend(services),
            Err(err) => errs.push(err.context("failed to get targeted services")),
        }
    }
    if discovered.is_empty() && errs.is_empty() {
        warn!("no service matches the targets");
    }

    let mut handles = Vec::new();
    for service in discovered {
        let state = state.clone();
        let strategy = strategy.clone();
        handles.push(tokio::spawn(async move {
            handle_rollout(&state, service, strategy).await
        }));
    }

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => errs.push(err),
            Err(err) => errs.push(anyhow::Error::new(err).context("rollout task panicked")),
        }
    }

    errs
}

/// Manage the rollout process for a single service.
async fn handle_rollout(
    state: &AppState,
    discovered: Discovered,
    strategy: Strategy,
) -> anyhow::Result<()> {
    let record = discovered.record;
    let name = record.service.metadata.name.clone();
    let fields = record.provider.logging_fields();

    let metrics = build_metrics_provider(state, &record, discovered.cluster.as_ref(), &name)
        .with_context(|| format!("failed to initialize metrics provider for {name:?}"))?;

    let mut rollout = Rollout::new(
        record.provider.clone(),
        metrics,
        record.namespace.clone(),
        strategy,
    );
    let outcome = rollout
        .rollout(record.service)
        .await
        .with_context(|| format!("rollout failed for service {name:?}"))?;

    if outcome.changed {
        info!(
            service = %name,
            project = %fields.project,
            location = %fields.location,
            "service was successfully updated"
        );
    } else {
        debug!(service = %name, "service kept unchanged");
    }

    if let (Some(notifier), Some(event)) = (&state.notifier, &outcome.event) {
        notifier.send(event).await;
    }

    Ok(())
}

/// Build the configured metrics backend, scoped to the discovered service.
fn build_metrics_provider(
    state: &AppState,
    record: &rollgate_rollout::ServiceRecord,
    cluster: Option<&rollgate_config::ClusterConfig>,
    service_name: &str,
) -> anyhow::Result<Box<dyn MetricsProvider>> {
    match &state.config.metrics {
        MetricsConfig::TimeSeries {
            endpoint,
            auth_token,
        } => {
            let options = TimeSeriesOptions {
                endpoint: endpoint.clone(),
                auth_token: auth_token.clone(),
            };
            let mut provider =
                TimeSeriesProvider::new(&record.project, &record.region, service_name, &options)?;
            if let Some(cluster) = cluster {
                provider = provider.on_cluster(&cluster.namespace, &cluster.name);
            }
            Ok(Box::new(provider))
        }
        MetricsConfig::Sheet {
            sheet_id,
            sheet_name,
            endpoint,
            auth_token,
        } => {
            let options = SheetOptions {
                endpoint: endpoint.clone(),
                auth_token: auth_token.clone(),
            };
            let provider = SheetProvider::new(
                sheet_id,
                sheet_name.clone(),
                &record.region,
                service_name,
                &options,
            )?;
            Ok(Box::new(provider))
        }
    }
}

/// Join collected errors for the trigger response body, one numbered line
/// per error.
pub fn errs_to_string(errs: &[anyhow::Error]) -> String {
    errs.iter()
        .enumerate()
        .map(|(i, err)| format!("[error#{i}] {err:#}"))
        .collect::<Vec<_>>()
        .join("\n")
}
