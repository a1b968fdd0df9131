//! rollgated — progressive delivery daemon library.
//!
//! The binary wires these pieces together; they live in a library crate so
//! integration tests can drive the trigger router and the tick runner
//! directly.

pub mod discovery;
pub mod notify;
pub mod runner;
pub mod server;

use std::sync::Arc;

use rollgate_config::Config;
use rollgate_platform::RegionCache;

use notify::WebhookNotifier;

/// Shared state for ticks: configuration, the process-wide region cache and
/// the optional event sink.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub regions: Arc<RegionCache>,
    pub notifier: Option<Arc<WebhookNotifier>>,
}

impl AppState {
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let notifier = match &config.notification {
            Some(notification) => Some(Arc::new(WebhookNotifier::new(
                notification.webhook_url.clone(),
            )?)),
            None => None,
        };
        Ok(AppState {
            config: Arc::new(config),
            regions: Arc::new(RegionCache::new()),
            notifier,
        })
    }
}
