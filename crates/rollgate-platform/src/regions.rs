//! Process-wide cache of the regions a project supports.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::provider::PlatformError;

/// Lazily filled `project → regions` map.
///
/// The lock is held across the fetch, so concurrent first lookups for a
/// project collapse into a single API call; later lookups hit the cache.
/// Region sets change rarely enough that entries live for the process.
#[derive(Debug, Default)]
pub struct RegionCache {
    inner: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

impl RegionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached regions for `project`, fetching them on first use.
    ///
    /// A failed fetch leaves the cache empty so the next tick retries.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        project: &str,
        fetch: F,
    ) -> Result<Arc<Vec<String>>, PlatformError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>, PlatformError>>,
    {
        let mut cache = self.inner.lock().await;
        if let Some(regions) = cache.get(project) {
            debug!(project, "using cached regions");
            return Ok(regions.clone());
        }

        let regions = Arc::new(fetch().await?);
        cache.insert(project.to_string(), regions.clone());
        Ok(regions)
    }
}
