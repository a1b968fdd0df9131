//! In-memory platform provider for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::provider::{LoggingFields, PlatformError, PlatformProvider};
use crate::service::Service;

/// A fake platform holding services in memory.
///
/// `replace_service` records the submitted object so tests can assert on the
/// exact spec and annotations the engine committed.
#[derive(Debug, Default)]
pub struct MockPlatform {
    services: Mutex<Vec<Service>>,
    replaced: Mutex<Vec<Service>>,
    fail_replace: bool,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services(services: Vec<Service>) -> Self {
        MockPlatform {
            services: Mutex::new(services),
            ..MockPlatform::default()
        }
    }

    /// Make every `replace_service` call fail.
    pub fn failing_replace(mut self) -> Self {
        self.fail_replace = true;
        self
    }

    /// The most recent service submitted through `replace_service`.
    pub fn last_replaced(&self) -> Option<Service> {
        self.replaced.lock().unwrap().last().cloned()
    }

    /// How many times `replace_service` was called.
    pub fn replace_count(&self) -> usize {
        self.replaced.lock().unwrap().len()
    }
}

#[async_trait]
impl PlatformProvider for MockPlatform {
    async fn list_services(
        &self,
        _namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, PlatformError> {
        let services = self.services.lock().unwrap();
        Ok(services
            .iter()
            .filter(|svc| matches_selector(svc, label_selector))
            .cloned()
            .collect())
    }

    async fn replace_service(
        &self,
        _namespace: &str,
        _service_id: &str,
        service: Service,
    ) -> Result<Service, PlatformError> {
        if self.fail_replace {
            return Err(PlatformError::Api {
                status: 500,
                message: "mock replace failure".into(),
            });
        }
        self.replaced.lock().unwrap().push(service.clone());
        Ok(service)
    }

    fn logging_fields(&self) -> LoggingFields {
        LoggingFields {
            project: "mock".into(),
            location: "mock".into(),
        }
    }
}

/// Match a `key=value` selector against the service labels. An empty selector
/// matches everything.
fn matches_selector(svc: &Service, selector: &str) -> bool {
    if selector.is_empty() {
        return true;
    }
    match selector.split_once('=') {
        Some((key, value)) => svc
            .metadata
            .labels
            .get(key.trim())
            .is_some_and(|v| v == value.trim()),
        None => false,
    }
}
