//! Service registry for integration-provided services

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<(), ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Errors that can occur when working with services
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),
}

/// A call to a registered service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: serde_json::Value,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            data,
        }
    }

    /// Deserialize the call data into the handler's schema type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| ServiceError::InvalidData(e.to_string()))
    }
}

/// Services indexed by "domain.service"
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, ServiceHandler>,
}

fn key(domain: &str, service: &str) -> String {
    format!("{}.{}", domain, service)
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous handler
    #[instrument(skip(self, handler))]
    pub fn register<F, Fut>(&self, domain: &str, service: &str, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        debug!(domain = %domain, service = %service, "Registering service");
        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);
        self.services.insert(key(domain, service), handler);
    }

    /// Call a service and wait for its handler to finish
    #[instrument(skip(self, data))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
    ) -> ServiceResult {
        let handler = self
            .services
            .get(&key(domain, service))
            .map(|h| h.value().clone())
            .ok_or_else(|| {
                warn!(domain = %domain, service = %service, "Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;

        debug!(domain = %domain, service = %service, "Calling service");
        handler(ServiceCall::new(domain, service, data)).await
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&key(domain, service))
    }

    /// Names of the services registered for a domain, sorted
    pub fn domain_services(&self, domain: &str) -> Vec<String> {
        let prefix = format!("{}.", domain);
        let mut services: Vec<String> = self
            .services
            .iter()
            .filter_map(|s| s.key().strip_prefix(&prefix).map(str::to_string))
            .collect();
        services.sort();
        services
    }

    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let removed = self.services.remove(&key(domain, service)).is_some();
        if removed {
            debug!(domain = %domain, service = %service, "Unregistered service");
        }
        removed
    }
}
