//! Polling of a Smile gateway

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ha_update_coordinator::{DataUpdateCoordinator, Fetcher, UpdateFailed};
use tracing::debug;

use crate::api::{PlugwiseData, PlugwiseError, SmileApi};
use crate::constants::DOMAIN;

/// Fetches one [`PlugwiseData`] per poll, bounded by the client timeout
pub struct SmileFetcher {
    api: Arc<dyn SmileApi>,
    name: String,
    timeout: Duration,
}

impl SmileFetcher {
    pub fn new(api: Arc<dyn SmileApi>, timeout: Duration) -> Self {
        let name = api.info().name.unwrap_or_else(|| DOMAIN.to_string());
        Self { api, name, timeout }
    }

    pub fn api(&self) -> &Arc<dyn SmileApi> {
        &self.api
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Fetcher for SmileFetcher {
    type Data = PlugwiseData;

    async fn fetch(&self) -> Result<PlugwiseData, UpdateFailed> {
        let data = match tokio::time::timeout(self.timeout, self.api.update()).await {
            Ok(Ok(data)) => data,
            Ok(Err(PlugwiseError::XmlDataMissing)) => {
                return Err(UpdateFailed::data_missing(format!(
                    "No XML data received for: {}",
                    self.name
                )))
            }
            Ok(Err(err)) => {
                return Err(UpdateFailed::new(
                    err.failure_kind(),
                    format!("Update failed for: {}: {}", self.name, err),
                ))
            }
            Err(_) => {
                return Err(UpdateFailed::timeout(format!(
                    "Timeout after {:?} updating {}",
                    self.timeout, self.name
                )))
            }
        };

        debug!(
            smile = %self.name,
            devices = data.devices.len(),
            "Plugwise updated"
        );
        Ok(data)
    }
}

pub type PlugwiseCoordinator = DataUpdateCoordinator<SmileFetcher>;

/// Coordinator named after the Smile, with the integration's cooldown
pub fn new_coordinator(
    api: Arc<dyn SmileApi>,
    timeout: Duration,
    cooldown: Duration,
) -> PlugwiseCoordinator {
    let fetcher = SmileFetcher::new(api, timeout);
    let name = fetcher.name().to_string();
    DataUpdateCoordinator::new(name, fetcher, cooldown)
}
