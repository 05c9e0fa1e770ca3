//! Push notification delivery to devices

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::deploy::job::DeploymentJob;
use crate::errors::CoreError;
use crate::registry::device::Device;

/// Payload pushed to a device's notification address
#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub job_id: String,
    pub artifact_id: String,
}

/// Delivery seam for deployment signals.
///
/// A failed delivery means the device is unreachable for this job; the
/// orchestrator treats that as terminal for the job, never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, device: &Device, job: &DeploymentJob) -> Result<(), CoreError>;
}

/// HTTP push notifier
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    pub fn new() -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, device: &Device, job: &DeploymentJob) -> Result<(), CoreError> {
        let address = device.push_address.as_deref().ok_or_else(|| {
            CoreError::Unreachable(format!("device {} has no push channel", device.id))
        })?;

        let url = Url::parse(address).map_err(|e| {
            CoreError::Unreachable(format!("device {} push address is invalid: {}", device.id, e))
        })?;

        debug!("Pushing job {} to device {} at {}", job.job_id, device.id, url);

        let payload = PushPayload {
            job_id: job.job_id.clone(),
            artifact_id: job.artifact_id.clone(),
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                CoreError::Unreachable(format!("push to device {} failed: {}", device.id, e))
            })?;

        if !response.status().is_success() {
            return Err(CoreError::Unreachable(format!(
                "device {} rejected push: {}",
                device.id,
                response.status()
            )));
        }

        Ok(())
    }
}
