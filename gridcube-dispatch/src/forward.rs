use std::time::Duration;

use async_trait::async_trait;
use gridcube_core::{DeviceAddress, Reading};
use serde::Serialize;
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("downstream rejected reading with status {0}")]
    Rejected(u16),
}

/// Downstream consumer of decoded readings.
#[async_trait]
pub trait Forwarder: Send + Sync + 'static {
    async fn forward(&self, device: &DeviceAddress, reading: &Reading) -> Result<(), ForwardError>;
}

#[derive(Debug, Serialize)]
struct ForwardBody<'a> {
    device_id: String,
    reading: &'a Reading,
}

/// Posts each reading as JSON to a fixed URL.
pub struct HttpForwarder {
    client: reqwest::Client,
    url: String,
}

impl HttpForwarder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    #[instrument(skip(self, reading), fields(device_id = %device))]
    async fn forward(&self, device: &DeviceAddress, reading: &Reading) -> Result<(), ForwardError> {
        let body = ForwardBody {
            device_id: device.to_string(),
            reading,
        };

        let resp = self.client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ForwardError::Rejected(status.as_u16()));
        }

        debug!(reading_id = %reading.id.0, "Reading forwarded");
        Ok(())
    }
}
