use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gridcube_core::WirelessDeviceId;
use serde::Serialize;
use tracing::{debug, instrument};

use super::{Transport, TransportError};

#[derive(Debug, Serialize)]
struct DownlinkBody<'a> {
    wireless_device_id: &'a WirelessDeviceId,
    payload_data: String,
}

/// Posts frames to the wireless gateway as base64 JSON.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    gateway_url: String,
}

impl HttpTransport {
    pub fn new(gateway_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            gateway_url: gateway_url.into(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, frame), fields(len = frame.len()))]
    async fn send(&self, device: &WirelessDeviceId, frame: &[u8]) -> Result<(), TransportError> {
        let body = DownlinkBody {
            wireless_device_id: device,
            payload_data: STANDARD.encode(frame),
        };

        let resp = self.client.post(&self.gateway_url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Rejected(status.as_u16()));
        }

        debug!(wireless_id = %device, "Frame accepted by gateway");
        Ok(())
    }
}
