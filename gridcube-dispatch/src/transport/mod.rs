pub mod http;
pub mod mock;

use async_trait::async_trait;
use gridcube_core::WirelessDeviceId;

pub use http::HttpTransport;
pub use mock::MockTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway rejected frame with status {0}")]
    Rejected(u16),
    #[error("device {0} is unreachable")]
    Unreachable(WirelessDeviceId),
}

/// Outbound path to devices on the wireless network.
///
/// `Ok` means the wireless layer accepted the frame for transmission. It says
/// nothing about delivery; that is what command acknowledgments are for.
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    async fn send(&self, device: &WirelessDeviceId, frame: &[u8]) -> Result<(), TransportError>;
}
