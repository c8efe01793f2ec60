pub mod simulated;

use async_trait::async_trait;
use gridcube_core::WirelessDeviceId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use simulated::SimulatedSource;

/// An undecoded uplink frame as delivered by the wireless network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUplink {
    pub wireless_id: WirelessDeviceId,
    pub payload: Vec<u8>,
}

/// Producer of raw uplink frames.
///
/// Implementations spawn background tasks that feed an mpsc channel. The
/// receiver is returned from `start`; the tasks stop once the token is
/// cancelled or the receiver is dropped.
#[async_trait]
pub trait UplinkSource: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawUplink>, Self::Error>;
}
