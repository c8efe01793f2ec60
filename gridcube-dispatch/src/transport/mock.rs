use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use gridcube_core::protocol::ACK_FRAME_MARKER;
use gridcube_core::{PacketType, WirelessDeviceId, decode_ack_fields};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Transport, TransportError};
use crate::source::RawUplink;

/// In-process transport that records every accepted frame.
///
/// Devices can be marked unreachable to exercise failure paths. With an echo
/// channel attached, each command frame is answered with the
/// EventAcknowledgment uplink a real device would send.
#[derive(Clone, Default)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<(WirelessDeviceId, Vec<u8>)>>>,
    unreachable: Arc<Mutex<HashSet<WirelessDeviceId>>>,
    echo: Option<mpsc::Sender<RawUplink>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_echo(echo: mpsc::Sender<RawUplink>) -> Self {
        Self {
            echo: Some(echo),
            ..Self::default()
        }
    }

    pub fn set_unreachable(&self, device: WirelessDeviceId) {
        self.unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device);
    }

    /// Frames accepted so far, in send order.
    pub fn sent(&self) -> Vec<(WirelessDeviceId, Vec<u8>)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_to(&self, device: &WirelessDeviceId) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter(|(d, _)| d == device)
            .map(|(_, frame)| frame)
            .collect()
    }

    fn echo_ack(&self, device: &WirelessDeviceId, frame: &[u8]) {
        let Some(echo) = &self.echo else {
            return;
        };
        if frame.first() == Some(&ACK_FRAME_MARKER) {
            return;
        }

        let fields = match decode_ack_fields(frame) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(error = %e, "Cannot echo acknowledgment for malformed frame");
                return;
            }
        };

        let mut payload = vec![
            PacketType::EventAcknowledgment as u8,
            fields.command_type as u8,
        ];
        payload.extend_from_slice(&fields.gps_time.0.to_le_bytes());

        if echo
            .try_send(RawUplink {
                wireless_id: *device,
                payload,
            })
            .is_err()
        {
            debug!(wireless_id = %device, "Echo channel full or closed, dropping acknowledgment");
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, device: &WirelessDeviceId, frame: &[u8]) -> Result<(), TransportError> {
        let unreachable = self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(device);
        if unreachable {
            return Err(TransportError::Unreachable(*device));
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((*device, frame.to_vec()));

        self.echo_ack(device, frame);
        Ok(())
    }
}
