use std::sync::Arc;

use gridcube_core::protocol::AckFrame;
use gridcube_core::{
    AckFields, DecodeError, DeviceAddress, GpsTime, Reading, Uplink, WirelessDeviceId, decode,
};
use jiff::Timestamp;
use tracing::{debug, info, instrument, warn};

use crate::forward::Forwarder;
use crate::resolver::DeviceAddressResolver;
use crate::source::RawUplink;
use crate::storage::Storage;
use crate::transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to store reading: {0}")]
    Storage(String),
}

/// A stored reading and the device form it was keyed under.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedUplink {
    pub device: DeviceAddress,
    pub reading: Reading,
}

/// Turns raw uplink frames into stored readings.
///
/// Decoding is pure. Everything around it (the transport ack, ack
/// correlation, device state, forwarding) goes through injected ports, and
/// only a failed decode or a failed reading write fails the call.
pub struct UplinkProcessor<S, T> {
    storage: S,
    transport: T,
    resolver: DeviceAddressResolver<S>,
    forwarder: Option<Arc<dyn Forwarder>>,
}

impl<S: Clone, T: Clone> Clone for UplinkProcessor<S, T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            transport: self.transport.clone(),
            resolver: self.resolver.clone(),
            forwarder: self.forwarder.clone(),
        }
    }
}

impl<S: Storage, T: Transport> UplinkProcessor<S, T> {
    pub fn new(storage: S, transport: T) -> Self {
        Self {
            resolver: DeviceAddressResolver::new(storage.clone()),
            storage,
            transport,
            forwarder: None,
        }
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    #[instrument(skip(self, payload), fields(wireless_id = %wireless_id, len = payload.len()))]
    pub async fn process(
        &self,
        wireless_id: WirelessDeviceId,
        payload: &[u8],
    ) -> Result<ProcessedUplink, UplinkError> {
        let uplink = decode(payload).inspect_err(|e| {
            warn!(error = %e, "Dropping undecodable uplink");
        })?;
        let reading = Reading::new(wireless_id, uplink);

        self.send_transport_ack(&reading).await;

        if let Uplink::EventAcknowledgment {
            event_type,
            gps_time,
        } = reading.uplink
        {
            self.correlate_ack(wireless_id, event_type, gps_time, reading.received_at)
                .await;
        }

        match self
            .storage
            .update_device_info(&wireless_id, &reading.uplink, reading.received_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("Uplink from unregistered device"),
            Err(e) => warn!(error = %e, "Failed to update device info"),
        }

        let device = self.resolver.public_for(wireless_id).await;
        self.storage
            .store_reading(&device, reading.clone())
            .await
            .map_err(|e| UplinkError::Storage(e.to_string()))?;

        info!(
            device_id = %device,
            packet_type = ?reading.packet_type(),
            reading_id = %reading.id.0,
            "Stored reading"
        );

        if let Some(forwarder) = &self.forwarder {
            if let Err(e) = forwarder.forward(&device, &reading).await {
                warn!(error = %e, device_id = %device, "Failed to forward reading");
            }
        }

        Ok(ProcessedUplink { device, reading })
    }

    /// Processes frames one after another. A failure affects only its own
    /// entry in the result.
    pub async fn process_batch(
        &self,
        frames: Vec<RawUplink>,
    ) -> Vec<Result<ProcessedUplink, UplinkError>> {
        let mut results = Vec::with_capacity(frames.len());
        for frame in frames {
            results.push(self.process(frame.wireless_id, &frame.payload).await);
        }
        results
    }

    async fn send_transport_ack(&self, reading: &Reading) {
        let kind = reading.packet_type().ack_kind();
        let (Some(kind), Some(msg_num)) = (kind, reading.uplink.msg_num()) else {
            return;
        };

        let frame = AckFrame::new(kind, msg_num).to_bytes();
        if let Err(e) = self.transport.send(&reading.device, &frame).await {
            warn!(error = %e, msg_num, ack_kind = ?kind, "Failed to send transport ack");
        }
    }

    async fn correlate_ack(
        &self,
        wireless_id: WirelessDeviceId,
        event_type: u8,
        gps_time: GpsTime,
        at: Timestamp,
    ) {
        match AckFields::from_event_ack(event_type, gps_time) {
            Ok(fields) => {
                debug!(command_type = ?fields.command_type, %gps_time, "Command acknowledged")
            }
            Err(e) => {
                warn!(error = %e, %gps_time, "Acknowledgment names an unknown command type")
            }
        }

        match self.storage.acknowledge(&wireless_id, gps_time, at).await {
            Ok(Some(event_id)) => info!(event_id = %event_id, %gps_time, "Event acknowledged"),
            Ok(None) => warn!(%gps_time, "Acknowledgment matched no pending event"),
            Err(e) => warn!(error = %e, %gps_time, "Failed to record acknowledgment"),
        }
    }
}
