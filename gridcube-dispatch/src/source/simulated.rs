use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gridcube_core::time::{DEFAULT_LEAP_SECONDS, to_gps};
use gridcube_core::{DeviceMapping, PacketType, PublicDeviceId, WirelessDeviceId};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::{RawUplink, UplinkSource};

/// Fake GridCube units emitting well-formed uplink frames.
pub struct SimulatedSource {
    reading_interval: Duration,
    info_interval: Duration,
    devices: Arc<Vec<SimulatedDevice>>,
}

impl SimulatedSource {
    pub fn new(device_count: usize, reading_interval_secs: u64, info_interval_secs: u64) -> Self {
        let mut rng = rand::rng();
        let devices = (0..device_count)
            .map(|_| SimulatedDevice::new(rng.random_range(100_000..1_000_000)))
            .collect();

        Self {
            reading_interval: Duration::from_secs(reading_interval_secs),
            info_interval: Duration::from_secs(info_interval_secs),
            devices: Arc::new(devices),
        }
    }

    /// Registration records for the simulated devices.
    ///
    /// These are the devices that produce frames once `start()` is called.
    pub fn device_mappings(&self) -> Vec<DeviceMapping> {
        self.devices
            .iter()
            .map(|d| DeviceMapping {
                public_id: d.public_id.clone(),
                wireless_id: d.wireless_id,
                wireless_arn: None,
                thing_arn: None,
                registered_at: jiff::Timestamp::now(),
            })
            .collect()
    }
}

struct SimulatedDevice {
    public_id: PublicDeviceId,
    wireless_id: WirelessDeviceId,
}

impl SimulatedDevice {
    fn new(serial: u32) -> Self {
        Self {
            public_id: PublicDeviceId::from_serial(serial),
            wireless_id: WirelessDeviceId(Uuid::new_v4()),
        }
    }

    fn metering_frames(&self) -> Vec<Vec<u8>> {
        let mut rng = rand::rng();
        let gps = to_gps(jiff::Timestamp::now(), DEFAULT_LEAP_SECONDS)
            .map(|g| g.0)
            .unwrap_or_default();

        let power: i64 = rng.random_range(0..4_500);
        let energy: i64 = rng.random_range(1_000_000..5_000_000);

        vec![
            metering_frame(PacketType::InstantPower, rng.random(), power, gps),
            metering_frame(PacketType::CumulativeEnergy, rng.random(), energy, gps),
        ]
    }

    fn info_frames(&self) -> Vec<Vec<u8>> {
        let mut rng = rand::rng();
        let gps = to_gps(jiff::Timestamp::now(), DEFAULT_LEAP_SECONDS)
            .map(|g| g.0)
            .unwrap_or_default();

        let mut state = vec![
            PacketType::OperationalState as u8,
            rng.random(),
            rng.random_range(0..4),
        ];
        state.extend_from_slice(&gps.to_be_bytes());

        let mut link = vec![
            PacketType::ConnectionInfo as u8,
            rng.random_range(-110i8..-40) as u8,
            rng.random_range(-5i8..15) as u8,
        ];
        link.extend_from_slice(&rng.random_range(0u32..3).to_le_bytes());

        vec![
            state,
            link,
            text_frame(PacketType::ModelNumber, "GC-2045"),
            text_frame(PacketType::SerialNumber, self.public_id.as_str()),
            text_frame(PacketType::GridcubeFwVersion, "2.4.1"),
        ]
    }
}

fn metering_frame(packet_type: PacketType, msg_num: u8, value: i64, gps: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14);
    frame.push(packet_type as u8);
    frame.push(msg_num);
    frame.extend_from_slice(&value.to_le_bytes());
    frame.extend_from_slice(&gps.to_le_bytes());
    frame
}

fn text_frame(packet_type: PacketType, text: &str) -> Vec<u8> {
    let mut frame = vec![packet_type as u8];
    frame.extend_from_slice(text.as_bytes());
    frame
}

#[async_trait]
impl UplinkSource for SimulatedSource {
    type Error = std::convert::Infallible;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawUplink>, Self::Error> {
        let (tx, rx) = mpsc::channel(100);

        let reading_interval = self.reading_interval;
        let info_interval = self.info_interval;

        info!(
            device_count = self.devices.len(),
            reading_interval_secs = reading_interval.as_secs(),
            info_interval_secs = info_interval.as_secs(),
            "Starting simulated uplink source"
        );

        spawn_generator(
            "metering",
            reading_interval,
            Arc::clone(&self.devices),
            tx.clone(),
            cancel.clone(),
            SimulatedDevice::metering_frames,
        );
        spawn_generator(
            "info",
            info_interval,
            Arc::clone(&self.devices),
            tx,
            cancel,
            SimulatedDevice::info_frames,
        );

        Ok(rx)
    }
}

fn spawn_generator(
    name: &'static str,
    period: Duration,
    devices: Arc<Vec<SimulatedDevice>>,
    tx: mpsc::Sender<RawUplink>,
    cancel: CancellationToken,
    frames: fn(&SimulatedDevice) -> Vec<Vec<u8>>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(generator = name, "Simulated generator shutting down");
                    break;
                }
                _ = interval.tick() => {
                    for device in devices.iter() {
                        for payload in frames(device) {
                            let uplink = RawUplink { wireless_id: device.wireless_id, payload };
                            if tx.send(uplink).await.is_err() {
                                info!(generator = name, "Channel closed, generator shutting down");
                                return;
                            }
                        }
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use gridcube_core::{Uplink, decode};

    use super::*;

    #[test]
    fn simulated_frames_decode() {
        let device = SimulatedDevice::new(123_456);

        for frame in device.metering_frames().into_iter().chain(device.info_frames()) {
            assert!(decode(&frame).is_ok(), "frame {frame:?} failed to decode");
        }

        let serial = device
            .info_frames()
            .into_iter()
            .map(|f| decode(&f).unwrap())
            .find(|u| matches!(u, Uplink::SerialNumber(_)));
        assert_eq!(serial, Some(Uplink::SerialNumber("123456".into())));
    }

    #[test]
    fn mappings_match_devices() {
        let source = SimulatedSource::new(4, 5, 60);
        let mappings = source.device_mappings();

        assert_eq!(mappings.len(), 4);
        assert!(mappings.iter().all(|m| m.public_id.as_str().len() == 6));
    }

    #[tokio::test]
    async fn start_emits_frames_for_every_device() {
        let source = SimulatedSource::new(2, 3600, 3600);
        let cancel = CancellationToken::new();
        let mut rx = source.start(cancel.clone()).await.unwrap();

        // first tick of both generators: 2 metering + 5 info frames per device
        let mut seen = std::collections::HashSet::new();
        for _ in 0..14 {
            let uplink = rx.recv().await.unwrap();
            seen.insert(uplink.wireless_id);
            if seen.len() == 2 {
                break;
            }
        }
        cancel.cancel();

        assert_eq!(seen.len(), 2);
    }
}
