use std::time::Duration;

use async_trait::async_trait;
use gridcube_core::*;
use gridcube_dispatch::dispatch::{CommandDispatcher, DispatchError, DispatchSettings};
use gridcube_dispatch::source::RawUplink;
use gridcube_dispatch::storage::memory::MemoryStorage;
use gridcube_dispatch::storage::{DeviceRegistry, EventStore, ReadingQuery, ReadingStore};
use gridcube_dispatch::transport::{MockTransport, Transport, TransportError};
use gridcube_dispatch::uplink::{UplinkError, UplinkProcessor};
use gridcube_dispatch::watchdog::{AckWatchdog, SweepReport, WatchdogSettings};
use jiff::{SignedDuration, Timestamp};
use tokio::sync::mpsc;
use uuid::Uuid;

const GPS: u32 = 1_357_000_000;

fn wireless() -> WirelessDeviceId {
    WirelessDeviceId(Uuid::new_v4())
}

fn public(raw: &str) -> PublicDeviceId {
    PublicDeviceId::parse(raw).unwrap()
}

async fn register(storage: &MemoryStorage, public_id: &str) -> WirelessDeviceId {
    let wireless_id = wireless();
    storage
        .register_device(DeviceMapping {
            public_id: public(public_id),
            wireless_id,
            wireless_arn: None,
            thing_arn: None,
            registered_at: Timestamp::now(),
        })
        .await
        .unwrap();
    wireless_id
}

fn power_frame(msg_num: u8, watts: i64, gps: u32) -> Vec<u8> {
    let mut frame = vec![PacketType::InstantPower as u8, msg_num];
    frame.extend_from_slice(&watts.to_le_bytes());
    frame.extend_from_slice(&gps.to_le_bytes());
    frame
}

fn event_ack_frame(command_type: CommandType, gps: u32) -> Vec<u8> {
    let mut frame = vec![PacketType::EventAcknowledgment as u8, command_type as u8];
    frame.extend_from_slice(&gps.to_le_bytes());
    frame
}

fn no_delay() -> DispatchSettings {
    DispatchSettings {
        batch_size: 2,
        batch_delay: Duration::ZERO,
    }
}

fn watchdog_settings() -> WatchdogSettings {
    WatchdogSettings {
        interval: Duration::from_secs(30),
        ack_timeout: Duration::from_secs(120),
        max_attempts: 3,
        batch_size: 10,
    }
}

fn later(start: Timestamp, secs: i64) -> Timestamp {
    start + SignedDuration::from_secs(secs)
}

#[tokio::test]
async fn power_reading_is_stored_and_acknowledged() {
    let storage = MemoryStorage::default();
    let transport = MockTransport::new();
    let wireless_id = register(&storage, "000012").await;
    let processor = UplinkProcessor::new(storage.clone(), transport.clone());

    let processed = processor
        .process(wireless_id, &power_frame(5, 1000, GPS))
        .await
        .unwrap();
    assert_eq!(processed.device, DeviceAddress::Public(public("000012")));
    let reading = processed.reading;

    assert_eq!(
        reading.uplink,
        Uplink::InstantPower {
            msg_num: 5,
            value: 1000,
            gps_time: GpsTime(GPS),
        }
    );
    assert_eq!(transport.sent_to(&wireless_id), vec![vec![0xA0, 0, 5]]);

    let stored = storage
        .list_readings(
            &DeviceAddress::Public(public("000012")),
            ReadingQuery::default(),
        )
        .await
        .unwrap();
    assert_eq!(stored, vec![reading.clone()]);

    let device = storage.get_device(&public("000012")).await.unwrap().unwrap();
    assert_eq!(device.info.last_seen, Some(reading.received_at));
}

#[tokio::test]
async fn truncated_event_ack_is_rejected() {
    let storage = MemoryStorage::default();
    let transport = MockTransport::new();
    let wireless_id = wireless();
    let processor = UplinkProcessor::new(storage.clone(), transport.clone());

    let result = processor.process(wireless_id, &[9, 2, 0, 0]).await;
    assert!(matches!(
        result,
        Err(UplinkError::Decode(DecodeError::Truncated { .. }))
    ));

    assert!(transport.sent().is_empty());
    let stored = storage
        .list_readings(&DeviceAddress::Wireless(wireless_id), ReadingQuery::default())
        .await
        .unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn unmapped_device_readings_keep_wireless_key() {
    let storage = MemoryStorage::default();
    let wireless_id = wireless();
    let processor = UplinkProcessor::new(storage.clone(), MockTransport::new());

    let mut frame = vec![PacketType::ModelNumber as u8];
    frame.extend_from_slice(b"GC-200\0\0");
    processor.process(wireless_id, &frame).await.unwrap();

    let stored = storage
        .list_readings(&DeviceAddress::Wireless(wireless_id), ReadingQuery::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].uplink, Uplink::ModelNumber("GC-200".into()));
}

#[tokio::test]
async fn identity_packets_fold_into_device_info() {
    let storage = MemoryStorage::default();
    let wireless_id = register(&storage, "000020").await;
    let processor = UplinkProcessor::new(storage.clone(), MockTransport::new());

    let mut model = vec![PacketType::ModelNumber as u8];
    model.extend_from_slice(b"GC-200");
    let mut firmware = vec![PacketType::GridcubeFwVersion as u8];
    firmware.extend_from_slice(b"2.1.0");

    processor.process(wireless_id, &model).await.unwrap();
    processor.process(wireless_id, &firmware).await.unwrap();

    let device = storage.get_device(&public("000020")).await.unwrap().unwrap();
    assert_eq!(device.info.model_number.as_deref(), Some("GC-200"));
    assert_eq!(device.info.gridcube_fw_version.as_deref(), Some("2.1.0"));
}

#[tokio::test]
async fn batch_failures_stay_local() {
    let storage = MemoryStorage::default();
    let wireless_id = register(&storage, "000021").await;
    let processor = UplinkProcessor::new(storage.clone(), MockTransport::new());

    let frames = vec![
        RawUplink {
            wireless_id,
            payload: power_frame(1, 250, GPS),
        },
        RawUplink {
            wireless_id,
            payload: vec![0x42, 0, 0],
        },
        RawUplink {
            wireless_id,
            payload: power_frame(2, 300, GPS + 60),
        },
    ];

    let results = processor.process_batch(frames).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(UplinkError::Decode(DecodeError::UnsupportedType(0x42)))
    ));
    assert!(results[2].is_ok());

    let stored = storage
        .list_readings(
            &DeviceAddress::Public(public("000021")),
            ReadingQuery::default(),
        )
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn event_ack_marks_matching_event() {
    let storage = MemoryStorage::default();
    let transport = MockTransport::new();
    let wireless_id = register(&storage, "000012").await;

    let dispatcher = CommandDispatcher::new(storage.clone(), transport.clone(), no_delay());
    let event = dispatcher
        .dispatch(
            EventId::generate(),
            "000012",
            Command::StartShed { duration_secs: 3600 },
            GpsTime(GPS),
        )
        .await
        .unwrap();
    assert!(event.sent);
    assert!(!event.acknowledged);

    let processor = UplinkProcessor::new(storage.clone(), transport.clone());
    let reading = processor
        .process(wireless_id, &event_ack_frame(CommandType::StartShed, GPS))
        .await
        .unwrap()
        .reading;
    assert_eq!(reading.packet_type(), PacketType::EventAcknowledgment);

    let acked = storage.get_event(event.id).await.unwrap().unwrap();
    assert!(acked.acknowledged);
    assert_eq!(acked.acknowledged_at, Some(reading.received_at));

    // event acks are not answered with an ack frame
    assert_eq!(transport.sent_to(&wireless_id).len(), 1);
}

#[tokio::test]
async fn dispatch_by_wireless_id_labels_public_form() {
    let storage = MemoryStorage::default();
    let transport = MockTransport::new();
    let wireless_id = register(&storage, "000031").await;
    let dispatcher = CommandDispatcher::new(storage.clone(), transport.clone(), no_delay());

    let event = dispatcher
        .dispatch(
            EventId::generate(),
            &wireless_id.to_string(),
            Command::EndShed,
            GpsTime(GPS),
        )
        .await
        .unwrap();

    assert_eq!(&*event.device, "000031");
    assert_eq!(event.wireless_id, Some(wireless_id));
    assert_eq!(event.attempts, 1);
    assert_eq!(transport.sent_to(&wireless_id), vec![event.frame.to_vec()]);
    assert_eq!(storage.list_events("000031").await.unwrap(), vec![event]);
}

#[tokio::test]
async fn bulk_dispatch_settles_every_device() {
    let storage = MemoryStorage::default();
    let transport = MockTransport::new();
    let reachable = register(&storage, "000001").await;
    let unreachable = register(&storage, "000002").await;
    transport.set_unreachable(unreachable);

    let dispatcher = CommandDispatcher::new(storage.clone(), transport.clone(), no_delay());
    let outcome = dispatcher
        .dispatch_bulk(
            vec!["000001".into(), "000002".into(), "000099".into()],
            Command::LoadUp { duration_secs: 600 },
            GpsTime(GPS),
        )
        .await
        .unwrap();

    assert_eq!(outcome.successful_events.len(), 1);
    assert_eq!(outcome.successful_events[0].wireless_id, Some(reachable));
    assert_eq!(outcome.failed_events.len(), 2);

    let refused = &outcome.failed_events[0];
    assert_eq!(refused.device, "000002");
    let refused_event = refused.event.clone().unwrap();
    assert!(!refused_event.sent);
    assert_eq!(refused_event.attempts, 1);
    assert_eq!(
        storage.get_event(refused_event.id).await.unwrap(),
        Some(refused_event)
    );

    let unmapped = &outcome.failed_events[1];
    assert_eq!(unmapped.device, "000099");
    let unmapped_event = unmapped.event.clone().unwrap();
    assert_eq!(unmapped_event.wireless_id, None);
    assert_eq!(unmapped_event.attempts, 0);
    assert!(!unmapped_event.sent);

    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn invalid_command_writes_nothing() {
    let storage = MemoryStorage::default();
    let transport = MockTransport::new();
    register(&storage, "000001").await;
    let dispatcher = CommandDispatcher::new(storage.clone(), transport.clone(), no_delay());

    let bulk = dispatcher
        .dispatch_bulk(
            vec!["000001".into(), "000002".into()],
            Command::StartDataPublish {
                interval_secs: 70_000,
            },
            GpsTime(GPS),
        )
        .await;
    assert!(matches!(bulk, Err(ValidationError::IntervalTooLong(70_000))));

    let single = dispatcher
        .dispatch(
            EventId::generate(),
            "000001",
            Command::SetAdvancedLoadUp {
                duration_secs: 60,
                value: 0,
                units: 0x01,
            },
            GpsTime(GPS),
        )
        .await
        .unwrap_err();
    assert!(single.event.is_none());
    assert!(matches!(single.error, DispatchError::Validation(_)));

    assert!(transport.sent().is_empty());
    assert!(storage.list_events("000001").await.unwrap().is_empty());
}

#[tokio::test]
async fn watchdog_retransmits_until_attempts_run_out() {
    let storage = MemoryStorage::default();
    let transport = MockTransport::new();
    let wireless_id = register(&storage, "000005").await;
    let dispatcher = CommandDispatcher::new(storage.clone(), transport.clone(), no_delay());

    let event = dispatcher
        .dispatch(
            EventId::generate(),
            "000005",
            Command::CriticalPeak { duration_secs: 900 },
            GpsTime(GPS),
        )
        .await
        .unwrap();
    let start = Timestamp::now();

    let watchdog = AckWatchdog::new(storage.clone(), transport.clone(), watchdog_settings());

    assert_eq!(watchdog.sweep(start).await, SweepReport::default());

    let first = watchdog.sweep(later(start, 121)).await;
    assert_eq!(first.retransmitted, 1);

    let second = watchdog.sweep(later(start, 242)).await;
    assert_eq!(second.retransmitted, 1);

    let third = watchdog.sweep(later(start, 400)).await;
    assert_eq!(
        third,
        SweepReport {
            retransmitted: 0,
            failed: 0,
            exhausted: 1,
        }
    );

    let frames = transport.sent_to(&wireless_id);
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.as_slice() == &*event.frame));

    let stored = storage.get_event(event.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.last_attempt_at, later(start, 242));
}

#[tokio::test]
async fn echoed_ack_stops_retransmission() {
    let storage = MemoryStorage::default();
    let (echo_tx, mut echo_rx) = mpsc::channel(8);
    let transport = MockTransport::with_echo(echo_tx);
    let wireless_id = register(&storage, "000006").await;

    let dispatcher = CommandDispatcher::new(storage.clone(), transport.clone(), no_delay());
    let event = dispatcher
        .dispatch(
            EventId::generate(),
            "000006",
            Command::SetUtcTime,
            GpsTime(GPS),
        )
        .await
        .unwrap();

    let echoed = echo_rx.recv().await.unwrap();
    assert_eq!(echoed.wireless_id, wireless_id);
    assert_eq!(echoed.payload, event_ack_frame(CommandType::SetUtcTime, GPS));

    let processor = UplinkProcessor::new(storage.clone(), transport.clone());
    processor
        .process(echoed.wireless_id, &echoed.payload)
        .await
        .unwrap();

    let watchdog = AckWatchdog::new(storage.clone(), transport.clone(), watchdog_settings());
    let report = watchdog.sweep(later(Timestamp::now(), 3600)).await;
    assert_eq!(report, SweepReport::default());
    assert_eq!(transport.sent_to(&wireless_id).len(), 1);
    assert!(
        storage
            .get_event(event.id)
            .await
            .unwrap()
            .unwrap()
            .acknowledged
    );
}

/// Answers every command with its acknowledgment before `send` returns.
#[derive(Clone)]
struct InstantAckTransport {
    processor: UplinkProcessor<MemoryStorage, MockTransport>,
}

#[async_trait]
impl Transport for InstantAckTransport {
    async fn send(&self, device: &WirelessDeviceId, frame: &[u8]) -> Result<(), TransportError> {
        let fields = decode_ack_fields(frame).unwrap();
        self.processor
            .process(*device, &event_ack_frame(fields.command_type, fields.gps_time.0))
            .await
            .unwrap();
        Ok(())
    }
}

#[tokio::test]
async fn ack_arriving_during_send_is_kept() {
    let storage = MemoryStorage::default();
    register(&storage, "000007").await;
    let transport = InstantAckTransport {
        processor: UplinkProcessor::new(storage.clone(), MockTransport::new()),
    };

    let dispatcher = CommandDispatcher::new(storage.clone(), transport.clone(), no_delay());
    let event = dispatcher
        .dispatch(EventId::generate(), "000007", Command::EndShed, GpsTime(GPS))
        .await
        .unwrap();

    assert!(event.sent);
    assert!(event.acknowledged);
    assert_eq!(event.attempts, 1);

    let stored = storage.get_event(event.id).await.unwrap().unwrap();
    assert_eq!(stored, event);

    let watchdog = AckWatchdog::new(storage.clone(), transport, watchdog_settings());
    let report = watchdog.sweep(later(Timestamp::now(), 3600)).await;
    assert_eq!(report, SweepReport::default());
}

#[tokio::test]
async fn reused_event_id_keeps_first_record() {
    let storage = MemoryStorage::default();
    let transport = MockTransport::new();
    let wireless_id = register(&storage, "000008").await;
    let dispatcher = CommandDispatcher::new(storage.clone(), transport.clone(), no_delay());
    let processor = UplinkProcessor::new(storage.clone(), transport.clone());

    let event_id = EventId::generate();
    dispatcher
        .dispatch(
            event_id,
            "000008",
            Command::StartShed { duration_secs: 600 },
            GpsTime(GPS),
        )
        .await
        .unwrap();
    processor
        .process(wireless_id, &event_ack_frame(CommandType::StartShed, GPS))
        .await
        .unwrap();

    let reused = dispatcher
        .dispatch(event_id, "000008", Command::EndShed, GpsTime(GPS + 60))
        .await
        .unwrap_err();
    assert!(reused.event.is_none());
    assert!(matches!(reused.error, DispatchError::DuplicateEvent(id) if id == event_id));

    let stored = storage.get_event(event_id).await.unwrap().unwrap();
    assert_eq!(stored.command, Command::StartShed { duration_secs: 600 });
    assert!(stored.acknowledged);
    assert_eq!(transport.sent_to(&wireless_id).len(), 1);
}
