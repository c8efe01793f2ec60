use std::time::Duration;

use gridcube_core::{
    Command, CommandRequest, DeviceAddress, Event, EventId, GpsTime, ValidationError, encode,
};
use jiff::Timestamp;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::resolver::DeviceAddressResolver;
use crate::storage::Storage;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Devices handled concurrently per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("event id {0} is already in use")]
    DuplicateEvent(EventId),
    #[error("device {0} has no wireless address")]
    Unresolved(String),
    #[error("transport refused frame: {0}")]
    Transport(String),
    #[error("failed to store event: {0}")]
    Storage(String),
}

/// A single-device dispatch that did not end with the frame accepted.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct DispatchFailure {
    /// The audit record, when one was written.
    pub event: Option<Event>,
    #[source]
    pub error: DispatchError,
}

impl DispatchFailure {
    fn new(event: Option<Event>, error: DispatchError) -> Self {
        Self { event, error }
    }
}

/// One device the command could not be delivered to.
#[derive(Debug, Clone, Serialize)]
pub struct FailedDispatch {
    pub device: String,
    /// The audit record, when one was written.
    pub event: Option<Event>,
    pub reason: String,
}

/// Settled result of a bulk dispatch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub successful_events: Vec<Event>,
    pub failed_events: Vec<FailedDispatch>,
}

/// Encodes commands, hands frames to the transport and records an event for
/// every attempt.
pub struct CommandDispatcher<S, T> {
    storage: S,
    transport: T,
    resolver: DeviceAddressResolver<S>,
    settings: DispatchSettings,
}

impl<S: Clone, T: Clone> Clone for CommandDispatcher<S, T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            transport: self.transport.clone(),
            resolver: self.resolver.clone(),
            settings: self.settings,
        }
    }
}

impl<S: Storage, T: Transport> CommandDispatcher<S, T> {
    pub fn new(storage: S, transport: T, settings: DispatchSettings) -> Self {
        Self {
            resolver: DeviceAddressResolver::new(storage.clone()),
            storage,
            transport,
            settings,
        }
    }

    /// Sends one command to one device.
    ///
    /// The event is stored before the frame reaches the transport, so an
    /// acknowledgment arriving while `send` is still in flight finds it. The
    /// returned error says why `sent` is false. Invalid parameters and a
    /// reused event id fail before anything is written.
    #[instrument(skip(self, command), fields(command_type = ?command.command_type()))]
    pub async fn dispatch(
        &self,
        event_id: EventId,
        device: &str,
        command: Command,
        gps_time: GpsTime,
    ) -> Result<Event, DispatchFailure> {
        let request = CommandRequest::new(command, gps_time);
        let frame = encode(&request).map_err(|e| DispatchFailure::new(None, e.into()))?;

        let label = self.resolver.resolve_for_response(device).await.to_string();
        let target = self.resolver.resolve_for_communication(device).await;

        let now = Timestamp::now();
        let mut event = Event {
            id: event_id,
            command_type: request.command.command_type(),
            command: request.command,
            device: label.into(),
            wireless_id: target.wireless(),
            gps_time,
            frame: frame.into_boxed_slice(),
            sent: false,
            acknowledged: false,
            attempts: 0,
            created_at: now,
            last_attempt_at: now,
            acknowledged_at: None,
        };

        match self.storage.insert_event(event.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(event_id = %event.id, "Event id already in use");
                return Err(DispatchFailure::new(
                    None,
                    DispatchError::DuplicateEvent(event.id),
                ));
            }
            Err(e) => {
                error!(error = %e, event_id = %event.id, "Failed to store event");
                return Err(DispatchFailure::new(
                    None,
                    DispatchError::Storage(e.to_string()),
                ));
            }
        }

        let DeviceAddress::Wireless(wireless_id) = &target else {
            warn!(device_id = %target, "No wireless address for device");
            return Err(DispatchFailure::new(
                Some(event),
                DispatchError::Unresolved(target.to_string()),
            ));
        };

        let sent = self.transport.send(wireless_id, &event.frame).await;
        let attempted_at = Timestamp::now();
        event.attempts = 1;
        event.last_attempt_at = attempted_at;

        let recorded = match &sent {
            Ok(()) => self.storage.mark_sent(event.id, attempted_at).await,
            Err(_) => self.storage.record_attempt(event.id, attempted_at).await,
        };

        if let Err(e) = sent {
            warn!(error = %e, device_id = %event.device, "Transport refused command");
            if let Err(e) = recorded {
                error!(error = %e, event_id = %event.id, "Failed to record attempt");
            }
            return Err(DispatchFailure::new(
                Some(event),
                DispatchError::Transport(e.to_string()),
            ));
        }

        event.sent = true;
        if let Err(e) = recorded {
            error!(error = %e, event_id = %event.id, "Failed to mark event sent");
            return Err(DispatchFailure::new(
                Some(event),
                DispatchError::Storage(e.to_string()),
            ));
        }

        // an acknowledgment may already have landed while the frame was in flight
        match self.storage.get_event(event.id).await {
            Ok(Some(stored)) => event = stored,
            Ok(None) => {}
            Err(e) => warn!(error = %e, event_id = %event.id, "Failed to reload event"),
        }

        info!(event_id = %event.id, device_id = %event.device, "Command sent");
        Ok(event)
    }

    /// Sends the same command to many devices.
    ///
    /// Devices are handled concurrently in batches of `batch_size` with
    /// `batch_delay` between batches. Every batch is settled before the next
    /// starts, and one device failing never affects the others.
    #[instrument(skip(self, devices, command), fields(device_count = devices.len()))]
    pub async fn dispatch_bulk(
        &self,
        devices: Vec<String>,
        command: Command,
        gps_time: GpsTime,
    ) -> Result<BulkOutcome, ValidationError> {
        command.validate()?;

        let mut outcome = BulkOutcome::default();
        let batch_size = self.settings.batch_size.max(1);
        let batch_count = devices.len().div_ceil(batch_size);

        for (index, batch) in devices.chunks(batch_size).enumerate() {
            let handles: Vec<_> = batch
                .iter()
                .map(|device| {
                    let dispatcher = self.clone();
                    let task_device = device.clone();
                    let command = command.clone();
                    let handle = tokio::spawn(async move {
                        dispatcher
                            .dispatch(EventId::generate(), &task_device, command, gps_time)
                            .await
                    });
                    (device.clone(), handle)
                })
                .collect();

            for (device, handle) in handles {
                match handle.await {
                    Ok(Ok(event)) => outcome.successful_events.push(event),
                    Ok(Err(failure)) => outcome.failed_events.push(FailedDispatch {
                        device,
                        reason: failure.error.to_string(),
                        event: failure.event,
                    }),
                    Err(e) => {
                        error!(error = %e, device_id = %device, "Dispatch task failed");
                        outcome.failed_events.push(FailedDispatch {
                            device,
                            event: None,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            if index + 1 < batch_count && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
        }

        info!(
            successful = outcome.successful_events.len(),
            failed = outcome.failed_events.len(),
            "Bulk dispatch settled"
        );

        Ok(outcome)
    }
}
