use std::time::Duration;

use gridcube_core::Event;
use jiff::{SignedDuration, Timestamp};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::storage::Storage;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub ack_timeout: Duration,
    /// Total transmissions per event, the first one included
    pub max_attempts: u32,
    pub batch_size: usize,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub retransmitted: usize,
    pub failed: usize,
    pub exhausted: usize,
}

/// Re-sends commands whose acknowledgment is overdue.
///
/// The stored frame is sent unchanged so a late ack still carries the
/// original GPS timestamp and correlates with the same event.
pub struct AckWatchdog<S, T> {
    storage: S,
    transport: T,
    settings: WatchdogSettings,
}

impl<S: Storage, T: Transport> AckWatchdog<S, T> {
    pub fn new(storage: S, transport: T, settings: WatchdogSettings) -> Self {
        Self {
            storage,
            transport,
            settings,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            ack_timeout_secs = self.settings.ack_timeout.as_secs(),
            max_attempts = self.settings.max_attempts,
            "Ack watchdog started"
        );

        let mut interval = tokio::time::interval(self.settings.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Ack watchdog shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.sweep(Timestamp::now()).await;
                    if report.retransmitted + report.failed > 0 {
                        info!(
                            retransmitted = report.retransmitted,
                            failed = report.failed,
                            exhausted = report.exhausted,
                            "Ack watchdog sweep"
                        );
                    }
                }
            }
        }
    }

    /// One pass over overdue events as of `now`.
    pub async fn sweep(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();

        let timeout =
            SignedDuration::try_from(self.settings.ack_timeout).unwrap_or(SignedDuration::MAX);
        let cutoff = now.checked_sub(timeout).unwrap_or(Timestamp::MIN);

        let overdue = match self.storage.list_unacknowledged(cutoff).await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Failed to list unacknowledged events");
                return report;
            }
        };

        let (retry, exhausted): (Vec<Event>, Vec<Event>) = overdue
            .into_iter()
            .partition(|e| e.attempts < self.settings.max_attempts && e.wireless_id.is_some());

        for event in &exhausted {
            debug!(event_id = %event.id, attempts = event.attempts, "Giving up on event");
        }
        report.exhausted = exhausted.len();

        for batch in retry.chunks(self.settings.batch_size.max(1)) {
            let handles: Vec<_> = batch
                .iter()
                .cloned()
                .map(|event| {
                    let storage = self.storage.clone();
                    let transport = self.transport.clone();
                    tokio::spawn(async move { retransmit(storage, transport, event, now).await })
                })
                .collect();

            for handle in handles {
                match handle.await {
                    Ok(true) => report.retransmitted += 1,
                    Ok(false) => report.failed += 1,
                    Err(e) => {
                        error!(error = %e, "Retransmit task failed");
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }
}

async fn retransmit<S: Storage, T: Transport>(
    storage: S,
    transport: T,
    event: Event,
    now: Timestamp,
) -> bool {
    let Some(wireless_id) = event.wireless_id else {
        return false;
    };

    let attempt = event.attempts + 1;

    let accepted = match transport.send(&wireless_id, &event.frame).await {
        Ok(()) => {
            info!(event_id = %event.id, attempt, "Command retransmitted");
            true
        }
        Err(e) => {
            warn!(error = %e, event_id = %event.id, attempt, "Retransmit refused");
            false
        }
    };

    if let Err(e) = storage.record_attempt(event.id, now).await {
        error!(error = %e, event_id = %event.id, "Failed to record retransmission");
    }

    accepted
}
