use std::sync::Arc;
use std::time::Instant;

use crate::dispatch::{CommandDispatcher, DispatchSettings};
use crate::forward::Forwarder;
use crate::resolver::DeviceAddressResolver;
use crate::storage::Storage;
use crate::transport::Transport;
use crate::uplink::UplinkProcessor;

/// Shared handles for the HTTP layer and background tasks.
pub struct AppState<S, T> {
    pub storage: S,
    pub resolver: DeviceAddressResolver<S>,
    pub uplink: UplinkProcessor<S, T>,
    pub dispatcher: CommandDispatcher<S, T>,
    /// GPS-UTC leap second offset for command timestamps
    pub leap_seconds: i64,
    started_at: Instant,
}

impl<S: Storage, T: Transport> AppState<S, T> {
    pub fn new(
        storage: S,
        transport: T,
        settings: DispatchSettings,
        leap_seconds: i64,
        forwarder: Option<Arc<dyn Forwarder>>,
    ) -> Self {
        let mut uplink = UplinkProcessor::new(storage.clone(), transport.clone());
        if let Some(forwarder) = forwarder {
            uplink = uplink.with_forwarder(forwarder);
        }

        Self {
            resolver: DeviceAddressResolver::new(storage.clone()),
            dispatcher: CommandDispatcher::new(storage.clone(), transport, settings),
            uplink,
            storage,
            leap_seconds,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl<S: Clone, T: Clone> Clone for AppState<S, T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            resolver: self.resolver.clone(),
            uplink: self.uplink.clone(),
            dispatcher: self.dispatcher.clone(),
            leap_seconds: self.leap_seconds,
            started_at: self.started_at,
        }
    }
}
