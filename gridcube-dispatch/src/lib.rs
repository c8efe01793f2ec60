pub mod api;
pub mod config;
pub mod dispatch;
pub mod forward;
pub mod resolver;
pub mod source;
pub mod state;
pub mod storage;
pub mod transport;
pub mod uplink;
pub mod watchdog;

pub use config::{
    Config, DispatchConfig, ForwardingConfig, ServerConfig, SourceConfig, StorageConfig,
    TransportConfig, WatchdogConfig,
};
pub use dispatch::{BulkOutcome, CommandDispatcher, DispatchError, DispatchSettings};
pub use forward::{Forwarder, HttpForwarder};
pub use resolver::{AddressStore, DeviceAddressResolver};
pub use source::{RawUplink, SimulatedSource, UplinkSource};
pub use state::AppState;
pub use storage::{
    DeviceRegistry, EventStore, MemoryStorage, ReadingQuery, ReadingStore, SqliteStorage, Storage,
};
pub use transport::{HttpTransport, MockTransport, Transport};
pub use uplink::{ProcessedUplink, UplinkError, UplinkProcessor};
pub use watchdog::{AckWatchdog, SweepReport, WatchdogSettings};
