use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use gridcube_core::time::DEFAULT_LEAP_SECONDS;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8081)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Records frames in memory and echoes command acknowledgments back
    /// into the uplink pipeline.
    #[default]
    Mock,
    Http {
        /// Wireless gateway endpoint accepting downlink frames
        gateway_url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Devices handled concurrently per batch
    pub batch_size: usize,
    /// Pause between batches in milliseconds
    pub batch_delay_ms: u64,
    /// GPS-UTC leap second offset applied to outgoing timestamps
    pub leap_seconds: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 100,
            leap_seconds: DEFAULT_LEAP_SECONDS,
        }
    }
}

impl DispatchConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// Interval in seconds between sweeps
    pub interval_secs: u64,
    /// Seconds an event may stay unacknowledged before it is sent again
    pub ack_timeout_secs: u64,
    /// Total transmissions per event, the first one included
    pub max_attempts: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            ack_timeout_secs: 120,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    pub enabled: bool,
    /// Downstream endpoint receiving decoded readings as JSON
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Uplinks arrive only through the HTTP webhook.
    None,
    Simulated {
        /// Number of simulated devices
        device_count: usize,
        /// Interval in seconds between metering packets
        reading_interval_secs: u64,
        /// Interval in seconds between identity and link packets
        info_interval_secs: u64,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Simulated {
            device_count: 3,
            reading_interval_secs: 5,
            info_interval_secs: 60,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
