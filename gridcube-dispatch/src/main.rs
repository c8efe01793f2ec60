use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use clap::Parser;
use gridcube_dispatch::api;
use gridcube_dispatch::{
    AckWatchdog, AppState, Config, DeviceRegistry, DispatchSettings, ForwardingConfig, Forwarder,
    HttpForwarder, HttpTransport, MemoryStorage, MockTransport, RawUplink, SimulatedSource,
    SourceConfig, SqliteStorage, Storage, StorageConfig, Transport, TransportConfig,
    UplinkError, UplinkProcessor, UplinkSource, WatchdogSettings,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const ECHO_CHANNEL_CAPACITY: usize = 256;
const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "gridcube-dispatch")]
#[command(about = "GridCube uplink decoder and command dispatcher")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "gridcube-dispatch.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=info,gridcube_dispatch=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    info!(
        http_addr = %config.server.http_addr,
        leap_seconds = config.dispatch.leap_seconds,
        "Starting gridcube-dispatch"
    );

    match config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            let storage = MemoryStorage::default();
            run_with_storage(config, storage).await?;
        }
        StorageConfig::Sqlite { ref path } => {
            info!(path = ?path, "Using SQLite storage");
            let storage = SqliteStorage::new(path).await?;
            run_with_storage(config, storage).await?;
        }
    }

    Ok(())
}

async fn run_with_storage<S: Storage>(config: Config, storage: S) -> color_eyre::Result<()> {
    match config.transport {
        TransportConfig::Mock => {
            info!("Using mock transport, command acks are echoed back");
            let (echo_tx, echo_rx) = mpsc::channel(ECHO_CHANNEL_CAPACITY);
            let transport = MockTransport::with_echo(echo_tx);
            run(config, storage, transport, Some(echo_rx)).await
        }
        TransportConfig::Http {
            ref gateway_url,
            timeout_secs,
        } => {
            info!(%gateway_url, timeout_secs, "Using HTTP transport");
            let transport =
                HttpTransport::new(gateway_url.clone(), Duration::from_secs(timeout_secs))?;
            run(config, storage, transport, None).await
        }
    }
}

async fn run<S: Storage, T: Transport>(
    config: Config,
    storage: S,
    transport: T,
    echo_rx: Option<mpsc::Receiver<RawUplink>>,
) -> color_eyre::Result<()> {
    let cancel = CancellationToken::new();

    let settings = DispatchSettings {
        batch_size: config.dispatch.batch_size,
        batch_delay: config.dispatch.batch_delay(),
    };
    let state = AppState::new(
        storage.clone(),
        transport.clone(),
        settings,
        config.dispatch.leap_seconds,
        build_forwarder(&config.forwarding)?,
    );

    let source_rx = match config.source {
        SourceConfig::None => {
            info!("No uplink source configured, accepting webhook uplinks only");
            None
        }
        SourceConfig::Simulated {
            device_count,
            reading_interval_secs,
            info_interval_secs,
        } => {
            info!(
                device_count,
                reading_interval_secs, info_interval_secs, "Using simulated uplink source"
            );

            let source =
                SimulatedSource::new(device_count, reading_interval_secs, info_interval_secs);
            register_simulated_devices(&storage, &source).await;
            Some(source.start(cancel.clone()).await?)
        }
    };

    // Spawn uplink collector task
    let uplink_processor = state.uplink.clone();
    let cancel_for_collector = cancel.clone();
    let collector_handle = tokio::spawn(async move {
        run_uplink_collector(source_rx, echo_rx, uplink_processor, cancel_for_collector).await;
    });

    // Spawn ack watchdog task
    let watchdog_handle = if config.watchdog.enabled {
        let watchdog = AckWatchdog::new(
            storage.clone(),
            transport.clone(),
            WatchdogSettings {
                interval: Duration::from_secs(config.watchdog.interval_secs),
                ack_timeout: Duration::from_secs(config.watchdog.ack_timeout_secs),
                max_attempts: config.watchdog.max_attempts,
                batch_size: config.dispatch.batch_size,
            },
        );
        Some(tokio::spawn(watchdog.run(cancel.clone())))
    } else {
        info!("Ack watchdog disabled");
        None
    };

    // HTTP server
    let http_addr = config.server.http_addr;
    let axum_app = Router::new()
        .route("/health", get(api::health::<S, T>))
        .nest("/api", api::router::<S, T>())
        .with_state(state);
    let axum_listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(axum_listener, axum_app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    }

    // Wait for background tasks to complete
    let _ = collector_handle.await;
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }

    info!("gridcube-dispatch shut down complete");
    Ok(())
}

fn build_forwarder(config: &ForwardingConfig) -> color_eyre::Result<Option<Arc<dyn Forwarder>>> {
    if !config.enabled {
        return Ok(None);
    }

    let Some(url) = &config.url else {
        warn!("Forwarding enabled without a url, readings stay local");
        return Ok(None);
    };

    info!(%url, "Forwarding decoded readings");
    let forwarder = HttpForwarder::new(url.clone(), FORWARD_TIMEOUT)?;
    Ok(Some(Arc::new(forwarder)))
}

async fn register_simulated_devices<S: Storage>(storage: &S, source: &SimulatedSource) {
    let mappings = source.device_mappings();
    let total = mappings.len();
    let mut registered = 0usize;

    for mapping in mappings {
        let public_id = mapping.public_id.clone();
        match storage.register_device(mapping).await {
            Ok(()) => registered += 1,
            Err(e) => {
                warn!(error = %e, device_id = %public_id, "Failed to register simulated device")
            }
        }
    }

    info!(registered, total, "Simulated device registration complete");
}

async fn run_uplink_collector<S: Storage, T: Transport>(
    mut source_rx: Option<mpsc::Receiver<RawUplink>>,
    mut echo_rx: Option<mpsc::Receiver<RawUplink>>,
    processor: UplinkProcessor<S, T>,
    cancel: CancellationToken,
) {
    info!("Uplink collector started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Uplink collector shutting down");
                break;
            }
            frame = next_frame(&mut source_rx) => match frame {
                Some(frame) => handle_frame(&processor, frame).await,
                None => {
                    info!("Uplink source closed");
                    source_rx = None;
                }
            },
            frame = next_frame(&mut echo_rx) => match frame {
                Some(frame) => handle_frame(&processor, frame).await,
                None => echo_rx = None,
            },
        }
    }
}

/// Pends forever once the channel is gone.
async fn next_frame(rx: &mut Option<mpsc::Receiver<RawUplink>>) -> Option<RawUplink> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_frame<S: Storage, T: Transport>(
    processor: &UplinkProcessor<S, T>,
    frame: RawUplink,
) {
    match processor.process(frame.wireless_id, &frame.payload).await {
        Ok(_) => {}
        // already logged by the processor
        Err(UplinkError::Decode(_)) => {}
        Err(e) => error!(error = %e, wireless_id = %frame.wireless_id, "Failed to process uplink"),
    }
}
