//! ==============================================================================
//! main.rs - sensor hub entry point
//! ==============================================================================
//!
//! purpose:
//!     boots the hub and runs it until ctrl-c.
//!
//! responsibilities:
//!     - load host.toml and set up logging
//!     - open the registry file and the hardware provider
//!     - auto-register 1-wire probes on first boot
//!     - serve the rest api in the background
//!     - run the periodic tick: sample, evaluate alarms, dispatch schedules,
//!       then deliver the resulting webhooks outside the hub lock
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                      sensor-hub (this file)                  │
//!     │  ┌─────────────┐                     ┌─────────────────────┐ │
//!     │  │ tick loop   │                     │ rest api (api.rs)   │ │
//!     │  │ (interval)  │                     │ (port 3000)         │ │
//!     │  └──────┬──────┘                     └──────────┬──────────┘ │
//!     │         │          Arc<Mutex<Hub>>              │            │
//!     │         └──────────────────┬────────────────────┘            │
//!     │                      ┌─────┴─────┐                           │
//!     │                      │    hub    │ <- hub.rs                 │
//!     │                      └─────┬─────┘                           │
//!     └────────────────────────────┼────────────────────────────────┘
//!                  ┌───────────────┼────────────────┐
//!                  ▼               ▼                ▼
//!           ┌────────────┐  ┌────────────┐   ┌────────────┐
//!           │ hal.rs     │  │ storage.rs │   │ notify.rs  │
//!           │ gpio/i2c/w1│  │ json file  │   │ webhooks   │
//!           └────────────┘  └────────────┘   └────────────┘
//!
//! ==============================================================================

use anyhow::{Context, Result};
use sensor_hub::alarms::TickTime;
use sensor_hub::api::{self, ApiState};
use sensor_hub::config::HostConfig;
use sensor_hub::hal::Hal;
use sensor_hub::hub::{Hub, HubSettings};
use sensor_hub::notify::{self, HttpSink, NotificationSink};
use sensor_hub::storage::FileStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: configuration and logging
    let config = HostConfig::load_or_default();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("===========================================================");
    info!("  Sensor Hub v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================================");
    config.log_summary();

    // step 2: registry, hardware and outputs
    let store = FileStore::open(&config.storage.path);
    let hal = Arc::new(Hal::new(config.sensors.w1_devices.clone()));
    let settings = HubSettings {
        device_name: config.device.name.clone(),
        wiring: config.sensors.clone(),
        outputs: config.outputs.clone(),
        limits: (&config.limits).into(),
        show_sensor_data: config.logging.show_sensor_data,
    };
    let mut hub = Hub::open(settings, Box::new(store), hal);
    if let Err(e) = hub.seed_from_bus() {
        warn!("[STARTUP] Bus discovery failed: {}", e);
    }
    let hub = Arc::new(Mutex::new(hub));

    // step 3: webhook client
    let sink: Arc<dyn NotificationSink> = Arc::new(
        HttpSink::new(Duration::from_secs(config.webhooks.timeout_seconds))
            .context("Failed to build webhook client")?,
    );

    // step 4: rest api in the background
    let started = Instant::now();
    let state = ApiState::new(hub.clone(), sink.clone(), started);
    let bind = config.server.bind.clone();
    tokio::spawn(async move {
        if let Err(e) = api::serve(&bind, state).await {
            error!("[API] Server error: {}", e);
        }
    });

    // step 5: tick loop
    let mut ticker = tokio::time::interval(Duration::from_millis(config.polling.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("[RUNTIME] Ticking every {}ms", config.polling.tick_ms);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tick_hub = hub.clone();
                let outbound = match tokio::task::spawn_blocking(move || {
                    let mut hub = tick_hub.blocking_lock();
                    hub.tick(TickTime::since(started))
                })
                .await
                {
                    Ok(outbound) => outbound,
                    Err(e) => {
                        error!("[RUNTIME] Tick panicked: {}", e);
                        continue;
                    }
                };
                if !outbound.is_empty() {
                    let sent = notify::deliver(sink.as_ref(), &outbound).await;
                    info!("[RUNTIME] Delivered {}/{} webhooks", sent, outbound.len());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("[RUNTIME] Shutting down");
                break;
            }
        }
    }

    Ok(())
}
