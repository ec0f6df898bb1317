//! # lean-homie Agent
//!
//! Runs a Homie 3.0.1 device against an MQTT broker.
//!
//! ## Architecture
//!
//! The agent runs four concurrent activities:
//! 1. **Link watcher**: probes the route to the broker, reports link up/down
//! 2. **Ingestion**: the MQTT event pump, feeding a bounded inbound queue
//! 3. **Dispatch**: routes queued messages to properties once reconciled
//! 4. **Telemetry**: publishes stats on a fixed interval while ready
//!
//! Each transport connection triggers a setup-or-init cycle followed by
//! retained-value reconciliation.

use anyhow::{Context, Result};
use lean_homie_core::{Device, DeviceState, LastWill, Transport};
use lean_homie_mqtt::{parse_mqtt_url, MqttSession};
use lean_homie_proto::DeviceTopic;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod link;
mod mqtt_log;
mod runtime;

pub use config::AgentConfig;
pub use link::HostLink;
pub use mqtt_log::MqttLogLayer;
pub use runtime::Runtime;

const LINK_POLL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let started = Instant::now();

    // Load configuration before logging so the debug sink can be wired
    let config = AgentConfig::from_env()?;
    let mqtt_log = config.debug_log.then(MqttLogLayer::new);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(mqtt_log.clone())
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        homie = lean_homie_proto::HOMIE_VERSION,
        "Starting lean-homie agent"
    );

    let (host, port) = parse_mqtt_url(&config.mqtt.broker).context("Invalid HOMIE_MQTT_BROKER")?;
    let link = Arc::new(HostLink::new(&config.device.mac, host, port));

    let will = LastWill::lost(&DeviceTopic::new(&config.device.root, &config.device.id));
    let session =
        MqttSession::open(&config.mqtt, &will).context("Failed to configure MQTT session")?;
    let transport: Arc<dyn Transport> = Arc::new(session.transport.clone());

    if let Some(layer) = &mqtt_log {
        layer.attach(transport.clone(), &config.device.id);
    }

    let device = build_device(&config, transport, link.clone(), started)?;
    tracing::info!(
        device = %device.id(),
        nodes = device.nodes().len(),
        properties = config.device.layout.property_count(),
        "Device initialized"
    );

    let (inbox_tx, inbox_rx) = mpsc::channel(config.runtime.queue_capacity);
    let (events_tx, events_rx) = mpsc::channel(16);
    let (link_tx, link_rx) = watch::channel(false);

    tokio::spawn(link.watch(events_tx.clone(), link_tx, LINK_POLL));
    tokio::spawn(session.pump.run(inbox_tx, events_tx, link_rx));

    let runtime = Runtime::new(device, inbox_rx, &config.runtime);
    let handle = runtime.device();

    tracing::info!("Agent running, press Ctrl+C to stop");
    tokio::select! {
        () = runtime.run(events_rx) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Shutting down");
        }
    }

    let device = handle.lock().await;
    tracing::info!(state = %device.state(), "Agent stopped");
    Ok(())
}

fn build_device(
    config: &AgentConfig,
    transport: Arc<dyn Transport>,
    link: Arc<HostLink>,
    started: Instant,
) -> Result<Device> {
    let mut device = Device::new(&config.device.root, &config.device.id, transport, link);
    if let Some(name) = &config.device.name {
        device.set_name(name);
    }
    device.set_stats_interval(config.device.stats_interval);

    config
        .device
        .layout
        .apply(&mut device)
        .context("Failed to apply device layout")?;

    for node in device.nodes_mut() {
        let node_id = node.id().to_string();
        for property in node.properties_mut() {
            if !property.is_settable() {
                continue;
            }
            let node_id = node_id.clone();
            property.set_handler(move |property, payload| {
                tracing::info!(node = %node_id, property = %property.id(), payload, "Set command");
                property.set_value(payload, false);
            });
        }
    }

    device
        .add_stat("uptime", move || started.elapsed().as_secs().to_string())
        .context("Failed to register uptime stat")?;

    device.on_state_changed(|state| {
        if state == DeviceState::Alert {
            tracing::error!("Device entered alert; check HOMIE_DEVICE_NAME and the layout");
        }
    });
    device.on_setup_done(|device| {
        let connected_at = device.connected_at().map(|t| t.to_rfc3339());
        tracing::info!(device = %device.id(), ?connected_at, "Initial values published");
    });

    Ok(device)
}
