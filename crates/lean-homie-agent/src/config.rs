//! Agent configuration.

use anyhow::{Context, Result};
use lean_homie_core::DeviceLayout;
use lean_homie_mqtt::MqttConfig;
use std::time::Duration;
use uuid::Uuid;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Broker session configuration
    pub mqtt: MqttConfig,

    /// Device configuration
    pub device: DeviceConfig,

    /// Runtime timing
    pub runtime: RuntimeConfig,

    /// Forward log events to `debug/<device id>`
    pub debug_log: bool,
}

/// Device identity and layout.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Topic root
    pub root: String,

    /// Device identifier
    pub id: String,

    /// Human readable name; the device alerts without one
    pub name: Option<String>,

    /// Published as `$mac`
    pub mac: String,

    /// Telemetry interval
    pub stats_interval: Duration,

    /// Nodes and properties to announce
    pub layout: DeviceLayout,
}

/// Queue and timer settings.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bound of the inbound message queue
    pub queue_capacity: usize,

    /// How long reconciliation drains the queue
    pub settle: Duration,

    /// Delay between connect and setup/init
    pub setup_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                client_id: format!("lean-homie-{}", Uuid::new_v4()),
                ..MqttConfig::default()
            },
            device: DeviceConfig {
                root: lean_homie_proto::DEFAULT_ROOT.to_string(),
                id: "lean-homie".to_string(),
                name: None,
                mac: "00:00:00:00:00:00".to_string(),
                stats_interval: Duration::from_secs(60),
                layout: DeviceLayout::default(),
            },
            runtime: RuntimeConfig::default(),
            debug_log: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            settle: Duration::from_millis(2000),
            setup_delay: Duration::from_millis(1000),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HOMIE_MQTT_BROKER`: MQTT broker URL
    /// - `HOMIE_MQTT_USERNAME` / `HOMIE_MQTT_PASSWORD`: credentials
    /// - `HOMIE_CLIENT_ID`: MQTT client id
    /// - `HOMIE_ROOT`: topic root
    /// - `HOMIE_DEVICE_ID` / `HOMIE_DEVICE_NAME`: device identity
    /// - `HOMIE_STATS_INTERVAL`: telemetry interval in seconds
    /// - `HOMIE_MAC`: value published as `$mac`
    /// - `HOMIE_LAYOUT`: JSON layout, or `HOMIE_LAYOUT_FILE`: path to one
    /// - `HOMIE_QUEUE_CAPACITY`, `HOMIE_SETTLE_MS`, `HOMIE_SETUP_DELAY_MS`
    /// - `HOMIE_DEBUG_LOG`: `1` to forward logs over MQTT
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable or the layout is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(broker) = var("HOMIE_MQTT_BROKER") {
            config.mqtt.broker = broker;
        }

        config.mqtt.username = var("HOMIE_MQTT_USERNAME");
        config.mqtt.password = var("HOMIE_MQTT_PASSWORD");

        if let Some(client_id) = var("HOMIE_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }

        if let Some(root) = var("HOMIE_ROOT") {
            config.device.root = root;
        }

        if let Some(id) = var("HOMIE_DEVICE_ID") {
            config.device.id = id;
        }

        config.device.name = var("HOMIE_DEVICE_NAME");

        if let Some(mac) = var("HOMIE_MAC") {
            config.device.mac = mac;
        }

        if let Some(secs) = var("HOMIE_STATS_INTERVAL") {
            let secs = secs.parse().context("Invalid HOMIE_STATS_INTERVAL")?;
            config.device.stats_interval = Duration::from_secs(secs);
        }

        if let Some(json) = var("HOMIE_LAYOUT") {
            config.device.layout =
                DeviceLayout::from_json(&json).context("Invalid HOMIE_LAYOUT JSON")?;
        } else if let Some(path) = var("HOMIE_LAYOUT_FILE") {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read layout file {path}"))?;
            config.device.layout = DeviceLayout::from_json(&json)
                .with_context(|| format!("Invalid layout in {path}"))?;
        }

        if let Some(capacity) = var("HOMIE_QUEUE_CAPACITY") {
            config.runtime.queue_capacity =
                capacity.parse().context("Invalid HOMIE_QUEUE_CAPACITY")?;
        }

        if let Some(ms) = var("HOMIE_SETTLE_MS") {
            config.runtime.settle =
                Duration::from_millis(ms.parse().context("Invalid HOMIE_SETTLE_MS")?);
        }

        if let Some(ms) = var("HOMIE_SETUP_DELAY_MS") {
            config.runtime.setup_delay =
                Duration::from_millis(ms.parse().context("Invalid HOMIE_SETUP_DELAY_MS")?);
        }

        config.debug_log = var("HOMIE_DEBUG_LOG").is_some_and(|v| v == "1" || v == "true");

        Ok(config)
    }
}
