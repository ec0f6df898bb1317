//! # lean-homie MQTT
//!
//! The transport collaborator over `rumqttc`.
//!
//! This crate provides:
//! - `MqttTransport`, the core `Transport` backed by an `AsyncClient`
//! - `MqttSession`, which registers the device's last will before connecting
//! - `MqttEventPump`, the ingestion activity
//! - `Reconnector`, the connection flag and reconnect backoff decisions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pump;
pub mod session;
pub mod transport;

pub use pump::{ErrorOutcome, MqttEventPump, Reconnect, Reconnector};
pub use session::{parse_mqtt_url, MqttConfig, MqttSession, SessionError};
pub use transport::MqttTransport;
