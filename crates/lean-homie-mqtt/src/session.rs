//! Broker session setup: options, credentials and last will.

use crate::pump::MqttEventPump;
use crate::transport::{to_mqtt_qos, MqttTransport};
use lean_homie_core::LastWill;
use rumqttc::{AsyncClient, MqttOptions};
use std::time::Duration;
use url::Url;

/// Configuration for the broker session.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// MQTT broker URL (e.g., <tcp://localhost:1883>)
    pub broker: String,
    /// Client ID for MQTT connection
    pub client_id: String,
    /// Optional username
    pub username: Option<String>,
    /// Optional password
    pub password: Option<String>,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Request channel capacity of the client
    pub capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "tcp://localhost:1883".to_string(),
            client_id: "lean-homie".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            capacity: 256,
        }
    }
}

/// A configured, not yet connected, broker session.
///
/// Nothing touches the network until the pump is run.
pub struct MqttSession {
    /// Publishing half
    pub transport: MqttTransport,
    /// Event loop half
    pub pump: MqttEventPump,
}

impl MqttSession {
    /// Build the client with `will` registered.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn open(config: &MqttConfig, will: &LastWill) -> Result<Self, SessionError> {
        let (host, port) = parse_mqtt_url(&config.broker)?;

        let mut options = MqttOptions::new(&config.client_id, &host, port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }
        options.set_last_will(rumqttc::LastWill::new(
            &will.topic,
            will.payload.as_bytes().to_vec(),
            to_mqtt_qos(will.qos),
            will.retain,
        ));

        tracing::info!(
            host,
            port,
            client_id = %config.client_id,
            will_topic = %will.topic,
            "MQTT session configured"
        );

        let (client, eventloop) = AsyncClient::new(options, config.capacity);
        let transport = MqttTransport::new(client);
        let pump = MqttEventPump::new(eventloop, transport.connected_flag());

        Ok(Self { transport, pump })
    }
}

/// Parse MQTT URL into host and port.
///
/// Accepts `tcp://`, `mqtt://` or a bare `host[:port]`; the port defaults
/// to 1883.
///
/// # Errors
///
/// Returns error if the URL is malformed or uses another scheme.
pub fn parse_mqtt_url(input: &str) -> Result<(String, u16), SessionError> {
    if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| SessionError::InvalidUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(SessionError::InvalidUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| SessionError::InvalidUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let (host, port) = match input.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (input, None),
    };
    if host.is_empty() {
        return Err(SessionError::InvalidUrl(format!("{input}: missing host")));
    }
    let port = match port {
        None => 1883,
        Some(port) if port.contains(':') => {
            return Err(SessionError::InvalidUrl(format!(
                "{input}: too many ':' separators"
            )));
        }
        Some(port) => port
            .parse()
            .map_err(|_| SessionError::InvalidUrl(format!("{input}: invalid port '{port}'")))?,
    };

    Ok((host.to_string(), port))
}

/// Errors that can occur while configuring the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Invalid MQTT URL
    #[error("invalid MQTT URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use lean_homie_core::{QoS, Transport};

    #[test]
    fn parse_mqtt_url_tcp() {
        let (host, port) = parse_mqtt_url("tcp://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_mqtt_url_default_port() {
        let (host, port) = parse_mqtt_url("mqtt://broker.example.com").unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_mqtt_url_no_scheme() {
        let (host, port) = parse_mqtt_url("10.0.0.5:8883").unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 8883);
    }

    #[test]
    fn parse_mqtt_url_rejects_other_schemes() {
        assert!(parse_mqtt_url("http://localhost").is_err());
        assert!(parse_mqtt_url(":1883").is_err());
        assert!(parse_mqtt_url("a:1:2").is_err());
    }

    #[test]
    fn open_starts_disconnected() {
        let will = LastWill {
            topic: "homie/dev/$state".to_string(),
            payload: "lost".to_string(),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        let session = MqttSession::open(&MqttConfig::default(), &will).unwrap();

        assert!(!session.transport.is_connected());
    }
}
