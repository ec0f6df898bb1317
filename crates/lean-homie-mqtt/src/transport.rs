//! `Transport` implementation over a `rumqttc` client.

use lean_homie_core::{QoS, Transport, TransportError};
use rumqttc::AsyncClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Publishing half of the session.
///
/// Requests are queued without blocking; the event pump flushes them.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    pub(crate) fn new(client: AsyncClient) -> Self {
        Self {
            client,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

pub(crate) fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

impl Transport for MqttTransport {
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &str,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.client
            .try_publish(topic, to_mqtt_qos(qos), retain, payload.as_bytes().to_vec())
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.client
            .try_subscribe(topic, to_mqtt_qos(qos))
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| TransportError::Unsubscribe(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
