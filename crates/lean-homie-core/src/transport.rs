//! Collaborator seams: the publish/subscribe transport and the link layer.
//!
//! The device model only talks to these traits. `MemoryTransport` records
//! traffic instead of sending it and backs the tests and the CLI dry-run.

use crate::error::TransportError;
use lean_homie_proto::topics::attr;
use lean_homie_proto::{DeviceState, DeviceTopic};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Delivery quality requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoS {
    /// Fire and forget
    AtMostOnce,
    /// Acknowledged delivery
    AtLeastOnce,
    /// Assured single delivery
    ExactlyOnce,
}

/// Publish/subscribe client capability consumed by the device.
///
/// Calls must not block; implementations queue work for their own I/O loop.
pub trait Transport: Send + Sync {
    /// Publish a payload.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the request.
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &str)
        -> Result<(), TransportError>;

    /// Subscribe to a topic.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the request.
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Unsubscribe from a topic.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the request.
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Whether a broker session is currently established.
    fn is_connected(&self) -> bool;
}

/// Link-layer connectivity (the network below the transport).
pub trait Connectivity: Send + Sync {
    /// Whether the link currently has a usable address.
    fn is_link_up(&self) -> bool;

    /// Hardware address announced as `$mac`.
    fn mac_address(&self) -> String;

    /// Address announced as `$localip`.
    fn local_ip(&self) -> Option<IpAddr>;
}

/// A message received from the broker, queued for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on
    pub topic: String,
    /// UTF-8 payload
    pub payload: String,
    /// Whether the broker delivered it from its retained store
    pub retained: bool,
}

impl InboundMessage {
    /// Create a live (non-retained) message.
    #[must_use]
    pub fn live(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }

    /// Create a message delivered from the broker's retained store.
    #[must_use]
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: true,
        }
    }
}

/// Last-will registration handed to the transport when it is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    /// Will topic
    pub topic: String,
    /// Will payload
    pub payload: String,
    /// Will QoS
    pub qos: QoS,
    /// Whether the will is retained
    pub retain: bool,
}

impl LastWill {
    /// `$state` = `lost`, QoS 1, retained.
    #[must_use]
    pub fn lost(device: &DeviceTopic) -> Self {
        Self {
            topic: device.attribute(attr::STATE),
            payload: DeviceState::Lost.as_str().to_string(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }
}

/// Connectivity events driving the device lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Link layer acquired an address
    LinkUp,
    /// Link layer lost connectivity
    LinkDown,
    /// Broker session established
    TransportConnected,
    /// Broker session lost, with the reason
    TransportDisconnected(String),
}

/// Publish a retained QoS 1 payload, logging failures.
pub(crate) fn announce(transport: &dyn Transport, topic: &str, payload: &str) {
    if let Err(err) = transport.publish(topic, QoS::AtLeastOnce, true, payload) {
        tracing::warn!(error = %err, topic, "Failed to publish");
    }
}

/// Subscribe with QoS 1, logging failures.
pub(crate) fn subscribe(transport: &dyn Transport, topic: &str) {
    tracing::debug!(topic, "Subscribing");
    if let Err(err) = transport.subscribe(topic, QoS::AtLeastOnce) {
        tracing::warn!(error = %err, topic, "Failed to subscribe");
    }
}

/// Unsubscribe, logging failures.
pub(crate) fn unsubscribe(transport: &dyn Transport, topic: &str) {
    tracing::debug!(topic, "Unsubscribing");
    if let Err(err) = transport.unsubscribe(topic) {
        tracing::warn!(error = %err, topic, "Failed to unsubscribe");
    }
}

/// A publish recorded by `MemoryTransport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Topic
    pub topic: String,
    /// Payload
    pub payload: String,
    /// Requested QoS
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
}

#[derive(Debug, Default)]
struct Recorded {
    published: Vec<Publication>,
    subscriptions: BTreeSet<String>,
    unsubscribed: Vec<String>,
}

/// Transport that records traffic in memory.
#[derive(Debug)]
pub struct MemoryTransport {
    recorded: Mutex<Recorded>,
    connected: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create a connected in-memory transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            recorded: Mutex::new(Recorded::default()),
            connected: AtomicBool::new(true),
        }
    }

    /// Simulate a connect or disconnect.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every publish so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<Publication> {
        self.recorded().published.clone()
    }

    /// Payloads published on one topic, in order.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.recorded()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.clone())
            .collect()
    }

    /// Most recent payload published on a topic.
    #[must_use]
    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.recorded()
            .published
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .map(|p| p.payload.clone())
    }

    /// Currently active subscriptions, sorted.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.recorded().subscriptions.iter().cloned().collect()
    }

    /// Every unsubscribe so far, in order.
    #[must_use]
    pub fn unsubscribed(&self) -> Vec<String> {
        self.recorded().unsubscribed.clone()
    }

    /// Forget recorded publishes and unsubscribes (subscriptions stay).
    pub fn clear(&self) {
        let mut recorded = self.recorded();
        recorded.published.clear();
        recorded.unsubscribed.clear();
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl Transport for MemoryTransport {
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &str,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.recorded().published.push(Publication {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.recorded().subscriptions.insert(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut recorded = self.recorded();
        recorded.subscriptions.remove(topic);
        recorded.unsubscribed.push(topic.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Link with a fixed identity.
#[derive(Debug)]
pub struct StaticLink {
    mac: String,
    ip: Option<IpAddr>,
    up: AtomicBool,
}

impl StaticLink {
    /// Create a link that is up.
    #[must_use]
    pub fn new(mac: impl Into<String>, ip: Option<IpAddr>) -> Self {
        Self {
            mac: mac.into(),
            ip,
            up: AtomicBool::new(true),
        }
    }

    /// Simulate link loss or recovery.
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

impl Connectivity for StaticLink {
    fn is_link_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    fn mac_address(&self) -> String {
        self.mac.clone()
    }

    fn local_ip(&self) -> Option<IpAddr> {
        self.ip
    }
}
