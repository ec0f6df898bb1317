//! The device: node/stat tree, lifecycle state machine and inbound dispatch.

use crate::error::SetupError;
use crate::node::Node;
use crate::property::Property;
use crate::stat::Stat;
use crate::transport::{self, Connectivity, InboundMessage, LastWill, Transport};
use chrono::{DateTime, Utc};
use lean_homie_proto::topics::{attr, is_command_topic};
use lean_homie_proto::{DeviceState, DeviceTopic, HOMIE_VERSION};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Observer notified of every state transition.
pub type StateObserver = Box<dyn Fn(DeviceState) + Send>;

/// Observer notified once the first reconciliation has published defaults.
pub type SetupDoneObserver = Box<dyn Fn(&Device) + Send>;

/// Position of a property in the device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyKey {
    /// Node index in registration order
    pub node: usize,
    /// Property index within the node
    pub property: usize,
}

/// A Homie device: the root of the node/property tree.
pub struct Device {
    id: String,
    name: Option<String>,
    topic: DeviceTopic,
    extensions: String,
    pub(crate) state: DeviceState,
    pub(crate) nodes: Vec<Node>,
    stats: Vec<Stat>,
    stats_interval: Duration,
    pub(crate) routes: HashMap<String, PropertyKey>,
    pub(crate) setup_done: bool,
    connected_at: Option<DateTime<Utc>>,
    pub(crate) transport: Arc<dyn Transport>,
    link: Arc<dyn Connectivity>,
    state_observers: Vec<StateObserver>,
    pub(crate) setup_done_observers: Vec<SetupDoneObserver>,
}

impl Device {
    /// Create a device under `{root}/{id}/`, in state `lost`.
    #[must_use]
    pub fn new(
        root: &str,
        id: impl Into<String>,
        transport: Arc<dyn Transport>,
        link: Arc<dyn Connectivity>,
    ) -> Self {
        let id = id.into();
        let topic = DeviceTopic::new(root, &id);
        tracing::info!(device = %id, base_topic = topic.as_str(), "Device created");

        Self {
            id,
            name: None,
            topic,
            extensions: String::new(),
            state: DeviceState::Lost,
            nodes: Vec::new(),
            stats: Vec::new(),
            stats_interval: Duration::from_secs(60),
            routes: HashMap::new(),
            setup_done: false,
            connected_at: None,
            transport,
            link,
            state_observers: Vec::new(),
            setup_done_observers: Vec::new(),
        }
    }

    /// Device identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human readable name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set the human readable name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Set the `$extensions` payload.
    pub fn set_extensions(&mut self, extensions: impl Into<String>) {
        self.extensions = extensions.into();
    }

    /// Base topic.
    #[must_use]
    pub fn topic(&self) -> &DeviceTopic {
        &self.topic
    }

    /// Last will to register with the transport: `$state` = `lost`.
    #[must_use]
    pub fn last_will(&self) -> LastWill {
        LastWill::lost(&self.topic)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Whether the first reconciliation has completed in this process.
    #[must_use]
    pub fn is_setup_done(&self) -> bool {
        self.setup_done
    }

    /// When the transport last connected.
    #[must_use]
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// Telemetry interval.
    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        self.stats_interval
    }

    /// Set the telemetry interval.
    pub fn set_stats_interval(&mut self, interval: Duration) {
        self.stats_interval = interval;
    }

    /// The transport this device publishes through.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Whether the link layer is up.
    #[must_use]
    pub fn is_link_up(&self) -> bool {
        self.link.is_link_up()
    }

    /// Register a node and return it for further configuration.
    ///
    /// # Errors
    ///
    /// Returns error once the first reconciliation has completed.
    pub fn add_node(&mut self, mut node: Node) -> Result<&mut Node, SetupError> {
        if self.setup_done {
            return Err(SetupError::Frozen);
        }
        node.bind(self.topic.node(node.id()), self.transport.clone());
        let index = self.nodes.len();
        self.nodes.push(node);
        Ok(&mut self.nodes[index])
    }

    /// Register a stat fed by `sampler`.
    ///
    /// # Errors
    ///
    /// Returns error once the first reconciliation has completed.
    pub fn add_stat(
        &mut self,
        id: impl Into<String>,
        sampler: impl FnMut() -> String + Send + 'static,
    ) -> Result<&mut Stat, SetupError> {
        if self.setup_done {
            return Err(SetupError::Frozen);
        }
        let id = id.into();
        let topic = self.topic.stat(&id);
        let index = self.stats.len();
        self.stats.push(Stat::new(id, topic, Box::new(sampler)));
        Ok(&mut self.stats[index])
    }

    /// Nodes in registration order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Mutable access to the nodes.
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// Stats in registration order.
    #[must_use]
    pub fn stats(&self) -> &[Stat] {
        &self.stats
    }

    /// Find a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Find a node by id, mutably.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id() == id)
    }

    /// Find a property by node and property id.
    #[must_use]
    pub fn property(&self, node_id: &str, property_id: &str) -> Option<&Property> {
        self.node(node_id)?.find_property(property_id)
    }

    /// Find a property by node and property id, mutably.
    pub fn property_mut(&mut self, node_id: &str, property_id: &str) -> Option<&mut Property> {
        self.node_mut(node_id)?.find_property_mut(property_id)
    }

    pub(crate) fn property_at(&self, key: PropertyKey) -> Option<&Property> {
        self.nodes.get(key.node)?.properties().get(key.property)
    }

    pub(crate) fn property_at_mut(&mut self, key: PropertyKey) -> Option<&mut Property> {
        self.nodes
            .get_mut(key.node)?
            .properties_mut()
            .get_mut(key.property)
    }

    /// Property routed for a topic, if any.
    #[must_use]
    pub fn route(&self, topic: &str) -> Option<PropertyKey> {
        self.routes.get(topic).copied()
    }

    /// Number of routed topics.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Add a state-change observer; observers run in registration order.
    pub fn on_state_changed(&mut self, observer: impl Fn(DeviceState) + Send + 'static) {
        self.state_observers.push(Box::new(observer));
    }

    /// Add an observer for the end of the first reconciliation.
    pub fn on_setup_done(&mut self, observer: impl Fn(&Device) + Send + 'static) {
        self.setup_done_observers.push(Box::new(observer));
    }

    /// Transition to `state`, notifying every observer synchronously.
    pub fn set_state(&mut self, state: DeviceState) {
        tracing::info!(device = %self.id, from = %self.state, to = %state, "Device state changed");
        self.state = state;
        for observer in &self.state_observers {
            observer(state);
        }
    }

    /// Publish the current state on `$state`.
    pub fn publish_state(&self) {
        transport::announce(
            self.transport.as_ref(),
            &self.topic.attribute(attr::STATE),
            self.state.as_str(),
        );
    }

    /// Record a transport connection.
    pub fn mark_connected(&mut self) {
        self.connected_at = Some(Utc::now());
    }

    /// Handle loss of the broker session.
    ///
    /// The transport reconnects on its own while the link stays up; with
    /// the link down it waits for the link first.
    pub fn on_transport_disconnected(&mut self) {
        if self.is_link_up() {
            tracing::info!(device = %self.id, "Transport lost with link up, reconnect pending");
        } else {
            tracing::warn!(device = %self.id, "Transport lost with link down");
        }
        self.set_state(DeviceState::Lost);
    }

    fn check_identity(&mut self) -> Result<(), SetupError> {
        let missing = if self.id.is_empty() {
            Some("id")
        } else if self.name.as_deref().map_or(true, str::is_empty) {
            Some("name")
        } else {
            None
        };

        if let Some(field) = missing {
            let err = SetupError::missing("device", &self.id, field);
            tracing::error!(error = %err, "Device is misconfigured");
            self.set_state(DeviceState::Alert);
            return Err(err);
        }
        Ok(())
    }

    /// Full setup: announce device metadata and every node.
    ///
    /// # Errors
    ///
    /// Returns error (and enters `alert`) if the device or any node is
    /// misconfigured.
    pub fn setup(&mut self) -> Result<(), SetupError> {
        self.check_identity()?;

        tracing::info!(device = %self.id, base_topic = self.topic.as_str(), "Device setup");
        self.set_state(DeviceState::Init);

        let stat_ids = self.stats.iter().map(Stat::id).collect::<Vec<_>>().join(",");
        let node_ids = self.nodes.iter().map(Node::id).collect::<Vec<_>>().join(",");
        let interval = self.stats_interval.as_secs().to_string();
        let name = self.name.clone().unwrap_or_default();
        let mac = self.link.mac_address();
        let local_ip = self.local_ip();

        let announcements = [
            (attr::STATE, self.state.as_str()),
            (attr::HOMIE, HOMIE_VERSION),
            (attr::NAME, name.as_str()),
            (attr::EXTENSIONS, self.extensions.as_str()),
            (attr::MAC, mac.as_str()),
            (attr::LOCALIP, local_ip.as_str()),
            (attr::STATS_INTERVAL, interval.as_str()),
            (attr::STATS, stat_ids.as_str()),
            (attr::NODES, node_ids.as_str()),
        ];
        for (attribute, payload) in announcements {
            transport::announce(
                self.transport.as_ref(),
                &self.topic.attribute(attribute),
                payload,
            );
        }

        let mut routes = Vec::new();
        let mut failure = None;
        for (node_index, node) in self.nodes.iter().enumerate() {
            match node.setup() {
                Ok(node_routes) => routes.extend(
                    node_routes
                        .into_iter()
                        .map(|(property, topic)| (topic, PropertyKey { node: node_index, property })),
                ),
                Err(err) => {
                    tracing::error!(node = %node.id(), error = %err, "Node setup failed");
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            self.set_state(DeviceState::Alert);
            return Err(err);
        }
        self.register_routes(routes);
        Ok(())
    }

    /// Re-announcement after a reconnect: `$localip` and subscriptions.
    ///
    /// # Errors
    ///
    /// Returns error (and enters `alert`) if the device is misconfigured.
    pub fn init(&mut self) -> Result<(), SetupError> {
        self.check_identity()?;

        tracing::info!(device = %self.id, base_topic = self.topic.as_str(), "Device init");
        self.set_state(DeviceState::Init);

        let local_ip = self.local_ip();
        transport::announce(
            self.transport.as_ref(),
            &self.topic.attribute(attr::LOCALIP),
            &local_ip,
        );

        let routes: Vec<_> = self
            .nodes
            .iter()
            .enumerate()
            .flat_map(|(node_index, node)| {
                node.init()
                    .into_iter()
                    .map(move |(property, topic)| (topic, PropertyKey { node: node_index, property }))
            })
            .collect();
        self.register_routes(routes);
        Ok(())
    }

    /// Full setup on the first connection of this process, init afterwards.
    ///
    /// # Errors
    ///
    /// Returns error if the transport is down or the device is misconfigured.
    pub fn setup_or_init(&mut self) -> Result<(), SetupError> {
        if !self.transport.is_connected() {
            tracing::warn!(device = %self.id, "Transport not connected, skipping setup");
            return Err(SetupError::NotConnected);
        }
        if self.setup_done {
            self.init()
        } else {
            self.setup()
        }
    }

    fn register_routes(&mut self, routes: Vec<(String, PropertyKey)>) {
        for (topic, key) in routes {
            tracing::debug!(topic, node = key.node, property = key.property, "Routing topic");
            self.routes.insert(topic, key);
        }
    }

    fn local_ip(&self) -> String {
        self.link
            .local_ip()
            .map_or_else(|| "0.0.0.0".to_string(), |ip| ip.to_string())
    }

    /// Route a message to its property (steady state).
    ///
    /// The payload is applied only if it differs from the cached value, so
    /// the device ignores echoes of its own publishes. Returns whether the
    /// property was updated.
    pub fn dispatch(&mut self, message: &InboundMessage) -> bool {
        let Some(key) = self.route(&message.topic) else {
            tracing::trace!(topic = %message.topic, "No route for topic");
            return false;
        };
        if message.retained && is_command_topic(&message.topic) {
            tracing::debug!(topic = %message.topic, "Ignoring retained command");
            return false;
        }
        let Some(property) = self.property_at_mut(key) else {
            return false;
        };
        if property.value() == message.payload {
            tracing::trace!(topic = %message.topic, "Payload matches cached value");
            return false;
        }

        tracing::debug!(
            topic = %message.topic,
            property = %property.id(),
            payload = %message.payload,
            "Applying inbound value"
        );
        property.apply(&message.payload);
        true
    }

    /// Whether any stat is registered.
    #[must_use]
    pub fn has_stats(&self) -> bool {
        !self.stats.is_empty()
    }

    /// Sample and publish every stat while connected. Returns the number
    /// published.
    pub fn publish_stats(&mut self) -> usize {
        if self.stats.is_empty() || !self.transport.is_connected() {
            return 0;
        }
        for stat in &mut self.stats {
            stat.publish(self.transport.as_ref());
        }
        self.stats.len()
    }
}
