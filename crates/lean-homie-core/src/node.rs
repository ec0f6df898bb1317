//! Nodes: named groups of properties.

use crate::error::SetupError;
use crate::property::Property;
use crate::transport::{self, Transport};
use lean_homie_proto::topics::attr;
use lean_homie_proto::NodeTopic;
use std::sync::Arc;

/// A named grouping of properties within a device.
pub struct Node {
    id: String,
    name: Option<String>,
    node_type: Option<String>,
    properties: Vec<Property>,
    binding: Option<(NodeTopic, Arc<dyn Transport>)>,
}

impl Node {
    /// Create a node without name or type.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            node_type: None,
            properties: Vec::new(),
            binding: None,
        }
    }

    /// Set the human readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the node type.
    #[must_use]
    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    /// Add a property and return it for further configuration.
    pub fn add_property(&mut self, mut property: Property) -> &mut Property {
        if let Some((topic, transport)) = &self.binding {
            property.bind(topic, transport.clone());
        }
        let index = self.properties.len();
        self.properties.push(property);
        &mut self.properties[index]
    }

    pub(crate) fn bind(&mut self, topic: NodeTopic, transport: Arc<dyn Transport>) {
        for property in &mut self.properties {
            property.bind(&topic, transport.clone());
        }
        self.binding = Some((topic, transport));
    }

    /// Node identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human readable name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Node type.
    #[must_use]
    pub fn node_type(&self) -> Option<&str> {
        self.node_type.as_deref()
    }

    /// Base topic, once attached to a device.
    #[must_use]
    pub fn topic(&self) -> Option<&NodeTopic> {
        self.binding.as_ref().map(|(topic, _)| topic)
    }

    /// Properties in registration order.
    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Mutable access to the properties.
    pub fn properties_mut(&mut self) -> &mut [Property] {
        &mut self.properties
    }

    /// Find a property by id.
    #[must_use]
    pub fn find_property(&self, id: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.id() == id)
    }

    /// Find a property by id, mutably.
    pub fn find_property_mut(&mut self, id: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.id() == id)
    }

    /// Announce `$name`, `$type` and `$properties`, then set up every
    /// property, stopping at the first failure.
    ///
    /// Returns `(property index, topic)` routes.
    ///
    /// # Errors
    ///
    /// Returns error if name, type or id is unset, or a property fails.
    pub fn setup(&self) -> Result<Vec<(usize, String)>, SetupError> {
        if self.id.is_empty() {
            return Err(SetupError::missing("node", &self.id, "id"));
        }
        let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) else {
            return Err(SetupError::missing("node", &self.id, "name"));
        };
        let Some(node_type) = self.node_type.as_deref().filter(|t| !t.is_empty()) else {
            return Err(SetupError::missing("node", &self.id, "type"));
        };
        let Some((topic, transport)) = &self.binding else {
            return Err(SetupError::Unbound(self.id.clone()));
        };

        tracing::debug!(node = %self.id, properties = self.properties.len(), "Setting up node");

        let transport = transport.as_ref();
        let property_ids = self
            .properties
            .iter()
            .map(Property::id)
            .collect::<Vec<_>>()
            .join(",");
        transport::announce(transport, &topic.attribute(attr::NAME), name);
        transport::announce(transport, &topic.attribute(attr::TYPE), node_type);
        transport::announce(transport, &topic.attribute(attr::PROPERTIES), &property_ids);

        let mut routes = Vec::new();
        for (index, property) in self.properties.iter().enumerate() {
            let topics = property.setup().map_err(|err| {
                tracing::error!(node = %self.id, property = %property.id(), error = %err, "Property setup failed");
                err
            })?;
            routes.extend(topics.into_iter().map(|topic| (index, topic)));
        }
        Ok(routes)
    }

    /// Re-subscribe every property.
    ///
    /// Unlike [`setup`](Self::setup), property failures are logged and
    /// skipped, not propagated.
    #[must_use]
    pub fn init(&self) -> Vec<(usize, String)> {
        let mut routes = Vec::new();
        for (index, property) in self.properties.iter().enumerate() {
            match property.init() {
                Ok(topics) => routes.extend(topics.into_iter().map(|topic| (index, topic))),
                Err(err) => {
                    tracing::warn!(node = %self.id, error = %err, "Skipping property on init");
                }
            }
        }
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use lean_homie_proto::{DataType, DeviceTopic};

    fn bound(node: Node) -> (Node, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let mut node = node;
        node.bind(DeviceTopic::new("homie", "dev").node(node.id()), transport.clone());
        (node, transport)
    }

    #[test]
    fn setup_announces_property_list() {
        let (mut node, transport) = bound(Node::new("engine").with_name("Engine").with_type("V8"));
        node.add_property(Property::new("speed", DataType::Integer).with_name("Speed"));
        node.add_property(Property::new("temp", DataType::Float).with_name("Temperature"));

        let routes = node.setup().unwrap();

        assert_eq!(
            transport.last_payload("homie/dev/engine/$properties"),
            Some("speed,temp".to_string())
        );
        assert_eq!(
            transport.last_payload("homie/dev/engine/$type"),
            Some("V8".to_string())
        );
        assert_eq!(
            routes,
            vec![
                (0, "homie/dev/engine/speed".to_string()),
                (1, "homie/dev/engine/temp".to_string()),
            ]
        );
    }

    #[test]
    fn setup_requires_type() {
        let (node, transport) = bound(Node::new("engine").with_name("Engine"));

        assert_eq!(
            node.setup(),
            Err(SetupError::missing("node", "engine", "type"))
        );
        assert!(transport.published().is_empty());
    }

    #[test]
    fn setup_stops_at_first_bad_property() {
        let (mut node, transport) = bound(Node::new("engine").with_name("Engine").with_type("V8"));
        node.add_property(Property::new("speed", DataType::Integer));
        node.add_property(Property::new("temp", DataType::Float).with_name("Temperature"));

        assert!(node.setup().is_err());
        assert!(transport
            .last_payload("homie/dev/engine/temp/$name")
            .is_none());
    }

    #[test]
    fn init_skips_bad_property_without_failing() {
        let (mut node, _) = bound(Node::new("engine").with_name("Engine").with_type("V8"));
        node.add_property(Property::new("speed", DataType::Integer));
        node.add_property(
            Property::new("temp", DataType::Float)
                .with_name("Temperature")
                .settable(true),
        );

        // setup refuses the node, init quietly routes the healthy property
        assert!(node.setup().is_err());
        let routes = node.init();
        assert_eq!(
            routes,
            vec![
                (1, "homie/dev/engine/temp/set".to_string()),
                (1, "homie/dev/engine/temp".to_string()),
            ]
        );
    }

    #[test]
    fn properties_added_after_binding_get_topics() {
        let (mut node, _) = bound(Node::new("engine").with_name("Engine").with_type("V8"));
        let property = node.add_property(Property::new("rpm", DataType::Integer));

        assert_eq!(
            property.topic().map(|t| t.as_str().to_string()),
            Some("homie/dev/engine/rpm".to_string())
        );
        assert!(node.find_property("rpm").is_some());
        assert!(node.find_property("speed").is_none());
    }
}
