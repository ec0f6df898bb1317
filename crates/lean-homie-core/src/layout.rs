//! JSON description of the node/property tree a device announces.
//!
//! `name`, `type` and `datatype` are optional here so that a layout missing
//! them still loads; the device reports the gap at setup time and enters
//! `alert`.

use crate::device::Device;
use crate::error::SetupError;
use crate::node::Node;
use crate::property::Property;
use lean_homie_proto::DataType;
use serde::{Deserialize, Serialize};

/// Layout parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// Layout is not valid JSON or has the wrong shape
    #[error("invalid layout: {0}")]
    Invalid(String),
}

/// Nodes a device is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLayout {
    /// Nodes in announcement order
    #[serde(default)]
    pub nodes: Vec<NodeLayout>,
}

/// One node and its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLayout {
    /// Node identifier
    pub id: String,
    /// Human readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Node type
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    /// Properties in announcement order
    #[serde(default)]
    pub properties: Vec<PropertyLayout>,
}

/// One property declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyLayout {
    /// Property identifier
    pub id: String,
    /// Human readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Datatype
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<DataType>,
    /// Accepts commands on `/set`
    #[serde(default)]
    pub settable: bool,
    /// Published retained
    #[serde(default = "default_retained")]
    pub retained: bool,
    /// Unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Format constraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Seed value used as the first-boot default when it validates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
}

fn default_retained() -> bool {
    true
}

impl DeviceLayout {
    /// Parse a layout from JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        serde_json::from_str(json).map_err(|e| LayoutError::Invalid(e.to_string()))
    }

    /// Register every node and property with `device`.
    ///
    /// # Errors
    ///
    /// Returns error if the device structure is already frozen.
    pub fn apply(&self, device: &mut Device) -> Result<(), SetupError> {
        for node_layout in &self.nodes {
            let mut node = Node::new(&node_layout.id);
            if let Some(name) = &node_layout.name {
                node = node.with_name(name);
            }
            if let Some(node_type) = &node_layout.node_type {
                node = node.with_type(node_type);
            }

            let node = device.add_node(node)?;
            for property in &node_layout.properties {
                node.add_property(property.to_property());
            }
            tracing::debug!(
                node = %node_layout.id,
                properties = node_layout.properties.len(),
                "Node registered from layout"
            );
        }
        Ok(())
    }

    /// Total number of declared properties.
    #[must_use]
    pub fn property_count(&self) -> usize {
        self.nodes.iter().map(|n| n.properties.len()).sum()
    }
}

impl PropertyLayout {
    /// Build the property this entry declares.
    #[must_use]
    pub fn to_property(&self) -> Property {
        let mut property = Property::untyped(&self.id)
            .settable(self.settable)
            .retained(self.retained);
        if let Some(datatype) = self.datatype {
            property = property.with_datatype(datatype);
        }
        if let Some(name) = &self.name {
            property = property.with_name(name);
        }
        if let Some(unit) = &self.unit {
            property = property.with_unit(unit);
        }
        if let Some(format) = &self.format {
            property = property.with_format(format);
        }
        if let Some(initial) = &self.initial {
            property = property.with_initial_value(initial);
        }
        property
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, StaticLink};
    use std::sync::Arc;

    const ENGINE: &str = r#"{"nodes":[{"id":"engine","name":"Car Engine","type":"V8","properties":[
        {"id":"speed","name":"Speed","datatype":"integer","unit":"km/h","format":"0:200","initial":"0"},
        {"id":"mode","name":"Mode","datatype":"enum","format":"eco,sport","settable":true,"retained":false}]}]}"#;

    #[test]
    fn parses_defaults() {
        let layout = DeviceLayout::from_json(ENGINE).unwrap();

        assert_eq!(layout.property_count(), 2);
        let speed = &layout.nodes[0].properties[0];
        assert!(speed.retained);
        assert!(!speed.settable);
        assert_eq!(speed.datatype, Some(DataType::Integer));
        assert_eq!(layout.nodes[0].node_type.as_deref(), Some("V8"));
    }

    #[test]
    fn rejects_unknown_datatype() {
        let err = DeviceLayout::from_json(r#"{"nodes":[{"id":"n","properties":[{"id":"p","datatype":"blob"}]}]}"#)
            .unwrap_err();

        assert!(matches!(err, LayoutError::Invalid(_)));
    }

    #[test]
    fn empty_object_is_empty_layout() {
        assert_eq!(DeviceLayout::from_json("{}").unwrap(), DeviceLayout::default());
    }

    #[test]
    fn applies_to_device() {
        let transport = Arc::new(MemoryTransport::new());
        let link = Arc::new(StaticLink::new("00:00:00:00:00:00", None));
        let mut device = Device::new("homie", "car", transport.clone(), link);
        device.set_name("Car");

        DeviceLayout::from_json(ENGINE).unwrap().apply(&mut device).unwrap();
        device.setup().unwrap();

        let mode = device.property("engine", "mode").unwrap();
        assert!(mode.is_settable());
        assert!(!mode.is_retained());
        assert_eq!(
            transport.last_payload("homie/car/engine/speed/$unit").as_deref(),
            Some("km/h")
        );
        assert_eq!(device.route("homie/car/engine/mode/set").map(|k| k.property), Some(1));
    }

    #[test]
    fn missing_node_type_surfaces_at_setup() {
        let transport = Arc::new(MemoryTransport::new());
        let link = Arc::new(StaticLink::new("00:00:00:00:00:00", None));
        let mut device = Device::new("homie", "car", transport, link);
        device.set_name("Car");

        DeviceLayout::from_json(r#"{"nodes":[{"id":"engine","name":"Engine"}]}"#)
            .unwrap()
            .apply(&mut device)
            .unwrap();

        assert!(device.setup().is_err());
        assert_eq!(device.state(), lean_homie_proto::DeviceState::Alert);
    }
}
