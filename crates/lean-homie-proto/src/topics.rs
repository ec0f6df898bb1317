//! Topic derivation for devices, nodes, properties and stats.
//!
//! Topic structure: `{root}/{device_id}/{node_id}/{property_id}`
//!
//! Derivation is plain string concatenation. Callers supply identifiers free
//! of `/` and of a leading `$`.

use serde::{Deserialize, Serialize};

/// Suffix appended to a property topic to form its command topic.
pub const SET_SUFFIX: &str = "/set";

/// Attribute names published under device, node and property topics.
pub mod attr {
    /// Device lifecycle state.
    pub const STATE: &str = "$state";
    /// Convention version.
    pub const HOMIE: &str = "$homie";
    /// Human readable name (device, node, property).
    pub const NAME: &str = "$name";
    /// Supported extensions.
    pub const EXTENSIONS: &str = "$extensions";
    /// Hardware address of the link.
    pub const MAC: &str = "$mac";
    /// Local IP address of the link.
    pub const LOCALIP: &str = "$localip";
    /// Comma separated node ids.
    pub const NODES: &str = "$nodes";
    /// Comma separated stat ids.
    pub const STATS: &str = "$stats";
    /// Telemetry interval in seconds.
    pub const STATS_INTERVAL: &str = "$stats/interval";
    /// Node type.
    pub const TYPE: &str = "$type";
    /// Comma separated property ids.
    pub const PROPERTIES: &str = "$properties";
    /// Property datatype.
    pub const DATATYPE: &str = "$datatype";
    /// Whether the property accepts commands.
    pub const SETTABLE: &str = "$settable";
    /// Whether the property value is retained.
    pub const RETAINED: &str = "$retained";
    /// Unit of the property value.
    pub const UNIT: &str = "$unit";
    /// Format constraint of the property value.
    pub const FORMAT: &str = "$format";
}

/// Base topic of a device: `{root}/{device_id}/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceTopic(String);

impl DeviceTopic {
    /// Build the base topic for a device.
    #[must_use]
    pub fn new(root: &str, device_id: &str) -> Self {
        Self(format!("{root}/{device_id}/"))
    }

    /// The base topic, including the trailing separator.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Topic of a device attribute, e.g. `homie/dev/$state`.
    #[must_use]
    pub fn attribute(&self, attribute: &str) -> String {
        format!("{}{attribute}", self.0)
    }

    /// Topic of a stat value, e.g. `homie/dev/$stats/uptime`.
    #[must_use]
    pub fn stat(&self, stat_id: &str) -> String {
        format!("{}{}/{stat_id}", self.0, attr::STATS)
    }

    /// Base topic of a node owned by this device.
    #[must_use]
    pub fn node(&self, node_id: &str) -> NodeTopic {
        NodeTopic(format!("{}{node_id}/", self.0))
    }
}

/// Base topic of a node: `{device_topic}{node_id}/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeTopic(String);

impl NodeTopic {
    /// The base topic, including the trailing separator.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Topic of a node attribute, e.g. `homie/dev/engine/$type`.
    #[must_use]
    pub fn attribute(&self, attribute: &str) -> String {
        format!("{}{attribute}", self.0)
    }

    /// Topic of a property owned by this node.
    #[must_use]
    pub fn property(&self, property_id: &str) -> PropertyTopic {
        PropertyTopic(format!("{}{property_id}", self.0))
    }
}

/// Direct topic of a property: `{node_topic}{property_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyTopic(String);

impl PropertyTopic {
    /// The direct (value) topic.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The command topic, `{property_topic}/set`.
    #[must_use]
    pub fn command(&self) -> String {
        format!("{}{SET_SUFFIX}", self.0)
    }

    /// Topic of a property attribute, e.g. `homie/dev/engine/speed/$unit`.
    #[must_use]
    pub fn attribute(&self, attribute: &str) -> String {
        format!("{}/{attribute}", self.0)
    }
}

impl std::fmt::Display for PropertyTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a topic addresses a property's command channel.
#[must_use]
pub fn is_command_topic(topic: &str) -> bool {
    topic.ends_with(SET_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_topic_derivation() {
        let device = DeviceTopic::new("root", "d1");
        let property = device.node("n1").property("p1");

        assert_eq!(device.as_str(), "root/d1/");
        assert_eq!(property.as_str(), "root/d1/n1/p1");
        assert_eq!(property.command(), "root/d1/n1/p1/set");
    }

    #[test]
    fn attribute_topics() {
        let device = DeviceTopic::new("homie", "lamp");
        let node = device.node("light");
        let property = node.property("color");

        assert_eq!(device.attribute(attr::STATE), "homie/lamp/$state");
        assert_eq!(
            device.attribute(attr::STATS_INTERVAL),
            "homie/lamp/$stats/interval"
        );
        assert_eq!(node.attribute(attr::PROPERTIES), "homie/lamp/light/$properties");
        assert_eq!(property.attribute(attr::FORMAT), "homie/lamp/light/color/$format");
    }

    #[test]
    fn stat_topic() {
        let device = DeviceTopic::new("homie", "lamp");
        assert_eq!(device.stat("uptime"), "homie/lamp/$stats/uptime");
    }

    #[test]
    fn command_topic_detection() {
        assert!(is_command_topic("homie/lamp/light/color/set"));
        assert!(!is_command_topic("homie/lamp/light/color"));
        assert!(!is_command_topic("homie/lamp/light/settings"));
    }
}
