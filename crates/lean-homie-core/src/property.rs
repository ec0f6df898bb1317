//! Properties: typed, optionally settable values owned by a node.

use crate::error::SetupError;
use crate::transport::{self, QoS, Transport};
use crate::value;
use lean_homie_proto::topics::attr;
use lean_homie_proto::{DataType, NodeTopic, PropertyTopic};
use std::sync::Arc;

/// Handler invoked with the incoming payload whenever a value arrives from
/// the broker (command, restored value or first-boot default).
///
/// The handler owns the decision: it stores a value with
/// [`Property::set_value`] or leaves the property untouched.
pub type SetHandler = Box<dyn FnMut(&mut Property, &str) + Send>;

struct Binding {
    topic: PropertyTopic,
    command_topic: String,
    transport: Arc<dyn Transport>,
}

/// A single observable, optionally settable attribute of a node.
pub struct Property {
    id: String,
    name: Option<String>,
    datatype: Option<DataType>,
    settable: bool,
    retained: bool,
    unit: Option<String>,
    format: Option<String>,
    value: String,
    handler: Option<SetHandler>,
    binding: Option<Binding>,
    publishes: u64,
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.id)
            .field("datatype", &self.datatype)
            .field("settable", &self.settable)
            .field("retained", &self.retained)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl Property {
    /// Create a retained, non-settable property holding the datatype default.
    #[must_use]
    pub fn new(id: impl Into<String>, datatype: DataType) -> Self {
        Self::untyped(id).with_datatype(datatype)
    }

    /// Create a property whose datatype is declared later.
    ///
    /// Setup fails until a datatype is set.
    #[must_use]
    pub fn untyped(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            datatype: None,
            settable: false,
            retained: true,
            unit: None,
            format: None,
            value: String::new(),
            handler: None,
            binding: None,
            publishes: 0,
        }
    }

    /// Declare the datatype, resetting the value to its default.
    #[must_use]
    pub fn with_datatype(mut self, datatype: DataType) -> Self {
        self.datatype = Some(datatype);
        self.value = String::with_capacity(datatype.initial_capacity());
        self.value.push_str(datatype.default_value());
        self
    }

    /// Set the human readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Accept commands on the `/set` topic.
    #[must_use]
    pub fn settable(mut self, settable: bool) -> Self {
        self.settable = settable;
        self
    }

    /// Publish values retained (and restore them on reconnect).
    #[must_use]
    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Set the unit published as `$unit`.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the format constraint published as `$format`.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Seed the value before the first connection.
    ///
    /// The seed is stored as given; it is validated when the first
    /// reconciliation publishes defaults.
    #[must_use]
    pub fn with_initial_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    /// Install the set handler.
    #[must_use]
    pub fn on_set(mut self, handler: impl FnMut(&mut Property, &str) + Send + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Replace the set handler.
    pub fn set_handler(&mut self, handler: impl FnMut(&mut Property, &str) + Send + 'static) {
        self.handler = Some(Box::new(handler));
    }

    pub(crate) fn bind(&mut self, node_topic: &NodeTopic, transport: Arc<dyn Transport>) {
        let topic = node_topic.property(&self.id);
        let command_topic = topic.command();
        self.binding = Some(Binding {
            topic,
            command_topic,
            transport,
        });
    }

    /// Property identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human readable name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Declared datatype.
    #[must_use]
    pub fn datatype(&self) -> Option<DataType> {
        self.datatype
    }

    /// Whether commands are accepted.
    #[must_use]
    pub fn is_settable(&self) -> bool {
        self.settable
    }

    /// Whether values are published retained.
    #[must_use]
    pub fn is_retained(&self) -> bool {
        self.retained
    }

    /// Unit, if any.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Format constraint, if any.
    #[must_use]
    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// Whether a set handler is installed.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Direct topic, once attached to a node.
    #[must_use]
    pub fn topic(&self) -> Option<&PropertyTopic> {
        self.binding.as_ref().map(|binding| &binding.topic)
    }

    /// Command topic, once attached to a node.
    #[must_use]
    pub fn command_topic(&self) -> Option<&str> {
        self.binding
            .as_ref()
            .map(|binding| binding.command_topic.as_str())
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Current value as an integer.
    #[must_use]
    pub fn value_as_i64(&self) -> Option<i64> {
        self.value.parse().ok()
    }

    /// Current value as a float.
    #[must_use]
    pub fn value_as_f64(&self) -> Option<f64> {
        self.value.parse().ok()
    }

    /// Whether the current value is `true`.
    #[must_use]
    pub fn value_as_bool(&self) -> bool {
        self.value == "true"
    }

    /// Check a payload against this property's datatype and format.
    #[must_use]
    pub fn validate(&self, value: &str) -> bool {
        self.datatype
            .is_some_and(|datatype| value::validate(datatype, self.format.as_deref(), value))
    }

    /// Store a value and, for retained properties, publish it.
    ///
    /// Empty or invalid payloads store the datatype default instead. With
    /// `via_command` the value goes to the `/set` topic, so the device
    /// receives it back as a command.
    pub fn set_value(&mut self, raw: &str, via_command: bool) {
        let Some(datatype) = self.datatype else {
            tracing::warn!(property = %self.id, "Ignoring value for property without datatype");
            return;
        };

        let normalized = value::normalize(datatype, self.format.as_deref(), raw);
        if normalized.defaulted && !raw.is_empty() {
            tracing::warn!(
                property = %self.id,
                payload = raw,
                fallback = %normalized.value,
                "Invalid value, using datatype default"
            );
        }

        if normalized.value.len() > self.value.capacity() {
            tracing::warn!(
                property = %self.id,
                capacity = self.value.capacity(),
                required = normalized.value.len(),
                "Value exceeds buffer, growing"
            );
        }
        self.value.clear();
        self.value.push_str(&normalized.value);

        self.publish(via_command);
    }

    /// Publish the stored value on the direct topic.
    ///
    /// A stored value that does not validate is replaced by the declared
    /// default first. Non-retained properties publish nothing.
    pub fn publish_current(&mut self) {
        if !self.validate(&self.value) {
            if let Some(default) = self.declared_default() {
                self.set_value(&default, false);
            }
            return;
        }
        self.publish(false);
    }

    /// Publish attempts so far.
    pub(crate) fn publish_count(&self) -> u64 {
        self.publishes
    }

    fn publish(&mut self, via_command: bool) {
        if !self.retained {
            return;
        }

        let Some(binding) = &self.binding else {
            return;
        };
        let topic = if via_command {
            binding.command_topic.as_str()
        } else {
            binding.topic.as_str()
        };
        tracing::debug!(property = %self.id, topic, value = %self.value, "Publishing value");
        if let Err(err) = binding
            .transport
            .publish(topic, QoS::AtLeastOnce, true, &self.value)
        {
            tracing::warn!(error = %err, property = %self.id, topic, "Failed to publish value");
        }
        self.publishes += 1;
    }

    /// Store a boolean value.
    pub fn set_bool(&mut self, value: bool, via_command: bool) {
        self.set_value(if value { "true" } else { "false" }, via_command);
    }

    /// Store an integer value.
    pub fn set_i64(&mut self, value: i64, via_command: bool) {
        self.set_value(&value.to_string(), via_command);
    }

    /// Apply a payload through the set handler, or store it directly.
    pub fn apply(&mut self, payload: &str) {
        if let Some(mut handler) = self.handler.take() {
            handler(self, payload);
            if self.handler.is_none() {
                self.handler = Some(handler);
            }
        } else {
            self.set_value(payload, false);
        }
    }

    /// The value published for this property when the broker has none: the
    /// current value if it validates, otherwise the datatype default.
    #[must_use]
    pub fn declared_default(&self) -> Option<String> {
        let datatype = self.datatype?;
        if self.validate(&self.value) {
            Some(self.value.clone())
        } else {
            Some(datatype.default_value().to_string())
        }
    }

    fn check_declared(&self) -> Result<&Binding, SetupError> {
        if self.id.is_empty() {
            return Err(SetupError::missing("property", &self.id, "id"));
        }
        if self.name.as_deref().map_or(true, str::is_empty) {
            return Err(SetupError::missing("property", &self.id, "name"));
        }
        if self.datatype.is_none() {
            return Err(SetupError::missing("property", &self.id, "datatype"));
        }
        self.binding
            .as_ref()
            .ok_or_else(|| SetupError::Unbound(self.id.clone()))
    }

    /// Announce metadata, then [`init`](Self::init).
    ///
    /// Returns the topics to route to this property.
    ///
    /// # Errors
    ///
    /// Returns error if id, name or datatype is unset.
    pub fn setup(&self) -> Result<Vec<String>, SetupError> {
        let binding = self.check_declared()?;
        let transport = binding.transport.as_ref();
        let topic = &binding.topic;

        tracing::debug!(property = %self.id, %topic, "Setting up property");

        let name = self.name.as_deref().unwrap_or_default();
        let datatype = self.datatype.map_or("", DataType::as_str);
        transport::announce(transport, &topic.attribute(attr::NAME), name);
        transport::announce(transport, &topic.attribute(attr::DATATYPE), datatype);
        transport::announce(
            transport,
            &topic.attribute(attr::SETTABLE),
            bool_payload(self.settable),
        );
        transport::announce(
            transport,
            &topic.attribute(attr::RETAINED),
            bool_payload(self.retained),
        );
        if let Some(unit) = &self.unit {
            transport::announce(transport, &topic.attribute(attr::UNIT), unit);
        }
        if let Some(format) = &self.format {
            transport::announce(transport, &topic.attribute(attr::FORMAT), format);
        }

        self.init()
    }

    /// Subscribe to the topics this property listens on.
    ///
    /// Returns the topics to route to this property: the command topic when
    /// settable, the direct topic when retained.
    ///
    /// # Errors
    ///
    /// Returns error if id, name or datatype is unset.
    pub fn init(&self) -> Result<Vec<String>, SetupError> {
        let binding = self.check_declared()?;
        let transport = binding.transport.as_ref();
        let mut routes = Vec::with_capacity(2);

        if self.retained {
            transport::subscribe(transport, binding.topic.as_str());
        }
        if self.settable {
            transport::subscribe(transport, &binding.command_topic);
            routes.push(binding.command_topic.clone());
        }
        if self.retained {
            routes.push(binding.topic.as_str().to_string());
        }

        Ok(routes)
    }
}

fn bool_payload(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use lean_homie_proto::DeviceTopic;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bound(property: Property) -> (Property, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let mut property = property;
        property.bind(&DeviceTopic::new("homie", "dev").node("node"), transport.clone());
        (property, transport)
    }

    #[test]
    fn invalid_payload_stores_default() {
        let (mut property, _) = bound(Property::new("on", DataType::Boolean).with_name("On"));

        property.set_value("maybe", false);
        assert_eq!(property.value(), "false");

        property.set_value("true", false);
        assert!(property.value_as_bool());
    }

    #[test]
    fn color_reserialized_on_set() {
        let (mut property, transport) = bound(
            Property::new("color", DataType::Color)
                .with_name("Color")
                .with_format("hsv"),
        );

        property.set_value("10.6,20.2,30.5", false);

        assert_eq!(property.value(), "11,20,31");
        assert_eq!(
            transport.last_payload("homie/dev/node/color"),
            Some("11,20,31".to_string())
        );
    }

    #[test]
    fn non_retained_never_publishes() {
        let (mut property, transport) = bound(
            Property::new("level", DataType::Integer)
                .with_name("Level")
                .retained(false),
        );

        property.set_value("5", false);
        property.set_value("6", true);
        property.set_value("bogus", false);

        assert_eq!(property.value(), "0");
        assert!(transport.published().is_empty());
    }

    #[test]
    fn via_command_publishes_to_set_topic() {
        let (mut property, transport) =
            bound(Property::new("level", DataType::Integer).with_name("Level"));

        property.set_i64(7, true);

        assert_eq!(transport.published_to("homie/dev/node/level/set"), vec!["7"]);
        assert!(transport.published_to("homie/dev/node/level").is_empty());
    }

    #[test]
    fn value_visible_even_if_publish_fails() {
        let (mut property, transport) =
            bound(Property::new("level", DataType::Integer).with_name("Level"));
        transport.set_connected(false);

        property.set_value("12", false);

        assert_eq!(property.value_as_i64(), Some(12));
    }

    #[test]
    fn long_value_grows_buffer() {
        let (mut property, _) = bound(
            Property::new("mode", DataType::Enum)
                .with_name("Mode")
                .with_format("off,comfort-heating"),
        );

        property.set_value("comfort-heating", false);
        assert_eq!(property.value(), "comfort-heating");
    }

    #[test]
    fn apply_uses_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let (mut property, _) = bound(
            Property::new("switch", DataType::String)
                .with_name("Switch")
                .settable(true)
                .on_set(move |property, payload| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    property.set_value(&payload.to_uppercase(), false);
                }),
        );

        property.apply("on");
        property.apply("off");

        assert_eq!(property.value(), "OFF");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(property.has_handler());
    }

    #[test]
    fn setup_requires_name_and_datatype() {
        let (property, transport) = bound(Property::new("speed", DataType::Integer));
        assert_eq!(
            property.setup(),
            Err(SetupError::missing("property", "speed", "name"))
        );

        let (property, _) = bound(Property::untyped("speed").with_name("Speed"));
        assert_eq!(
            property.setup(),
            Err(SetupError::missing("property", "speed", "datatype"))
        );
        assert!(transport.published().is_empty());
    }

    #[test]
    fn setup_announces_metadata_and_subscribes() {
        let (property, transport) = bound(
            Property::new("speed", DataType::Integer)
                .with_name("Speed")
                .with_unit("km/h")
                .settable(true),
        );

        let routes = property.setup().unwrap();

        assert_eq!(
            transport.last_payload("homie/dev/node/speed/$datatype"),
            Some("integer".to_string())
        );
        assert_eq!(
            transport.last_payload("homie/dev/node/speed/$settable"),
            Some("true".to_string())
        );
        assert_eq!(
            transport.last_payload("homie/dev/node/speed/$unit"),
            Some("km/h".to_string())
        );
        assert!(transport.last_payload("homie/dev/node/speed/$format").is_none());
        assert_eq!(
            routes,
            vec!["homie/dev/node/speed/set", "homie/dev/node/speed"]
        );
        assert_eq!(
            transport.subscriptions(),
            vec!["homie/dev/node/speed", "homie/dev/node/speed/set"]
        );
    }

    #[test]
    fn publish_current_uses_direct_topic() {
        let (mut property, transport) = bound(
            Property::new("level", DataType::Integer)
                .with_name("Level")
                .with_initial_value("15"),
        );

        property.publish_current();
        assert_eq!(transport.published_to("homie/dev/node/level"), vec!["15"]);
        assert_eq!(property.publish_count(), 1);

        let (mut quiet, transport) = bound(
            Property::new("level", DataType::Integer)
                .with_name("Level")
                .retained(false),
        );
        quiet.publish_current();
        assert!(transport.published().is_empty());
    }

    #[test]
    fn declared_default_prefers_valid_seed() {
        let seeded = Property::new("speed", DataType::Integer).with_initial_value("30");
        assert_eq!(seeded.declared_default(), Some("30".to_string()));

        let broken = Property::new("speed", DataType::Integer).with_initial_value("fast");
        assert_eq!(broken.declared_default(), Some("0".to_string()));
    }
}
