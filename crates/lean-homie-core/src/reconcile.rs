//! Retained-value reconciliation, run once per connection before `ready`.

use crate::device::{Device, PropertyKey};
use crate::transport::{self, InboundMessage};
use lean_homie_proto::topics::is_command_topic;
use lean_homie_proto::DeviceState;
use std::collections::BTreeMap;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Properties restored from a persisted value
    pub restored: usize,
    /// Properties where a pending command superseded the persisted value
    pub commanded: usize,
    /// Commands applied to properties with no persisted value
    pub leftover: usize,
    /// Properties assigned their declared default
    pub defaulted: usize,
    /// Messages dropped (unknown topic or retained command)
    pub discarded: usize,
}

impl Device {
    /// Resolve messages drained during the settle window.
    ///
    /// Pending commands win over persisted values for settable properties.
    /// On the first pass of the process, every retained property that saw
    /// neither gets its declared default published, then the structure is
    /// frozen and setup-done observers run. Always ends in `ready`.
    pub fn reconcile(&mut self, messages: Vec<InboundMessage>) -> Reconciliation {
        let mut outcome = Reconciliation::default();
        let mut received: BTreeMap<PropertyKey, String> = BTreeMap::new();
        let mut commands: BTreeMap<PropertyKey, String> = BTreeMap::new();

        for message in messages {
            let Some(key) = self.route(&message.topic) else {
                tracing::debug!(topic = %message.topic, "Discarding message without route");
                outcome.discarded += 1;
                continue;
            };
            if is_command_topic(&message.topic) {
                if message.retained {
                    tracing::debug!(topic = %message.topic, "Discarding retained command");
                    outcome.discarded += 1;
                } else {
                    commands.insert(key, message.payload);
                }
            } else {
                received.insert(key, message.payload);
            }
        }

        tracing::info!(
            device = %self.id(),
            received = received.len(),
            commands = commands.len(),
            "Reconciling retained values"
        );

        let mut resolved = Vec::new();
        for (key, persisted) in received {
            let settable = self.property_at(key).is_some_and(|p| p.is_settable());
            let value = match commands.remove(&key) {
                Some(command) if settable => {
                    outcome.commanded += 1;
                    command
                }
                _ => {
                    outcome.restored += 1;
                    persisted
                }
            };
            self.forget_direct_topic(key);
            self.apply_at(key, &value);
            resolved.push(key);
        }

        for (key, command) in commands {
            outcome.leftover += 1;
            self.forget_direct_topic(key);
            self.apply_at(key, &command);
            resolved.push(key);
        }

        if !self.setup_done {
            let pending: Vec<(PropertyKey, String)> = self
                .nodes
                .iter()
                .enumerate()
                .flat_map(|(node, n)| {
                    n.properties()
                        .iter()
                        .enumerate()
                        .map(move |(property, p)| (PropertyKey { node, property }, p))
                })
                .filter(|(key, p)| p.is_retained() && !resolved.contains(key))
                .filter_map(|(key, p)| p.declared_default().map(|value| (key, value)))
                .collect();

            for (key, value) in pending {
                outcome.defaulted += 1;
                self.forget_direct_topic(key);
                self.publish_default_at(key, &value);
            }

            self.setup_done = true;
            let observers = std::mem::take(&mut self.setup_done_observers);
            for observer in &observers {
                observer(self);
            }
            self.setup_done_observers = observers;
            tracing::info!(device = %self.id(), "First reconciliation complete");
        }

        self.set_state(DeviceState::Ready);
        self.publish_state();
        outcome
    }

    fn forget_direct_topic(&mut self, key: PropertyKey) {
        let Some(topic) = self
            .property_at(key)
            .filter(|p| p.is_retained())
            .and_then(|p| p.topic())
            .map(|t| t.as_str().to_string())
        else {
            return;
        };
        self.routes.remove(&topic);
        transport::unsubscribe(self.transport.as_ref(), &topic);
    }

    /// Apply a first-boot default. The broker must end up with a retained
    /// value even when the set handler stores or publishes nothing.
    fn publish_default_at(&mut self, key: PropertyKey, value: &str) {
        let Some(property) = self.property_at_mut(key) else {
            return;
        };
        let published = property.publish_count();
        property.apply(value);
        if property.publish_count() == published {
            tracing::debug!(property = %property.id(), "Handler did not publish default, publishing stored value");
            property.publish_current();
        }
    }

    fn apply_at(&mut self, key: PropertyKey, value: &str) {
        if let Some(property) = self.property_at_mut(key) {
            property.apply(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::property::Property;
    use crate::transport::{MemoryTransport, StaticLink};
    use lean_homie_proto::DataType;
    use std::sync::{Arc, Mutex};

    const LEVEL: &str = "homie/dev/node/level";
    const LEVEL_SET: &str = "homie/dev/node/level/set";

    fn device(level: Property) -> (Device, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let link = Arc::new(StaticLink::new("00:00:00:00:00:00", None));
        let mut device = Device::new("homie", "dev", transport.clone(), link);
        device.set_name("Dev");
        let node = device
            .add_node(Node::new("node").with_name("Node").with_type("test"))
            .unwrap();
        node.add_property(level);
        device.setup().unwrap();
        transport.clear();
        (device, transport)
    }

    fn level() -> Property {
        Property::new("level", DataType::Integer).with_name("Level")
    }

    fn batch() -> Vec<InboundMessage> {
        vec![
            InboundMessage::retained(LEVEL, "5"),
            InboundMessage::live(LEVEL_SET, "9"),
        ]
    }

    #[test]
    fn command_wins_when_settable() {
        let (mut device, _) = device(level().settable(true));

        let outcome = device.reconcile(batch());

        assert_eq!(device.property("node", "level").unwrap().value(), "9");
        assert_eq!(outcome.commanded, 1);
        assert_eq!(device.state(), DeviceState::Ready);
    }

    #[test]
    fn persisted_value_wins_when_not_settable() {
        let (mut device, transport) = device(level());

        let outcome = device.reconcile(batch());

        assert_eq!(device.property("node", "level").unwrap().value(), "5");
        assert_eq!(outcome.restored, 1);
        assert_eq!(outcome.discarded, 1);
        assert_eq!(transport.unsubscribed(), vec![LEVEL.to_string()]);
        assert_eq!(device.route(LEVEL), None);
    }

    #[test]
    fn default_published_exactly_once() {
        let (mut device, transport) = device(level().with_initial_value("12"));

        let outcome = device.reconcile(Vec::new());

        assert_eq!(outcome.defaulted, 1);
        assert_eq!(device.property("node", "level").unwrap().value(), "12");
        assert_eq!(transport.published_to(LEVEL), vec!["12"]);

        device.reconcile(Vec::new());
        assert_eq!(transport.published_to(LEVEL), vec!["12"]);
    }

    #[test]
    fn invalid_seed_falls_back_to_datatype_default() {
        let (mut device, transport) = device(level().with_initial_value("twelve"));

        device.reconcile(Vec::new());

        assert_eq!(transport.published_to(LEVEL), vec!["0"]);
    }

    #[test]
    fn default_goes_through_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let (mut device, transport) = device(level().settable(true).on_set(move |p, v| {
            seen.lock().unwrap().push(v.to_string());
            p.set_value(v, false);
        }));

        device.reconcile(Vec::new());

        assert_eq!(*calls.lock().unwrap(), vec!["0"]);
        assert_eq!(transport.published_to(LEVEL), vec!["0"]);
    }

    #[test]
    fn default_published_when_handler_stores_nothing() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let (mut device, transport) = device(level().settable(true).on_set(move |_, v| {
            seen.lock().unwrap().push(v.to_string());
        }));

        let outcome = device.reconcile(Vec::new());

        assert_eq!(outcome.defaulted, 1);
        assert_eq!(*calls.lock().unwrap(), vec!["0"]);
        assert_eq!(transport.published_to(LEVEL), vec!["0"]);
    }

    #[test]
    fn rejected_invalid_seed_publishes_datatype_default() {
        let (mut device, transport) =
            device(level().with_initial_value("fast").settable(true).on_set(|_, _| {}));

        device.reconcile(Vec::new());

        assert_eq!(transport.published_to(LEVEL), vec!["0"]);
        assert_eq!(device.property("node", "level").unwrap().value(), "0");
    }

    #[test]
    fn leftover_command_applied() {
        let (mut device, _) = device(level().settable(true));

        let outcome = device.reconcile(vec![InboundMessage::live(LEVEL_SET, "3")]);

        assert_eq!(outcome.leftover, 1);
        assert_eq!(outcome.defaulted, 0);
        assert_eq!(device.property("node", "level").unwrap().value(), "3");
        assert_eq!(device.route(LEVEL_SET).map(|k| k.property), Some(0));
    }

    #[test]
    fn retained_command_discarded() {
        let (mut device, _) = device(level().settable(true));

        let outcome = device.reconcile(vec![InboundMessage::retained(LEVEL_SET, "3")]);

        assert_eq!(outcome.discarded, 1);
        assert_eq!(outcome.defaulted, 1);
        assert_eq!(device.property("node", "level").unwrap().value(), "0");
    }

    #[test]
    fn last_message_wins_within_window() {
        let (mut device, _) = device(level());

        device.reconcile(vec![
            InboundMessage::retained(LEVEL, "1"),
            InboundMessage::retained(LEVEL, "2"),
        ]);

        assert_eq!(device.property("node", "level").unwrap().value(), "2");
    }

    #[test]
    fn setup_done_observers_run_once() {
        let (mut device, transport) = device(level());
        let count = Arc::new(Mutex::new(0));
        let seen = count.clone();
        device.on_setup_done(move |device| {
            assert!(device.is_setup_done());
            *seen.lock().unwrap() += 1;
        });

        device.reconcile(Vec::new());
        device.reconcile(Vec::new());

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(transport.published_to("homie/dev/$state"), vec!["ready", "ready"]);
    }
}
