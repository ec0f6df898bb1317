//! Forwards log events to `debug/<device id>` over the device's transport.

use lean_homie_core::{QoS, Transport};
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

struct Sink {
    transport: Arc<dyn Transport>,
    topic: String,
}

/// Tracing layer publishing `info` and above, QoS 0, not retained.
///
/// Events are dropped until a transport is attached and whenever it is
/// disconnected.
#[derive(Clone, Default)]
pub struct MqttLogLayer {
    sink: Arc<OnceLock<Sink>>,
}

impl MqttLogLayer {
    /// Create a detached layer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding through `transport`. Later calls are ignored.
    pub fn attach(&self, transport: Arc<dyn Transport>, device_id: &str) {
        let topic = format!("debug/{device_id}");
        if self.sink.set(Sink { transport, topic }).is_err() {
            tracing::debug!("MQTT log sink already attached");
        }
    }

    fn format(event: &Event<'_>) -> String {
        let metadata = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        format!(
            "{} {}: {}{}",
            metadata.level(),
            metadata.target(),
            visitor.message,
            visitor.fields
        )
    }
}

impl<S: Subscriber> Layer<S> for MqttLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO || metadata.target().starts_with("rumqttc") {
            return;
        }
        let Some(sink) = self.sink.get() else {
            return;
        };
        if !sink.transport.is_connected() {
            return;
        }
        let _ = sink
            .transport
            .publish(&sink.topic, QoS::AtMostOnce, false, &Self::format(event));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lean_homie_core::MemoryTransport;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(connected: bool, attach: bool) -> Arc<MemoryTransport> {
        let transport = Arc::new(MemoryTransport::new());
        transport.set_connected(connected);
        let layer = MqttLogLayer::new();
        if attach {
            layer.attach(transport.clone(), "dev");
        }

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(port = 1883, "Connected");
            tracing::debug!("Too chatty");
        });
        transport
    }

    #[test]
    fn forwards_info_and_above() {
        let transport = capture(true, true);

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "debug/dev");
        assert_eq!(published[0].qos, QoS::AtMostOnce);
        assert!(!published[0].retain);
        assert!(published[0].payload.contains("Connected port=1883"));
        assert!(published[0].payload.starts_with("INFO"));
    }

    #[test]
    fn silent_while_detached_or_disconnected() {
        assert!(capture(true, false).published().is_empty());
        assert!(capture(false, true).published().is_empty());
    }
}
