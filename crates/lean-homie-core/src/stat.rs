//! Stats: periodically sampled, read-only device telemetry.

use crate::transport::{self, Transport};

/// Sampling function producing a stat's next value.
pub type Sampler = Box<dyn FnMut() -> String + Send>;

/// A read-only value published under `$stats/{id}`.
pub struct Stat {
    id: String,
    topic: String,
    value: String,
    sampler: Sampler,
}

impl Stat {
    pub(crate) fn new(id: String, topic: String, sampler: Sampler) -> Self {
        Self {
            id,
            topic,
            value: String::new(),
            sampler,
        }
    }

    /// Stat identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Topic the value is published on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Last sampled value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Take a fresh sample, replacing the previous value.
    pub fn sample(&mut self) -> &str {
        self.value = (self.sampler)();
        &self.value
    }

    /// Sample and publish.
    pub fn publish(&mut self, transport: &dyn Transport) {
        self.sample();
        tracing::trace!(stat = %self.id, value = %self.value, "Publishing stat");
        transport::announce(transport, &self.topic, &self.value);
    }
}
