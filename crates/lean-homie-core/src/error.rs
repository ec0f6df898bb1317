//! Error types shared across the device model.

/// Configuration errors detected while announcing the device tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    /// A required identity field is unset or empty
    #[error("{object} '{id}' has no {field} set")]
    MissingField {
        /// Kind of object: "device", "node" or "property"
        object: &'static str,
        /// Identifier of the object (may be empty)
        id: String,
        /// Name of the missing field
        field: &'static str,
    },
    /// Property was never attached to a node
    #[error("property '{0}' is not attached to a node")]
    Unbound(String),
    /// Structure is frozen after the first reconciliation
    #[error("device structure is frozen after first reconciliation")]
    Frozen,
    /// Transport is not connected
    #[error("transport is not connected")]
    NotConnected,
}

impl SetupError {
    pub(crate) fn missing(object: &'static str, id: &str, field: &'static str) -> Self {
        Self::MissingField {
            object,
            id: id.to_string(),
            field,
        }
    }
}

/// Errors reported by a transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Transport is not connected
    #[error("transport is not connected")]
    NotConnected,
    /// Publish was rejected
    #[error("publish error: {0}")]
    Publish(String),
    /// Subscription was rejected
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Unsubscription was rejected
    #[error("unsubscribe error: {0}")]
    Unsubscribe(String),
}
