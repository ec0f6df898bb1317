//! # lean-homie Core
//!
//! Device model, lifecycle and retained-value reconciliation for Homie devices.
//!
//! This crate provides:
//! - `Device`, `Node`, `Property` and `Stat`, the tree a device announces
//! - The lifecycle state machine and its ordered observers
//! - The topic → property dispatch table and the steady-state dispatch path
//! - Reconciliation of broker-retained values against pending commands
//! - Exponential reconnect backoff
//! - The transport and connectivity seams, plus an in-memory transport
//!
//! Everything here is synchronous; scheduling belongs to the runtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod device;
pub mod error;
pub mod layout;
pub mod node;
pub mod property;
pub mod reconcile;
pub mod stat;
pub mod transport;
pub mod value;

pub use backoff::Backoff;
pub use device::{Device, PropertyKey};
pub use error::{SetupError, TransportError};
pub use layout::{DeviceLayout, LayoutError, NodeLayout, PropertyLayout};
pub use node::Node;
pub use property::Property;
pub use reconcile::Reconciliation;
pub use stat::Stat;
pub use transport::{
    ConnectionEvent, Connectivity, InboundMessage, LastWill, MemoryTransport, Publication, QoS,
    StaticLink, Transport,
};

pub use lean_homie_proto::{DataType, DeviceState};
