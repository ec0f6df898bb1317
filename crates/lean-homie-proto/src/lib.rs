//! # lean-homie Protocol
//!
//! Wire vocabulary of the Homie convention as spoken by lean-homie devices.
//!
//! ## Topics
//!
//! - Device: `{root}/{device_id}/{$attribute}`
//! - Node: `{root}/{device_id}/{node_id}/{$attribute}`
//! - Property: `{root}/{device_id}/{node_id}/{property_id}[/set]`
//! - Stat: `{root}/{device_id}/$stats/{stat_id}`
//!
//! Every topic is derived by extending its parent's topic; identifiers are
//! never escaped or normalized.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod datatype;
pub mod state;
pub mod topics;

pub use datatype::DataType;
pub use state::DeviceState;
pub use topics::{DeviceTopic, NodeTopic, PropertyTopic};

/// Homie convention version announced in `$homie`.
pub const HOMIE_VERSION: &str = "3.0.1";

/// Default topic root.
pub const DEFAULT_ROOT: &str = "homie";
