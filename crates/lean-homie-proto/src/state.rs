//! Device lifecycle states and their `$state` payloads.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of a device, published on `$state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Connected and announcing.
    Init,
    /// Announcement and reconciliation done.
    Ready,
    /// Cleanly disconnected.
    Disconnected,
    /// Sleeping, expected to come back.
    Sleeping,
    /// Connection lost (also the last-will payload).
    #[default]
    Lost,
    /// Misconfigured; needs intervention.
    Alert,
}

impl DeviceState {
    /// The `$state` payload.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Sleeping => "sleeping",
            Self::Lost => "lost",
            Self::Alert => "alert",
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Self::Init),
            "ready" => Ok(Self::Ready),
            "disconnected" => Ok(Self::Disconnected),
            "sleeping" => Ok(Self::Sleeping),
            "lost" => Ok(Self::Lost),
            "alert" => Ok(Self::Alert),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// A `$state` payload that names no known state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device state: {0}")]
pub struct UnknownState(pub String);
