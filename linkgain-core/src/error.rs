//! Error types for linkgain

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::estimator::PowerSummary;

/// Result type for linkgain operations
pub type LinkResult<T> = Result<T, LinkError>;

/// Which half of the node pair a configuration lookup was made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Transmit,
    Sense,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Transmit => write!(f, "transmit"),
            NodeRole::Sense => write!(f, "sense"),
        }
    }
}

/// Errors that can occur while measuring channel gain
#[derive(Error, Debug)]
pub enum LinkError {
    /// Requested frequency/power is outside what the node hardware supports
    #[error("Node {node} has no {role} configuration for {frequency_hz} Hz{}", fmt_power(.power_dbm))]
    CapabilityMismatch {
        node: String,
        role: NodeRole,
        frequency_hz: f64,
        power_dbm: Option<f64>,
    },

    /// Computed schedule broke the window nesting invariant
    #[error("Scheduling violation: {0}")]
    SchedulingViolation(String),

    /// Sensing program did not complete in time
    #[error("Node {node} did not complete its sensing program within {waited_ms} ms")]
    Timeout { node: String, waited_ms: i64 },

    /// Received power is not above the noise floor
    #[error(
        "Received power {:.1} dBm is not above the noise floor {:.1} dBm",
        .received.mean_dbm,
        .noise.mean_dbm
    )]
    BelowNoiseFloor {
        noise: PowerSummary,
        received: PowerSummary,
    },

    /// Measurement was cancelled by the caller
    #[error("Measurement cancelled")]
    Cancelled,

    /// A node returned no samples
    #[error("Power sample series is empty")]
    EmptySeries,

    /// Transport error reported by a node backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether repeating the whole measurement may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::Timeout { .. } | LinkError::Transport(_))
    }
}

fn fmt_power(power_dbm: &Option<f64>) -> String {
    match power_dbm {
        Some(p) => format!(" at {} dBm", p),
        None => String::new(),
    }
}
