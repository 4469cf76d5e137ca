//! Remote node interface
//!
//! The core never talks to hardware directly. Everything that reaches a node,
//! whether over the testbed's web gateway or inside the simulator, goes through
//! the [`Node`] trait.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capabilities::ConfigurationCatalog;
use crate::error::LinkResult;
use crate::schedule::ScheduledProgram;

/// Remote node interface
#[async_trait]
pub trait Node: Send + Sync {
    /// Node label, used in logs and errors
    fn name(&self) -> &str;

    /// Read the node's hardware configuration catalog
    async fn get_capabilities(&self) -> LinkResult<ConfigurationCatalog>;

    /// Submit a program; returns as soon as the node has accepted it
    async fn submit_program(&self, program: &ScheduledProgram) -> LinkResult<ProgramHandle>;

    /// Whether a submitted program has finished
    async fn is_complete(&self, handle: &ProgramHandle) -> LinkResult<bool>;

    /// Read the samples recorded by a finished sensing program
    async fn retrieve(&self, handle: &ProgramHandle) -> LinkResult<Vec<SampleRecord>>;

    /// Ask the node to drop a program and return to idle
    async fn abort(&self, _handle: &ProgramHandle) -> LinkResult<()> {
        Ok(())
    }
}

/// Reference to a program accepted by a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramHandle {
    /// Node that accepted the program
    pub node: String,

    /// Program identifier
    pub program_id: Uuid,
}

impl ProgramHandle {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            program_id: Uuid::new_v4(),
        }
    }
}

/// One power reading reported by a sensing program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Node time of the reading
    pub timestamp: DateTime<Utc>,

    /// Sensed frequency
    pub frequency_hz: f64,

    /// Received power
    pub power_dbm: f64,
}

/// Address of a node behind a testbed coordinator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Coordinator gateway URL
    pub coordinator: String,

    /// Cluster the node belongs to
    pub cluster: u16,

    /// Node identifier within the cluster
    pub node_id: u16,
}

impl NodeAddress {
    pub fn new(coordinator: impl Into<String>, cluster: u16, node_id: u16) -> Self {
        Self {
            coordinator: coordinator.into(),
            cluster,
            node_id,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}/{}", self.coordinator, self.cluster, self.node_id)
    }
}
