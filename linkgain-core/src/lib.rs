//! linkgain - channel gain measurement between two testbed nodes
//!
//! One node transmits a test signal while a second, independently clocked node
//! senses received power at the same frequency. The gain between them is the
//! received power above the noise floor divided by the transmit power.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        NodePair                             │
//! │   get_channel_gain = measure(noise) → measure(signal)       │
//! │                      → estimate                             │
//! │                                                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ Capability   │  │  Schedule    │  │    Gain      │      │
//! │  │ catalogs     │  │  builder     │  │  estimator   │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │          │                 │                                │
//! │          └────────┬────────┘                                │
//! │             ┌─────▼──────┐        ┌─────────┐               │
//! │             │ Measurement│◄───────│  Clock  │               │
//! │             │  session   │        └─────────┘               │
//! │             └────────────┘                                  │
//! │                   │                                         │
//! │  ┌────────────────┼──────────────────────────┐             │
//! │  │            NODE LAYER (trait Node)         │             │
//! │  │   ┌───────────┐        ┌───────────┐      │             │
//! │  │   │ testbed   │        │ simulated │      │             │
//! │  │   │ gateway   │        │ testbed   │      │             │
//! │  │   └───────────┘        └───────────┘      │             │
//! │  └───────────────────────────────────────────┘             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use linkgain_core::{MeasurementConfig, NodePair, SystemClock};
//!
//! let pair = NodePair::connect(tx, rx, MeasurementConfig::default(), Arc::new(SystemClock)).await?;
//!
//! // 2.425 GHz, transmitting at 0 dBm
//! let estimate = pair.get_channel_gain(2425e6, 0.0).await?;
//! println!("h = {:.1} dB", estimate.gain_db);
//! ```

pub mod capabilities;
pub mod config;
pub mod error;
pub mod estimator;
pub mod node;
pub mod pair;
pub mod schedule;
pub mod session;
pub mod sim;
pub mod timing;

pub use capabilities::{
    CacheStats, Capabilities, CapabilityCache, ConfigurationCatalog, DeviceConfig, SensingConfig,
    TransmitConfig,
};
pub use config::{MeasurementConfig, TimingConfig};
pub use error::{LinkError, LinkResult, NodeRole};
pub use estimator::{db_to_mw, estimate, mw_to_db, GainEstimate, PowerSummary};
pub use node::{Node, NodeAddress, ProgramHandle, SampleRecord};
pub use pair::NodePair;
pub use schedule::{MeasurementPlan, ProgramConfig, Schedule, ScheduleBuilder, ScheduledProgram, Window};
pub use session::{MeasurementSession, PowerSampleSeries};
pub use sim::{SimulatedNode, Testbed};
pub use timing::{Clock, MockClock, SystemClock};
