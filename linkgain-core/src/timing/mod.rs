//! # Coordinator clock
//!
//! Every timestamp the core hands to a node and every wait in the polling loop
//! goes through a [`Clock`]. Injecting the clock keeps the scheduling and
//! timeout logic deterministic under test.
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │            MeasurementSession             │
//! │   now() -> t0          sleep(poll)        │
//! └─────────────────────┬─────────────────────┘
//!                       │
//!                       ▼
//! ┌───────────────────────────────────────────┐
//! │               Clock (trait)               │
//! ├─────────────────────┬─────────────────────┤
//! │ SystemClock         │ MockClock           │
//! │ (Utc + tokio time)  │ (testing)           │
//! └─────────────────────┴─────────────────────┘
//! ```

pub mod backends;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use backends::{MockClock, SystemClock};

/// Source of coordinator time and suspension point for the poll loop
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current coordinator time
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);

    /// Backend name (for logging)
    fn name(&self) -> &'static str;
}
