//! Clock backends
//!
//! - `SystemClock`: wall-clock time, sleeps on the tokio timer
//! - `MockClock`: for tests and simulated runs, sleeping advances time instantly

mod mock;
mod system;

pub use mock::MockClock;
pub use system::SystemClock;
