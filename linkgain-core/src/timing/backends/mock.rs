//! Mock clock for testing
//!
//! Sleeping advances the clock instead of waiting, and every requested sleep
//! is recorded for inspection.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::timing::Clock;

/// Deterministic clock that only moves when told to
pub struct MockClock {
    /// Current time
    now: RwLock<DateTime<Utc>>,
    /// Every duration passed to `sleep`
    sleeps: RwLock<Vec<Duration>>,
}

impl MockClock {
    /// Create a mock clock starting at 2024-01-01T12:00:00Z
    pub fn new() -> Self {
        Self::starting_at(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
    }

    /// Create a mock clock starting at `start`
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
            sleeps: RwLock::new(Vec::new()),
        }
    }

    /// Move the clock forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.write().unwrap();
        *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
    }

    /// All recorded sleeps
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.read().unwrap().clone()
    }

    /// Total time spent sleeping
    pub fn slept(&self) -> Duration {
        self.sleeps.read().unwrap().iter().sum()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.write().unwrap().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
