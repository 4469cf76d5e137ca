//! Wall-clock backend

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::timing::Clock;

/// Wall-clock time, sleeping on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn name(&self) -> &'static str {
        "system"
    }
}
