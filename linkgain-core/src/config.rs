//! Configuration for linkgain measurements

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};

/// Main measurement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Program timing
    #[serde(default)]
    pub timing: TimingConfig,

    /// Sweep step requested from the sensing node, in hertz
    #[serde(default = "default_sweep_step")]
    pub sweep_step_hz: f64,
}

fn default_sweep_step() -> f64 { 400e3 }

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            sweep_step_hz: 400e3,
        }
    }
}

impl MeasurementConfig {
    /// Parse a JSON configuration
    pub fn from_json_str(json: &str) -> LinkResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> LinkResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check the configuration for values no schedule can satisfy
    pub fn validate(&self) -> LinkResult<()> {
        if !self.sweep_step_hz.is_finite() || self.sweep_step_hz <= 0.0 {
            return Err(LinkError::InvalidConfig(format!(
                "sweep_step_hz must be positive, got {}",
                self.sweep_step_hz
            )));
        }
        self.timing.validate()
    }
}

/// Program timing
///
/// Defaults are tuned for the latency profile of the LOG-a-TEC testbed:
///
/// ```text
/// t0     +1         +3                      +13        +15
/// |      tx start   rx start                rx stop    tx stop
/// |      |          |=======================|          |
/// |      |                  receive                    |
/// |      |=============================================|
/// |                         transmit
/// ```
///
/// Nodes run on their own clocks, so each boundary may move by up to
/// `clock_skew_ms` in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Transmit program start, relative to t0
    #[serde(default = "default_tx_lead")]
    pub tx_lead_ms: u64,

    /// Sensing program start, relative to t0
    #[serde(default = "default_rx_lead")]
    pub rx_lead_ms: u64,

    /// Transmit program duration
    #[serde(default = "default_tx_duration")]
    pub tx_duration_ms: u64,

    /// Sensing program duration
    #[serde(default = "default_rx_duration")]
    pub rx_duration_ms: u64,

    /// Sweeps taken by the sensing program
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,

    /// Delay between completion polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Largest expected offset between coordinator and node clocks
    #[serde(default = "default_clock_skew")]
    pub clock_skew_ms: u64,

    /// Polling gives up after this multiple of the sensing program's end offset
    #[serde(default = "default_timeout_factor")]
    pub timeout_factor: f64,
}

fn default_tx_lead() -> u64 { 1000 }
fn default_rx_lead() -> u64 { 3000 }
fn default_tx_duration() -> u64 { 14000 }
fn default_rx_duration() -> u64 { 10000 }
fn default_repetitions() -> u32 { 1 }
fn default_poll_interval() -> u64 { 2000 }
fn default_clock_skew() -> u64 { 1000 }
fn default_timeout_factor() -> f64 { 3.0 }

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tx_lead_ms: 1000,
            rx_lead_ms: 3000,
            tx_duration_ms: 14000,
            rx_duration_ms: 10000,
            repetitions: 1,
            poll_interval_ms: 2000,
            clock_skew_ms: 1000,
            timeout_factor: 3.0,
        }
    }
}

/// Upper bound for every `*_ms` timing value (one day)
pub const MAX_TIMING_MS: u64 = 24 * 60 * 60 * 1000;

/// Millisecond count as a chrono duration, saturating at the largest representable one
pub(crate) fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

impl TimingConfig {
    pub fn tx_lead(&self) -> Duration {
        millis(self.tx_lead_ms)
    }

    pub fn rx_lead(&self) -> Duration {
        millis(self.rx_lead_ms)
    }

    pub fn tx_duration(&self) -> Duration {
        millis(self.tx_duration_ms)
    }

    pub fn rx_duration(&self) -> Duration {
        millis(self.rx_duration_ms)
    }

    pub fn clock_skew(&self) -> Duration {
        millis(self.clock_skew_ms)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// Longest time to wait for the sensing program, measured from t0
    pub fn poll_timeout(&self) -> Duration {
        let end_ms = self.rx_lead_ms.saturating_add(self.rx_duration_ms) as f64;
        Duration::milliseconds((end_ms * self.timeout_factor).ceil() as i64)
    }

    /// Check the timing for values no schedule can satisfy
    pub fn validate(&self) -> LinkResult<()> {
        for (field, value) in [
            ("tx_lead_ms", self.tx_lead_ms),
            ("rx_lead_ms", self.rx_lead_ms),
            ("tx_duration_ms", self.tx_duration_ms),
            ("rx_duration_ms", self.rx_duration_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("clock_skew_ms", self.clock_skew_ms),
        ] {
            if value > MAX_TIMING_MS {
                return Err(LinkError::InvalidConfig(format!(
                    "{} must not exceed {} ms, got {}",
                    field, MAX_TIMING_MS, value
                )));
            }
        }
        if self.rx_duration_ms == 0 || self.tx_duration_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "program durations must be non-zero".to_string(),
            ));
        }
        if self.repetitions == 0 {
            return Err(LinkError::InvalidConfig(
                "repetitions must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if !self.timeout_factor.is_finite() || self.timeout_factor < 1.0 {
            return Err(LinkError::InvalidConfig(format!(
                "timeout_factor must be at least 1.0, got {}",
                self.timeout_factor
            )));
        }

        if self.rx_duration_ms >= self.tx_duration_ms {
            return Err(LinkError::InvalidConfig(format!(
                "sensing duration ({} ms) must be shorter than transmit duration ({} ms)",
                self.rx_duration_ms, self.tx_duration_ms
            )));
        }

        // Both nodes may drift in opposite directions
        let margin = 2 * self.clock_skew_ms;
        if self.rx_lead_ms < self.tx_lead_ms + margin {
            return Err(LinkError::InvalidConfig(format!(
                "sensing must start at least {} ms after transmission (tx_lead_ms={}, rx_lead_ms={})",
                margin, self.tx_lead_ms, self.rx_lead_ms
            )));
        }
        let tx_stop = self.tx_lead_ms + self.tx_duration_ms;
        let rx_stop = self.rx_lead_ms + self.rx_duration_ms;
        if rx_stop + margin > tx_stop {
            return Err(LinkError::InvalidConfig(format!(
                "sensing must stop at least {} ms before transmission (rx stop {} ms, tx stop {} ms)",
                margin, rx_stop, tx_stop
            )));
        }
        Ok(())
    }
}
