//! Program scheduling
//!
//! The transmitting and the sensing node have independent clocks and are
//! programmed over a management network with unpredictable latency. The
//! sensing window is therefore placed strictly inside the transmit window, with
//! enough margin at both ends that neither skew nor latency can let the
//! receiver measure while the transmitter is still off.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::{ConfigurationCatalog, SensingConfig, TransmitConfig};
use crate::config::{millis, TimingConfig};
use crate::error::{LinkError, LinkResult, NodeRole};

/// Interval during which a program runs, on the coordinator clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Window {
    pub fn new(start: DateTime<Utc>, duration_ms: u64) -> Self {
        Self { start, duration_ms }
    }

    pub fn duration(&self) -> Duration {
        millis(self.duration_ms)
    }

    /// End of the window, `None` if it lies beyond the representable time range
    pub fn checked_stop(&self) -> Option<DateTime<Utc>> {
        self.start.checked_add_signed(self.duration())
    }

    pub fn stop(&self) -> DateTime<Utc> {
        self.checked_stop().unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether `other` lies inside this window with `margin` to spare on both sides
    pub fn contains(&self, other: &Window, margin: Duration) -> bool {
        let start = self.start.checked_add_signed(margin);
        let stop = other.stop().checked_add_signed(margin);
        match (start, stop) {
            (Some(start), Some(stop)) => start <= other.start && stop <= self.stop(),
            _ => false,
        }
    }
}

/// Hardware settings a program runs with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProgramConfig {
    Transmit(TransmitConfig),
    Sense(SensingConfig),
}

/// A program as submitted to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledProgram {
    /// Hardware settings
    pub config: ProgramConfig,

    /// When the program runs
    pub window: Window,

    /// Sweeps to take (sensing only, 1 for transmit programs)
    pub repetitions: u32,
}

impl ScheduledProgram {
    pub fn start(&self) -> DateTime<Utc> {
        self.window.start
    }

    pub fn stop(&self) -> DateTime<Utc> {
        self.window.stop()
    }

    /// Samples a sensing program reports, `0` for transmit programs
    pub fn expected_samples(&self) -> usize {
        match &self.config {
            ProgramConfig::Sense(sense) => self.repetitions as usize * sense.points(),
            ProgramConfig::Transmit(_) => 0,
        }
    }
}

/// Transmit and sensing windows for one power measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Reference time all offsets are taken from
    pub t0: DateTime<Utc>,

    /// Transmit window, absent for noise-only measurements
    pub transmit: Option<Window>,

    /// Sensing window
    pub sense: Window,
}

/// Everything needed to run one power measurement
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementPlan {
    pub schedule: Schedule,
    pub transmit: Option<ScheduledProgram>,
    pub sense: ScheduledProgram,
}

/// Window starting `lead` after `t0`, rejected if either end is out of the clock's range
fn place(t0: DateTime<Utc>, lead: Duration, duration_ms: u64, what: &str) -> LinkResult<Window> {
    let window = t0
        .checked_add_signed(lead)
        .map(|start| Window::new(start, duration_ms))
        .filter(|w| w.checked_stop().is_some());
    window.ok_or_else(|| {
        LinkError::SchedulingViolation(format!(
            "{} window ({} ms after t0, {} ms long) is out of range",
            what,
            lead.num_milliseconds(),
            duration_ms
        ))
    })
}

/// Computes program windows from the timing configuration
#[derive(Debug, Clone)]
pub struct ScheduleBuilder {
    timing: TimingConfig,
}

impl ScheduleBuilder {
    pub fn new(timing: TimingConfig) -> Self {
        Self { timing }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Compute the windows for a measurement starting at `t0`
    pub fn build(&self, t0: DateTime<Utc>, with_transmit: bool) -> LinkResult<Schedule> {
        // The sensing offset does not depend on whether we transmit, so noise
        // and signal measurements see the same timing.
        let sense = place(t0, self.timing.rx_lead(), self.timing.rx_duration_ms, "sensing")?;

        let transmit = if with_transmit {
            let transmit = place(t0, self.timing.tx_lead(), self.timing.tx_duration_ms, "transmit")?;
            self.check_nesting(&transmit, &sense)?;
            Some(transmit)
        } else {
            None
        };

        Ok(Schedule { t0, transmit, sense })
    }

    fn check_nesting(&self, transmit: &Window, sense: &Window) -> LinkResult<()> {
        if sense.duration_ms >= transmit.duration_ms {
            return Err(LinkError::SchedulingViolation(format!(
                "sensing window ({} ms) is not shorter than transmit window ({} ms)",
                sense.duration_ms, transmit.duration_ms
            )));
        }
        let margin = self.timing.clock_skew().checked_mul(2).ok_or_else(|| {
            LinkError::SchedulingViolation(format!(
                "clock skew of {} ms is out of range",
                self.timing.clock_skew_ms
            ))
        })?;
        if !transmit.contains(sense, margin) {
            return Err(LinkError::SchedulingViolation(format!(
                "sensing window {}..{} is not nested in transmit window {}..{} with {} ms margin",
                sense.start,
                sense.stop(),
                transmit.start,
                transmit.stop(),
                margin.num_milliseconds()
            )));
        }
        Ok(())
    }

    /// Resolve configurations and compute the programs for one power measurement
    ///
    /// Both lookups happen before any window is computed, so a frequency one of
    /// the nodes cannot handle never leaves a lone transmitter on the air.
    pub fn plan(
        &self,
        t0: DateTime<Utc>,
        frequency_hz: f64,
        tx_power_dbm: Option<f64>,
        step_hz: f64,
        tx_catalog: &ConfigurationCatalog,
        rx_catalog: &ConfigurationCatalog,
    ) -> LinkResult<MeasurementPlan> {
        let tx_config = match tx_power_dbm {
            Some(power_dbm) => Some(
                tx_catalog
                    .find_transmit(frequency_hz, power_dbm)
                    .ok_or_else(|| LinkError::CapabilityMismatch {
                        node: tx_catalog.node.clone(),
                        role: NodeRole::Transmit,
                        frequency_hz,
                        power_dbm: Some(power_dbm),
                    })?,
            ),
            None => None,
        };

        // A single-point sweep: start and stop are both the target frequency
        let sense_config = rx_catalog
            .find_sensing(frequency_hz, frequency_hz, step_hz)
            .ok_or_else(|| LinkError::CapabilityMismatch {
                node: rx_catalog.node.clone(),
                role: NodeRole::Sense,
                frequency_hz,
                power_dbm: None,
            })?;

        let schedule = self.build(t0, tx_config.is_some())?;

        let transmit = match (tx_config, schedule.transmit) {
            (Some(config), Some(window)) => Some(ScheduledProgram {
                config: ProgramConfig::Transmit(config),
                window,
                repetitions: 1,
            }),
            _ => None,
        };
        let sense = ScheduledProgram {
            config: ProgramConfig::Sense(sense_config),
            window: schedule.sense,
            repetitions: self.timing.repetitions,
        };

        debug!(
            t0 = %schedule.t0,
            tx_start = ?schedule.transmit.map(|w| w.start),
            rx_start = %schedule.sense.start,
            rx_stop = %schedule.sense.stop(),
            "Planned measurement"
        );

        Ok(MeasurementPlan {
            schedule,
            transmit,
            sense,
        })
    }
}
