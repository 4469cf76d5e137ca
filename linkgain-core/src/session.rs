//! Power measurement session
//!
//! One call to [`MeasurementSession::measure`] programs the nodes, waits for the
//! sensing program to finish and returns the received power readings:
//!
//! 1. take t0 from the coordinator clock
//! 2. resolve transmit and sensing configurations (fail before any submission)
//! 3. submit the transmit program, then the sensing program
//! 4. poll the sensing node until its program completes, times out or is cancelled
//! 5. retrieve the readings and release the transmitter
//!
//! Whenever a measurement fails after a program was accepted, the session asks
//! the nodes to abort what they were given so nothing keeps transmitting on
//! the shared spectrum.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::capabilities::ConfigurationCatalog;
use crate::config::MeasurementConfig;
use crate::error::{LinkError, LinkResult};
use crate::node::{Node, ProgramHandle};
use crate::schedule::ScheduleBuilder;
use crate::timing::Clock;

/// Power readings from one sensing program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSampleSeries {
    /// Sensed frequency
    pub frequency_hz: f64,

    /// Transmit power during the measurement, `None` for noise-only
    pub tx_power_dbm: Option<f64>,

    /// Readings in the order the node reported them
    pub samples_dbm: Vec<f64>,
}

impl PowerSampleSeries {
    pub fn len(&self) -> usize {
        self.samples_dbm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples_dbm.is_empty()
    }
}

enum PollOutcome {
    Complete,
    TimedOut(i64),
    Cancelled,
}

/// Drives power measurements between one transmitting and one sensing node
pub struct MeasurementSession {
    tx: Arc<dyn Node>,
    rx: Arc<dyn Node>,
    tx_catalog: Arc<ConfigurationCatalog>,
    rx_catalog: Arc<ConfigurationCatalog>,
    config: MeasurementConfig,
    schedule: ScheduleBuilder,
    clock: Arc<dyn Clock>,
    cancel: Option<watch::Receiver<bool>>,
}

impl MeasurementSession {
    pub fn new(
        tx: Arc<dyn Node>,
        rx: Arc<dyn Node>,
        tx_catalog: Arc<ConfigurationCatalog>,
        rx_catalog: Arc<ConfigurationCatalog>,
        config: MeasurementConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let schedule = ScheduleBuilder::new(config.timing.clone());
        Self {
            tx,
            rx,
            tx_catalog,
            rx_catalog,
            config,
            schedule,
            clock,
            cancel: None,
        }
    }

    /// Observe `cancel` while waiting; a `true` value stops the measurement
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    /// Measure received power at `frequency_hz`, transmitting at
    /// `tx_power_dbm` or keeping the transmitter silent when `None`
    pub async fn measure(
        &self,
        frequency_hz: f64,
        tx_power_dbm: Option<f64>,
    ) -> LinkResult<PowerSampleSeries> {
        let t0 = self.clock.now();
        let plan = self.schedule.plan(
            t0,
            frequency_hz,
            tx_power_dbm,
            self.config.sweep_step_hz,
            &self.tx_catalog,
            &self.rx_catalog,
        )?;

        let tx_handle = match &plan.transmit {
            Some(program) => {
                let handle = self.tx.submit_program(program).await?;
                debug!(
                    node = self.tx.name(),
                    start = %program.start(),
                    stop = %program.stop(),
                    "Transmit program submitted"
                );
                Some(handle)
            }
            None => None,
        };

        let rx_handle = match self.rx.submit_program(&plan.sense).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(node = self.rx.name(), error = %e, "Sensing program rejected");
                self.abort_all(tx_handle.as_ref(), None).await;
                return Err(e);
            }
        };
        debug!(
            node = self.rx.name(),
            start = %plan.sense.start(),
            stop = %plan.sense.stop(),
            "Sensing program submitted"
        );

        match self.wait_for_completion(&rx_handle, t0).await {
            Ok(PollOutcome::Complete) => {}
            Ok(PollOutcome::TimedOut(waited_ms)) => {
                warn!(node = self.rx.name(), waited_ms, "Sensing program timed out");
                self.abort_all(tx_handle.as_ref(), Some(&rx_handle)).await;
                return Err(LinkError::Timeout {
                    node: self.rx.name().to_string(),
                    waited_ms,
                });
            }
            Ok(PollOutcome::Cancelled) => {
                warn!(node = self.rx.name(), "Measurement cancelled");
                self.abort_all(tx_handle.as_ref(), Some(&rx_handle)).await;
                return Err(LinkError::Cancelled);
            }
            Err(e) => {
                self.abort_all(tx_handle.as_ref(), Some(&rx_handle)).await;
                return Err(e);
            }
        }

        // Sensing is over, the transmitter must not stay on air into the next measurement
        let records = match self.rx.retrieve(&rx_handle).await {
            Ok(records) => {
                self.abort_all(tx_handle.as_ref(), None).await;
                records
            }
            Err(e) => {
                warn!(node = self.rx.name(), error = %e, "Failed to retrieve samples");
                self.abort_all(tx_handle.as_ref(), Some(&rx_handle)).await;
                return Err(e);
            }
        };
        if records.is_empty() {
            return Err(LinkError::EmptySeries);
        }
        let expected = plan.sense.expected_samples();
        if records.len() != expected {
            warn!(
                node = self.rx.name(),
                expected,
                received = records.len(),
                "Unexpected number of samples"
            );
        }

        info!(
            frequency_hz,
            tx_power_dbm = ?tx_power_dbm,
            samples = records.len(),
            "Power measurement complete"
        );

        Ok(PowerSampleSeries {
            frequency_hz,
            tx_power_dbm,
            samples_dbm: records.into_iter().map(|r| r.power_dbm).collect(),
        })
    }

    async fn wait_for_completion(
        &self,
        handle: &ProgramHandle,
        t0: chrono::DateTime<chrono::Utc>,
    ) -> LinkResult<PollOutcome> {
        let deadline = t0
            .checked_add_signed(self.config.timing.poll_timeout())
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
        let interval = self.config.timing.poll_interval();
        let mut cancel = self.cancel.clone();

        loop {
            if is_cancelled(&cancel) {
                return Ok(PollOutcome::Cancelled);
            }
            if self.rx.is_complete(handle).await? {
                return Ok(PollOutcome::Complete);
            }
            let now = self.clock.now();
            if now >= deadline {
                return Ok(PollOutcome::TimedOut((now - t0).num_milliseconds()));
            }
            debug!(node = self.rx.name(), "waiting...");

            let mut sender_dropped = false;
            match cancel.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = self.clock.sleep(interval) => {}
                        changed = rx.changed() => sender_dropped = changed.is_err(),
                    }
                }
                None => self.clock.sleep(interval).await,
            }
            // A dropped sender can never cancel us, stop watching it
            if sender_dropped {
                cancel = None;
            }
        }
    }

    /// Best-effort abort of every accepted program; failures are only logged
    async fn abort_all(&self, tx: Option<&ProgramHandle>, rx: Option<&ProgramHandle>) {
        if let Some(handle) = tx {
            if let Err(e) = self.tx.abort(handle).await {
                warn!(node = self.tx.name(), error = %e, "Failed to abort transmit program");
            }
        }
        if let Some(handle) = rx {
            if let Err(e) = self.rx.abort(handle).await {
                warn!(node = self.rx.name(), error = %e, "Failed to abort sensing program");
            }
        }
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}
