//! Simulated testbed
//!
//! An in-process stand-in for the remote testbed: nodes accept programs, run
//! them against a shared clock and synthesize power readings from a simple
//! link model (noise floor plus every matching transmission, attenuated by the
//! configured path gain). Each node may run on a clock offset from the
//! coordinator, which is what the schedule margins exist for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::capabilities::{ConfigurationCatalog, DeviceConfig};
use crate::error::{LinkError, LinkResult};
use crate::estimator::{db_to_mw, mw_to_db};
use crate::node::{Node, ProgramHandle, SampleRecord};
use crate::schedule::{ProgramConfig, ScheduledProgram};
use crate::timing::Clock;

/// Frequencies closer than this are treated as the same channel
const SAME_CHANNEL_HZ: f64 = 1.0;

/// Reference 2.4 GHz ISM catalog: 256 channels of 400 kHz from 2400 MHz,
/// transmit power from -30 to 0 dBm
pub fn cc2500_catalog(node: impl Into<String>) -> ConfigurationCatalog {
    ConfigurationCatalog::new(
        node,
        vec![
            DeviceConfig {
                id: 0,
                name: "CC2500 2.4 GHz sensing, 400 kHz channels".to_string(),
                base_hz: 2400e6,
                spacing_hz: 400e3,
                num_channels: 256,
                tx_power_range_dbm: None,
            },
            DeviceConfig {
                id: 1,
                name: "CC2500 2.4 GHz transmit, 400 kHz channels".to_string(),
                base_hz: 2400e6,
                spacing_hz: 400e3,
                num_channels: 256,
                tx_power_range_dbm: Some((-30.0, 0.0)),
            },
        ],
    )
}

/// A transmission on the air, in true (coordinator) time
#[derive(Debug, Clone)]
struct Transmission {
    node: String,
    program_id: Uuid,
    frequency_hz: f64,
    power_dbm: f64,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
}

impl Transmission {
    fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.stop
    }
}

/// Shared radio environment
pub struct Testbed {
    clock: Arc<dyn Clock>,
    noise_floor_dbm: f64,
    noise_jitter_db: f64,
    path_gains: HashMap<(String, String), f64>,
    transmissions: RwLock<Vec<Transmission>>,
    rng: Mutex<StdRng>,
}

impl Testbed {
    /// Quiet testbed at -100 dBm noise floor with no jitter and no links
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            noise_floor_dbm: -100.0,
            noise_jitter_db: 0.0,
            path_gains: HashMap::new(),
            transmissions: RwLock::new(Vec::new()),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    pub fn with_noise_floor(mut self, dbm: f64) -> Self {
        self.noise_floor_dbm = dbm;
        self
    }

    /// Readings vary uniformly by up to `db` around their true value
    pub fn with_noise_jitter(mut self, db: f64) -> Self {
        self.noise_jitter_db = db.abs();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Set the gain between two nodes (symmetric)
    pub fn with_path_gain(mut self, a: &str, b: &str, gain_db: f64) -> Self {
        self.path_gains.insert((a.to_string(), b.to_string()), gain_db);
        self.path_gains.insert((b.to_string(), a.to_string()), gain_db);
        self
    }

    /// True time
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn path_gain(&self, from: &str, to: &str) -> Option<f64> {
        self.path_gains.get(&(from.to_string(), to.to_string())).copied()
    }

    fn add_transmission(&self, transmission: Transmission) {
        self.transmissions.write().unwrap().push(transmission);
    }

    fn cut_transmission(&self, program_id: Uuid) {
        let now = self.now();
        let mut transmissions = self.transmissions.write().unwrap();
        for tx in transmissions.iter_mut().filter(|t| t.program_id == program_id) {
            if tx.stop > now {
                tx.stop = now.max(tx.start);
            }
        }
    }

    /// Power seen by `receiver` at `frequency_hz` at true time `at`
    fn received_mw(&self, receiver: &str, frequency_hz: f64, at: DateTime<Utc>) -> f64 {
        let signal_mw: f64 = self
            .transmissions
            .read()
            .unwrap()
            .iter()
            .filter(|t| t.node != receiver)
            .filter(|t| (t.frequency_hz - frequency_hz).abs() < SAME_CHANNEL_HZ)
            .filter(|t| t.is_active(at))
            .filter_map(|t| {
                self.path_gain(&t.node, receiver)
                    .map(|gain| db_to_mw(t.power_dbm + gain))
            })
            .sum();
        db_to_mw(self.noise_floor_dbm) + signal_mw
    }

    fn jitter_db(&self) -> f64 {
        if self.noise_jitter_db == 0.0 {
            return 0.0;
        }
        let j = self.noise_jitter_db;
        self.rng.lock().unwrap().gen_range(-j..=j)
    }
}

/// A node on the simulated testbed
pub struct SimulatedNode {
    name: String,
    catalog: ConfigurationCatalog,
    testbed: Arc<Testbed>,
    /// Node clock minus coordinator clock
    clock_offset: Duration,
    unresponsive: bool,
    fail_submissions: bool,
    fail_polls: bool,
    fail_retrieval: bool,
    lost_samples: usize,
    programs: RwLock<HashMap<Uuid, ScheduledProgram>>,
    submitted: RwLock<Vec<ScheduledProgram>>,
    aborted: RwLock<Vec<ProgramHandle>>,
    capability_queries: AtomicU64,
}

impl SimulatedNode {
    pub fn new(name: impl Into<String>, catalog: ConfigurationCatalog, testbed: Arc<Testbed>) -> Self {
        Self {
            name: name.into(),
            catalog,
            testbed,
            clock_offset: Duration::zero(),
            unresponsive: false,
            fail_submissions: false,
            fail_polls: false,
            fail_retrieval: false,
            lost_samples: 0,
            programs: RwLock::new(HashMap::new()),
            submitted: RwLock::new(Vec::new()),
            aborted: RwLock::new(Vec::new()),
            capability_queries: AtomicU64::new(0),
        }
    }

    /// Run the node clock `offset_ms` ahead of the coordinator (negative: behind)
    pub fn with_clock_offset(mut self, offset_ms: i64) -> Self {
        self.clock_offset = Duration::milliseconds(offset_ms);
        self
    }

    /// Accept programs but never report them complete
    pub fn unresponsive(mut self) -> Self {
        self.unresponsive = true;
        self
    }

    /// Reject every submission with a transport error
    pub fn failing_submissions(mut self) -> Self {
        self.fail_submissions = true;
        self
    }

    /// Fail every completion poll with a transport error
    pub fn failing_polls(mut self) -> Self {
        self.fail_polls = true;
        self
    }

    /// Fail every retrieval with a transport error
    pub fn failing_retrieval(mut self) -> Self {
        self.fail_retrieval = true;
        self
    }

    /// Drop the last `count` records of every retrieved series
    pub fn losing_samples(mut self, count: usize) -> Self {
        self.lost_samples = count;
        self
    }

    /// Every program accepted so far
    pub fn submitted(&self) -> Vec<ScheduledProgram> {
        self.submitted.read().unwrap().clone()
    }

    /// Every abort request received so far
    pub fn aborted(&self) -> Vec<ProgramHandle> {
        self.aborted.read().unwrap().clone()
    }

    /// Number of capability queries served
    pub fn capability_queries(&self) -> u64 {
        self.capability_queries.load(Ordering::SeqCst)
    }

    /// Coordinator-clock time at which this node's clock reads `node_time`
    fn true_time(&self, node_time: DateTime<Utc>) -> DateTime<Utc> {
        node_time - self.clock_offset
    }

    fn program(&self, handle: &ProgramHandle) -> LinkResult<ScheduledProgram> {
        self.programs
            .read()
            .unwrap()
            .get(&handle.program_id)
            .cloned()
            .ok_or_else(|| {
                LinkError::Transport(format!(
                    "node {} has no program {}",
                    self.name, handle.program_id
                ))
            })
    }
}

#[async_trait]
impl Node for SimulatedNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_capabilities(&self) -> LinkResult<ConfigurationCatalog> {
        self.capability_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.catalog.clone())
    }

    async fn submit_program(&self, program: &ScheduledProgram) -> LinkResult<ProgramHandle> {
        if self.fail_submissions {
            return Err(LinkError::Transport(format!(
                "node {} rejected the program",
                self.name
            )));
        }

        let handle = ProgramHandle::new(self.name.clone());
        if let ProgramConfig::Transmit(tx) = &program.config {
            self.testbed.add_transmission(Transmission {
                node: self.name.clone(),
                program_id: handle.program_id,
                frequency_hz: tx.frequency_hz,
                power_dbm: tx.power_dbm,
                start: self.true_time(program.start()),
                stop: self.true_time(program.stop()),
            });
        }

        self.programs
            .write()
            .unwrap()
            .insert(handle.program_id, program.clone());
        self.submitted.write().unwrap().push(program.clone());

        debug!(node = %self.name, program_id = %handle.program_id, "Program accepted");
        Ok(handle)
    }

    async fn is_complete(&self, handle: &ProgramHandle) -> LinkResult<bool> {
        let program = self.program(handle)?;
        if self.fail_polls {
            return Err(LinkError::Transport(format!(
                "node {} did not answer the status request",
                self.name
            )));
        }
        if self.unresponsive {
            return Ok(false);
        }
        Ok(self.testbed.now() >= self.true_time(program.stop()))
    }

    async fn retrieve(&self, handle: &ProgramHandle) -> LinkResult<Vec<SampleRecord>> {
        let program = self.program(handle)?;
        if self.fail_retrieval {
            return Err(LinkError::Transport(format!(
                "node {} lost the data of program {}",
                self.name, handle.program_id
            )));
        }
        let sense = match &program.config {
            ProgramConfig::Sense(sense) => sense.clone(),
            ProgramConfig::Transmit(_) => {
                return Err(LinkError::Transport(format!(
                    "program {} on node {} produced no data",
                    handle.program_id, self.name
                )))
            }
        };
        if self.testbed.now() < self.true_time(program.stop()) {
            return Err(LinkError::Transport(format!(
                "program {} on node {} is still running",
                handle.program_id, self.name
            )));
        }

        let start = self.true_time(program.start());
        let duration_ms = program.window.duration_ms as f64;
        let repetitions = program.repetitions.max(1);
        let frequencies = sense.frequencies();

        let mut records = Vec::with_capacity(repetitions as usize * frequencies.len());
        for rep in 0..repetitions {
            // Sweeps are spread evenly over the window
            let offset_ms = duration_ms * (rep as f64 + 0.5) / repetitions as f64;
            let at = start + Duration::milliseconds(offset_ms as i64);
            for &frequency_hz in &frequencies {
                let power_dbm =
                    mw_to_db(self.testbed.received_mw(&self.name, frequency_hz, at))
                        + self.testbed.jitter_db();
                records.push(SampleRecord {
                    timestamp: at + self.clock_offset,
                    frequency_hz,
                    power_dbm,
                });
            }
        }

        records.truncate(records.len().saturating_sub(self.lost_samples));

        trace!(node = %self.name, samples = records.len(), "Samples retrieved");
        Ok(records)
    }

    async fn abort(&self, handle: &ProgramHandle) -> LinkResult<()> {
        self.aborted.write().unwrap().push(handle.clone());
        if self.programs.write().unwrap().remove(&handle.program_id).is_some() {
            self.testbed.cut_transmission(handle.program_id);
        }
        Ok(())
    }
}
