//! linkgain CLI - measure channel gain between two testbed nodes
//!
//! Nodes are addressed the way the testbed's coordinator addresses them:
//! a coordinator URL, a cluster and a node id. Until a gateway transport is
//! plugged in, the nodes run on the simulated testbed.
//!
//! Usage:
//!     linkgain
//!     linkgain --tx-node 51 --rx-node 53 --frequency-hz 2425e6 --tx-power-dbm 0
//!     linkgain --config timing.json --path-gain-db -72 --json

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use linkgain_core::sim::cc2500_catalog;
use linkgain_core::{
    Clock, LinkError, MeasurementConfig, MockClock, NodeAddress, NodePair, SimulatedNode,
    SystemClock, Testbed,
};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "linkgain")]
#[command(about = "Measure channel gain between two testbed nodes")]
#[command(version)]
struct Args {
    /// Coordinator gateway URL
    #[arg(long, default_value = "https://crn.log-a-tec.eu/communicator")]
    coordinator: String,

    /// Cluster both nodes belong to
    #[arg(long, default_value_t = 9501)]
    cluster: u16,

    /// Transmitting node id
    #[arg(long, default_value_t = 51)]
    tx_node: u16,

    /// Sensing node id
    #[arg(long, default_value_t = 53)]
    rx_node: u16,

    /// Measurement frequency in hertz
    #[arg(short, long, default_value_t = 2425e6)]
    frequency_hz: f64,

    /// Transmit power in dBm
    #[arg(short, long, default_value_t = 0.0, allow_hyphen_values = true)]
    tx_power_dbm: f64,

    /// Path to a JSON measurement configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of sweeps per sensing program
    #[arg(long)]
    repetitions: Option<u32>,

    /// Simulated gain between the two nodes
    #[arg(long, default_value_t = -60.0, allow_hyphen_values = true)]
    path_gain_db: f64,

    /// Simulated receiver noise floor
    #[arg(long, default_value_t = -95.0, allow_hyphen_values = true)]
    noise_floor_dbm: f64,

    /// Simulated reading jitter in dB
    #[arg(long, default_value_t = 1.0)]
    noise_jitter_db: f64,

    /// Seed for the simulated readings
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Wait in real time instead of advancing a simulated clock
    #[arg(long)]
    realtime: bool,

    /// Print the estimate as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkgain=info,linkgain_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    match run(&args, config).await {
        Ok(()) => {}
        Err(LinkError::BelowNoiseFloor { noise, received }) => {
            eprintln!("No usable signal: received power is not above the noise floor");
            eprintln!(
                "p_noise = {:.1} dBm (mean={:e} mW std={:e} mW)",
                noise.mean_dbm, noise.mean_mw, noise.std_mw
            );
            eprintln!(
                "p_rx    = {:.1} dBm (mean={:e} mW std={:e} mW)",
                received.mean_dbm, received.mean_mw, received.std_mw
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Measurement failed: {}", e);
            if e.is_retryable() {
                eprintln!("The measurement may succeed if repeated.");
            }
            std::process::exit(1);
        }
    }
}

fn load_config(args: &Args) -> Result<MeasurementConfig, LinkError> {
    let mut config = match &args.config {
        Some(path) => MeasurementConfig::from_file(path)?,
        None => MeasurementConfig::default(),
    };
    if let Some(repetitions) = args.repetitions {
        config.timing.repetitions = repetitions;
    }
    config.validate()?;
    Ok(config)
}

async fn run(args: &Args, config: MeasurementConfig) -> Result<(), LinkError> {
    let clock: Arc<dyn Clock> = if args.realtime {
        Arc::new(SystemClock::new())
    } else {
        Arc::new(MockClock::starting_at(chrono::Utc::now()))
    };

    let tx_addr = NodeAddress::new(&args.coordinator, args.cluster, args.tx_node);
    let rx_addr = NodeAddress::new(&args.coordinator, args.cluster, args.rx_node);
    let tx_name = tx_addr.to_string();
    let rx_name = rx_addr.to_string();

    let testbed = Arc::new(
        Testbed::new(clock.clone())
            .with_noise_floor(args.noise_floor_dbm)
            .with_noise_jitter(args.noise_jitter_db)
            .with_seed(args.seed)
            .with_path_gain(&tx_name, &rx_name, args.path_gain_db),
    );
    let tx = Arc::new(SimulatedNode::new(
        tx_name.clone(),
        cc2500_catalog(tx_name.clone()),
        testbed.clone(),
    ));
    let rx = Arc::new(SimulatedNode::new(
        rx_name.clone(),
        cc2500_catalog(rx_name.clone()),
        testbed,
    ));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping measurement");
            let _ = cancel_tx.send(true);
        }
    });

    let pair = NodePair::connect(tx, rx, config, clock)
        .await?
        .with_cancellation(cancel_rx);

    tracing::info!(
        tx = %tx_addr,
        rx = %rx_addr,
        frequency_hz = args.frequency_hz,
        tx_power_dbm = args.tx_power_dbm,
        "Measuring channel gain"
    );
    let estimate = pair.get_channel_gain(args.frequency_hz, args.tx_power_dbm).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&estimate)?);
    } else {
        println!("h = {:.1} dB", estimate.gain_db);
    }
    Ok(())
}
