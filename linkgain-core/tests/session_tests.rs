//! MeasurementSession tests

use std::sync::Arc;
use std::time::Duration;

use linkgain_core::sim::cc2500_catalog;
use linkgain_core::{
    Clock, ConfigurationCatalog, DeviceConfig, LinkError, MeasurementConfig, MeasurementSession,
    MockClock, NodePair, NodeRole, ProgramConfig, SimulatedNode, SystemClock, Testbed,
    TimingConfig,
};
use tokio::sync::watch;

struct Bench {
    clock: Arc<MockClock>,
    tx: Arc<SimulatedNode>,
    rx: Arc<SimulatedNode>,
}

fn testbed(clock: Arc<MockClock>) -> Arc<Testbed> {
    Arc::new(
        Testbed::new(clock)
            .with_noise_floor(-95.0)
            .with_path_gain("tx", "rx", -60.0),
    )
}

fn bench() -> Bench {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    Bench {
        tx: Arc::new(SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone())),
        rx: Arc::new(SimulatedNode::new("rx", cc2500_catalog("rx"), testbed)),
        clock,
    }
}

fn config_with_repetitions(repetitions: u32) -> MeasurementConfig {
    MeasurementConfig {
        timing: TimingConfig {
            repetitions,
            ..TimingConfig::default()
        },
        ..MeasurementConfig::default()
    }
}

async fn pair(bench: &Bench, config: MeasurementConfig) -> NodePair {
    NodePair::connect(bench.tx.clone(), bench.rx.clone(), config, bench.clock.clone())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_measure_returns_one_sample_per_sweep_point() {
    let bench = bench();
    let pair = pair(&bench, config_with_repetitions(7)).await;

    let series = pair.measure(2425e6, Some(0.0)).await.unwrap();

    assert_eq!(series.len(), 7);
    assert_eq!(series.tx_power_dbm, Some(0.0));
    assert_eq!(series.frequency_hz, 2425e6);
}

#[tokio::test]
async fn test_measure_with_transmitter_sees_signal() {
    let bench = bench();
    let pair = pair(&bench, config_with_repetitions(5)).await;

    let series = pair.measure(2425e6, Some(0.0)).await.unwrap();

    // -60 dB path gain from 0 dBm, well above the -95 dBm floor
    for sample in &series.samples_dbm {
        assert!((sample - (-60.0)).abs() < 0.01, "sample {}", sample);
    }
}

#[tokio::test]
async fn test_noise_only_measurement_never_reaches_transmitter() {
    let bench = bench();
    let pair = pair(&bench, MeasurementConfig::default()).await;

    let series = pair.measure(2425e6, None).await.unwrap();

    assert!(bench.tx.submitted().is_empty());
    assert_eq!(bench.rx.submitted().len(), 1);
    assert_eq!(series.tx_power_dbm, None);
    assert!((series.samples_dbm[0] - (-95.0)).abs() < 1e-9);
}

#[tokio::test]
async fn test_programs_follow_reference_timing() {
    let bench = bench();
    let t0 = bench.clock.now();
    let pair = pair(&bench, MeasurementConfig::default()).await;

    pair.measure(2425e6, Some(0.0)).await.unwrap();

    let tx = &bench.tx.submitted()[0];
    let rx = &bench.rx.submitted()[0];
    assert!(matches!(tx.config, ProgramConfig::Transmit(_)));
    assert!(matches!(rx.config, ProgramConfig::Sense(_)));
    assert_eq!(tx.start() - t0, chrono::Duration::seconds(1));
    assert_eq!(tx.stop() - t0, chrono::Duration::seconds(15));
    assert_eq!(rx.start() - t0, chrono::Duration::seconds(3));
    assert_eq!(rx.stop() - t0, chrono::Duration::seconds(13));
    assert_eq!(rx.repetitions, 1);
}

#[tokio::test]
async fn test_polls_at_fixed_interval_until_complete() {
    let bench = bench();
    let pair = pair(&bench, MeasurementConfig::default()).await;

    pair.measure(2425e6, Some(0.0)).await.unwrap();

    // Sensing stops at t0+13, the 2 s poll first sees it done at t0+14
    assert_eq!(bench.clock.sleeps(), vec![Duration::from_secs(2); 7]);
}

#[tokio::test]
async fn test_each_measurement_reprograms_both_nodes() {
    let bench = bench();
    let pair = pair(&bench, MeasurementConfig::default()).await;

    pair.measure(2425e6, Some(0.0)).await.unwrap();
    pair.measure(2425e6, Some(0.0)).await.unwrap();

    assert_eq!(bench.tx.submitted().len(), 2);
    assert_eq!(bench.rx.submitted().len(), 2);
    assert_eq!(bench.tx.capability_queries(), 1);
    assert_eq!(bench.rx.capability_queries(), 1);
}

#[tokio::test]
async fn test_tolerates_clock_skew_within_margin() {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    // Transmitter runs 1 s early, receiver 1 s late
    let tx = Arc::new(
        SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()).with_clock_offset(1000),
    );
    let rx = Arc::new(
        SimulatedNode::new("rx", cc2500_catalog("rx"), testbed).with_clock_offset(-1000),
    );
    let pair = NodePair::connect(tx, rx, config_with_repetitions(10), clock).await.unwrap();

    let series = pair.measure(2425e6, Some(0.0)).await.unwrap();

    assert_eq!(series.len(), 10);
    assert!(series.samples_dbm.iter().all(|s| (s - (-60.0)).abs() < 0.01));
}

#[tokio::test]
async fn test_skew_beyond_margin_loses_signal() {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    let tx = Arc::new(
        SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()).with_clock_offset(2500),
    );
    let rx = Arc::new(
        SimulatedNode::new("rx", cc2500_catalog("rx"), testbed).with_clock_offset(-2500),
    );
    let pair = NodePair::connect(tx, rx, config_with_repetitions(10), clock).await.unwrap();

    let series = pair.measure(2425e6, Some(0.0)).await.unwrap();

    let quiet = series.samples_dbm.iter().filter(|s| **s < -90.0).count();
    assert_eq!(quiet, 3);
}

#[tokio::test]
async fn test_unsupported_frequency_submits_nothing() {
    let bench = bench();
    let pair = pair(&bench, MeasurementConfig::default()).await;

    let result = pair.measure(868e6, Some(0.0)).await;

    match result {
        Err(LinkError::CapabilityMismatch { node, role, frequency_hz, .. }) => {
            assert_eq!(node, "tx");
            assert_eq!(role, NodeRole::Transmit);
            assert_eq!(frequency_hz, 868e6);
        }
        other => panic!("expected CapabilityMismatch, got {:?}", other),
    }
    assert!(bench.tx.submitted().is_empty());
    assert!(bench.rx.submitted().is_empty());
}

#[tokio::test]
async fn test_unsupported_power_submits_nothing() {
    let bench = bench();
    let pair = pair(&bench, MeasurementConfig::default()).await;

    let result = pair.measure(2425e6, Some(10.0)).await;

    assert!(matches!(
        result,
        Err(LinkError::CapabilityMismatch { power_dbm: Some(p), .. }) if p == 10.0
    ));
    assert!(bench.tx.submitted().is_empty());
    assert!(bench.rx.submitted().is_empty());
}

#[tokio::test]
async fn test_receiver_mismatch_keeps_transmitter_silent() {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    let sub_ghz = ConfigurationCatalog::new(
        "rx",
        vec![DeviceConfig {
            id: 0,
            name: "868 MHz".to_string(),
            base_hz: 868e6,
            spacing_hz: 100e3,
            num_channels: 10,
            tx_power_range_dbm: None,
        }],
    );
    let tx = Arc::new(SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()));
    let rx = Arc::new(SimulatedNode::new("rx", sub_ghz, testbed));
    let pair = NodePair::connect(tx.clone(), rx.clone(), MeasurementConfig::default(), clock)
        .await
        .unwrap();

    let result = pair.measure(2425e6, Some(0.0)).await;

    assert!(matches!(
        result,
        Err(LinkError::CapabilityMismatch { role: NodeRole::Sense, .. })
    ));
    assert!(tx.submitted().is_empty());
    assert!(rx.submitted().is_empty());
}

#[tokio::test]
async fn test_unresponsive_receiver_times_out_and_aborts() {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    let tx = Arc::new(SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()));
    let rx = Arc::new(SimulatedNode::new("rx", cc2500_catalog("rx"), testbed).unresponsive());
    let pair = NodePair::connect(tx.clone(), rx.clone(), MeasurementConfig::default(), clock)
        .await
        .unwrap();

    let result = pair.measure(2425e6, Some(0.0)).await;

    match result {
        Err(e @ LinkError::Timeout { .. }) => {
            assert!(e.is_retryable());
            if let LinkError::Timeout { node, waited_ms } = e {
                assert_eq!(node, "rx");
                // 3 × (3 s lead + 10 s sensing), observed on the next 2 s poll
                assert_eq!(waited_ms, 40_000);
            }
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert_eq!(tx.aborted().len(), 1);
    assert_eq!(rx.aborted().len(), 1);
}

#[tokio::test]
async fn test_rejected_sensing_program_aborts_transmitter() {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    let tx = Arc::new(SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()));
    let rx = Arc::new(
        SimulatedNode::new("rx", cc2500_catalog("rx"), testbed).failing_submissions(),
    );
    let pair = NodePair::connect(tx.clone(), rx.clone(), MeasurementConfig::default(), clock)
        .await
        .unwrap();

    let result = pair.measure(2425e6, Some(0.0)).await;

    assert!(matches!(result, Err(LinkError::Transport(_))));
    assert_eq!(tx.submitted().len(), 1);
    assert_eq!(tx.aborted().len(), 1);
    assert!(rx.aborted().is_empty());
}

fn long_tail_timing() -> MeasurementConfig {
    // Transmission outlasts sensing by 8 s, longer than the gap to the next sensing window
    MeasurementConfig {
        timing: TimingConfig {
            tx_lead_ms: 0,
            rx_lead_ms: 2000,
            rx_duration_ms: 10_000,
            tx_duration_ms: 20_000,
            repetitions: 4,
            ..TimingConfig::default()
        },
        ..MeasurementConfig::default()
    }
}

#[tokio::test]
async fn test_transmitter_released_after_measurement() {
    let bench = bench();
    let pair = pair(&bench, long_tail_timing()).await;

    let signal = pair.measure(2425e6, Some(0.0)).await.unwrap();
    let noise = pair.measure(2425e6, None).await.unwrap();

    assert!(signal.samples_dbm.iter().all(|s| (s - (-60.0)).abs() < 0.01));
    assert!(noise.samples_dbm.iter().all(|s| (s - (-95.0)).abs() < 1e-9), "{:?}", noise.samples_dbm);
    assert_eq!(bench.tx.aborted().len(), 1);
    assert!(bench.rx.aborted().is_empty());
}

#[tokio::test]
async fn test_failed_poll_aborts_both_nodes() {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    let tx = Arc::new(SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()));
    let rx = Arc::new(SimulatedNode::new("rx", cc2500_catalog("rx"), testbed).failing_polls());
    let pair = NodePair::connect(tx.clone(), rx.clone(), MeasurementConfig::default(), clock)
        .await
        .unwrap();

    let result = pair.measure(2425e6, Some(0.0)).await;

    assert!(matches!(result, Err(LinkError::Transport(_))));
    assert_eq!(tx.aborted().len(), 1);
    assert_eq!(rx.aborted().len(), 1);
}

#[tokio::test]
async fn test_failed_retrieval_aborts_both_nodes() {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    let tx = Arc::new(SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()));
    let rx = Arc::new(SimulatedNode::new("rx", cc2500_catalog("rx"), testbed).failing_retrieval());
    let pair = NodePair::connect(tx.clone(), rx.clone(), MeasurementConfig::default(), clock.clone())
        .await
        .unwrap();

    let result = pair.measure(2425e6, Some(0.0)).await;

    assert!(matches!(result, Err(LinkError::Transport(_))));
    // Only failed after the full poll cycle
    assert_eq!(clock.sleeps().len(), 7);
    assert_eq!(tx.aborted().len(), 1);
    assert_eq!(rx.aborted().len(), 1);
}

#[tokio::test]
async fn test_short_series_is_returned_as_is() {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    let tx = Arc::new(SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()));
    let rx = Arc::new(SimulatedNode::new("rx", cc2500_catalog("rx"), testbed).losing_samples(2));
    let pair = NodePair::connect(tx.clone(), rx, config_with_repetitions(5), clock)
        .await
        .unwrap();

    let series = pair.measure(2425e6, Some(0.0)).await.unwrap();

    assert_eq!(series.len(), 3);
    assert_eq!(tx.aborted().len(), 1);
}

#[tokio::test]
async fn test_no_samples_is_an_error() {
    let clock = Arc::new(MockClock::new());
    let testbed = testbed(clock.clone());
    let tx = Arc::new(SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()));
    let rx = Arc::new(SimulatedNode::new("rx", cc2500_catalog("rx"), testbed).losing_samples(5));
    let pair = NodePair::connect(tx.clone(), rx, config_with_repetitions(5), clock)
        .await
        .unwrap();

    let result = pair.measure(2425e6, Some(0.0)).await;

    assert!(matches!(result, Err(LinkError::EmptySeries)));
    assert_eq!(tx.aborted().len(), 1);
}

#[tokio::test]
async fn test_unrepresentable_schedule_submits_nothing() {
    let bench = bench();
    let mut config = MeasurementConfig::default();
    config.timing.rx_lead_ms = 100_000_000_000_000_000;
    config.timing.tx_duration_ms = 200_000_000_000_000_000;
    // Bypasses NodePair::connect, which would reject the config up front
    let session = MeasurementSession::new(
        bench.tx.clone(),
        bench.rx.clone(),
        Arc::new(cc2500_catalog("tx")),
        Arc::new(cc2500_catalog("rx")),
        config,
        bench.clock.clone(),
    );

    let result = session.measure(2425e6, Some(0.0)).await;

    assert!(matches!(result, Err(LinkError::SchedulingViolation(_))));
    assert!(bench.tx.submitted().is_empty());
    assert!(bench.rx.submitted().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_completion_aborts_both_nodes() {
    let bench = bench();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let pair = pair(&bench, MeasurementConfig::default())
        .await
        .with_cancellation(cancel_rx);

    cancel_tx.send(true).unwrap();
    let result = pair.measure(2425e6, Some(0.0)).await;

    assert!(matches!(result, Err(LinkError::Cancelled)));
    assert_eq!(bench.tx.aborted().len(), 1);
    assert_eq!(bench.rx.aborted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_poll_sleep() {
    let clock = Arc::new(SystemClock::new());
    let testbed = Arc::new(Testbed::new(clock.clone()));
    let tx = Arc::new(SimulatedNode::new("tx", cc2500_catalog("tx"), testbed.clone()));
    let rx = Arc::new(SimulatedNode::new("rx", cc2500_catalog("rx"), testbed));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let pair = NodePair::connect(tx, rx.clone(), MeasurementConfig::default(), clock)
        .await
        .unwrap()
        .with_cancellation(cancel_rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = cancel_tx.send(true);
    });

    let started = tokio::time::Instant::now();
    let result = pair.measure(2425e6, None).await;

    assert!(matches!(result, Err(LinkError::Cancelled)));
    // Woken by the signal, not by the 6 s poll tick
    let elapsed = tokio::time::Instant::now() - started;
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    assert_eq!(rx.aborted().len(), 1);
}

#[tokio::test]
async fn test_higher_tx_power_raises_received_mean() {
    let bench = bench();
    let pair = pair(&bench, config_with_repetitions(3)).await;

    let mut previous = f64::NEG_INFINITY;
    for power in [-30.0, -20.0, -10.0, 0.0] {
        let series = pair.measure(2425e6, Some(power)).await.unwrap();
        let mean = series.samples_dbm.iter().sum::<f64>() / series.len() as f64;
        assert!(mean > previous, "{} dBm gave {}", power, mean);
        previous = mean;
    }
}
