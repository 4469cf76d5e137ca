//! Node pair orchestration

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::capabilities::{Capabilities, CapabilityCache, ConfigurationCatalog};
use crate::config::MeasurementConfig;
use crate::error::LinkResult;
use crate::estimator::{self, GainEstimate};
use crate::node::Node;
use crate::session::{MeasurementSession, PowerSampleSeries};
use crate::timing::Clock;

/// A transmitting and a sensing node used together for gain measurements
pub struct NodePair {
    session: MeasurementSession,
}

impl NodePair {
    /// Query both nodes for their catalogs and set up a session
    pub async fn connect(
        tx: Arc<dyn Node>,
        rx: Arc<dyn Node>,
        config: MeasurementConfig,
        clock: Arc<dyn Clock>,
    ) -> LinkResult<Self> {
        config.validate()?;
        let tx_catalog = Capabilities::fetch(tx.as_ref()).await?;
        let rx_catalog = Capabilities::fetch(rx.as_ref()).await?;
        Ok(Self::from_catalogs(tx, rx, tx_catalog, rx_catalog, config, clock))
    }

    /// Like [`NodePair::connect`], reusing catalogs already in `cache`
    pub async fn connect_cached(
        tx: Arc<dyn Node>,
        rx: Arc<dyn Node>,
        config: MeasurementConfig,
        clock: Arc<dyn Clock>,
        cache: &CapabilityCache,
    ) -> LinkResult<Self> {
        config.validate()?;
        let tx_catalog = cache.get_or_fetch(tx.as_ref()).await?;
        let rx_catalog = cache.get_or_fetch(rx.as_ref()).await?;
        Ok(Self::from_catalogs(tx, rx, tx_catalog, rx_catalog, config, clock))
    }

    fn from_catalogs(
        tx: Arc<dyn Node>,
        rx: Arc<dyn Node>,
        tx_catalog: Arc<ConfigurationCatalog>,
        rx_catalog: Arc<ConfigurationCatalog>,
        config: MeasurementConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            tx = tx.name(),
            rx = rx.name(),
            clock = clock.name(),
            "Node pair ready"
        );
        Self {
            session: MeasurementSession::new(tx, rx, tx_catalog, rx_catalog, config, clock),
        }
    }

    /// Stop waiting and abort the nodes' programs once `cancel` turns `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.session = self.session.with_cancellation(cancel);
        self
    }

    pub fn session(&self) -> &MeasurementSession {
        &self.session
    }

    /// Measure received power, with the transmitter at `tx_power_dbm` or silent
    pub async fn measure(
        &self,
        frequency_hz: f64,
        tx_power_dbm: Option<f64>,
    ) -> LinkResult<PowerSampleSeries> {
        self.session.measure(frequency_hz, tx_power_dbm).await
    }

    /// Measure the channel gain between the two nodes
    ///
    /// The noise floor is measured first with the transmitter silent, then the
    /// received power with the transmitter on. Both measurements use the same
    /// sensing node and therefore run one after the other.
    pub async fn get_channel_gain(
        &self,
        frequency_hz: f64,
        tx_power_dbm: f64,
    ) -> LinkResult<GainEstimate> {
        let noise = self.measure(frequency_hz, None).await?;
        let signal = self.measure(frequency_hz, Some(tx_power_dbm)).await?;
        let estimate = estimator::estimate(&noise.samples_dbm, &signal.samples_dbm, tx_power_dbm)?;
        Ok(GainEstimate {
            frequency_hz: Some(frequency_hz),
            ..estimate
        })
    }
}
