//! Hardware configuration catalogs
//!
//! A node reports its configurations once. The catalog is then used to turn
//! a requested frequency (and transmit power) into concrete hardware settings.
//! Not finding a match is an expected outcome: the frequency or power is simply
//! outside what the node's radio can do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::LinkResult;
use crate::node::Node;

/// One hardware configuration as reported by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Configuration identifier on the node
    pub id: u32,

    /// Human readable description
    pub name: String,

    /// Frequency of channel 0
    pub base_hz: f64,

    /// Distance between channels
    pub spacing_hz: f64,

    /// Number of channels
    pub num_channels: u32,

    /// Supported transmit power range, `None` for sensing-only configurations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_power_range_dbm: Option<(f64, f64)>,
}

impl DeviceConfig {
    /// Frequency of `channel`
    pub fn channel_frequency(&self, channel: u32) -> f64 {
        self.base_hz + channel as f64 * self.spacing_hz
    }

    /// Channel closest to `freq_hz`, if it lies on this configuration's grid
    pub fn channel_for(&self, freq_hz: f64) -> Option<u32> {
        if !freq_hz.is_finite() || self.spacing_hz <= 0.0 || self.num_channels == 0 {
            return None;
        }
        // Nearest channel, so anything within half a spacing of the grid resolves
        let channel = ((freq_hz - self.base_hz) / self.spacing_hz).round();
        if channel < 0.0 || channel >= self.num_channels as f64 {
            return None;
        }
        Some(channel as u32)
    }

    /// Whether this configuration can transmit at `power_dbm`
    pub fn supports_power(&self, power_dbm: f64) -> bool {
        match self.tx_power_range_dbm {
            Some((min, max)) => power_dbm >= min && power_dbm <= max,
            None => false,
        }
    }
}

/// Resolved transmit settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitConfig {
    pub config_id: u32,
    pub channel: u32,
    pub frequency_hz: f64,
    pub power_dbm: f64,
}

/// Resolved sensing sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensingConfig {
    pub config_id: u32,
    pub start_channel: u32,
    pub stop_channel: u32,
    pub step_channels: u32,
    pub start_hz: f64,
    pub step_hz: f64,
}

impl SensingConfig {
    /// Number of frequencies covered by one sweep
    pub fn points(&self) -> usize {
        let span = self.stop_channel.saturating_sub(self.start_channel);
        (span / self.step_channels.max(1)) as usize + 1
    }

    /// Frequencies covered by one sweep, in sweep order
    pub fn frequencies(&self) -> Vec<f64> {
        (0..self.points())
            .map(|i| self.start_hz + i as f64 * self.step_hz)
            .collect()
    }
}

/// Immutable set of hardware configurations for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationCatalog {
    /// Node the catalog was read from
    pub node: String,

    /// Reported configurations, in node order
    pub configs: Vec<DeviceConfig>,
}

impl ConfigurationCatalog {
    pub fn new(node: impl Into<String>, configs: Vec<DeviceConfig>) -> Self {
        Self {
            node: node.into(),
            configs,
        }
    }

    /// Find a configuration that can transmit at `freq_hz` with `power_dbm`
    pub fn find_transmit(&self, freq_hz: f64, power_dbm: f64) -> Option<TransmitConfig> {
        self.configs.iter().find_map(|config| {
            if !config.supports_power(power_dbm) {
                return None;
            }
            let channel = config.channel_for(freq_hz)?;
            Some(TransmitConfig {
                config_id: config.id,
                channel,
                frequency_hz: config.channel_frequency(channel),
                power_dbm,
            })
        })
    }

    /// Find a configuration that can sweep from `start_hz` to `stop_hz` in `step_hz` steps
    pub fn find_sensing(&self, start_hz: f64, stop_hz: f64, step_hz: f64) -> Option<SensingConfig> {
        if step_hz.is_nan() || step_hz <= 0.0 || start_hz > stop_hz {
            return None;
        }
        self.configs.iter().find_map(|config| {
            let start_channel = config.channel_for(start_hz)?;
            let stop_channel = config.channel_for(stop_hz)?;
            let step_channels = ((step_hz / config.spacing_hz).round() as u32).max(1);
            Some(SensingConfig {
                config_id: config.id,
                start_channel,
                stop_channel,
                step_channels,
                start_hz: config.channel_frequency(start_channel),
                step_hz: step_channels as f64 * config.spacing_hz,
            })
        })
    }
}

/// One-time capability query
pub struct Capabilities;

impl Capabilities {
    /// Query `node` for its configuration catalog
    pub async fn fetch(node: &dyn Node) -> LinkResult<Arc<ConfigurationCatalog>> {
        let catalog = node.get_capabilities().await?;
        debug!(
            node = node.name(),
            configs = catalog.configs.len(),
            "Fetched configuration catalog"
        );
        Ok(Arc::new(catalog))
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached catalogs
    pub entry_count: usize,

    /// Lookups served from the cache
    pub hits: u64,

    /// Lookups that queried a node
    pub misses: u64,
}

/// Catalog cache shared by node pairs that reuse the same nodes
///
/// Hardware does not change during an experiment, so entries never expire.
pub struct CapabilityCache {
    entries: RwLock<HashMap<String, Arc<ConfigurationCatalog>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Catalog for `node`, querying the node only on first use
    pub async fn get_or_fetch(&self, node: &dyn Node) -> LinkResult<Arc<ConfigurationCatalog>> {
        if let Some(catalog) = self.entries.read().await.get(node.name()) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            return Ok(catalog.clone());
        }

        // Hold the write lock across the query so concurrent callers wait for it
        let mut entries = self.entries.write().await;
        if let Some(catalog) = entries.get(node.name()) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            return Ok(catalog.clone());
        }

        self.misses.fetch_add(1, Ordering::SeqCst);
        let catalog = Capabilities::fetch(node).await?;
        entries.insert(node.name().to_string(), catalog.clone());
        Ok(catalog)
    }

    /// Cached catalog for `node`, without querying
    pub async fn get(&self, node: &str) -> Option<Arc<ConfigurationCatalog>> {
        self.entries.read().await.get(node).cloned()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.read().await.len(),
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
        }
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}
