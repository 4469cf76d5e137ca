//! Channel gain estimation
//!
//! Power readings arrive in dBm. Logarithmic values cannot be subtracted, so
//! everything is converted to milliwatts, averaged, and only the final ratio is
//! converted back to decibels.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LinkError, LinkResult};

/// Convert a power level from decibels to linear scale
pub fn db_to_mw(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a linear power level to decibels
pub fn mw_to_db(mw: f64) -> f64 {
    10.0 * mw.log10()
}

/// Mean and spread of one power sample series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSummary {
    /// Number of samples
    pub samples: usize,

    /// Mean power in milliwatts
    pub mean_mw: f64,

    /// Population standard deviation in milliwatts
    pub std_mw: f64,

    /// Mean power converted back to dBm
    pub mean_dbm: f64,
}

impl PowerSummary {
    /// Summarize a series of dBm readings
    pub fn from_dbm(samples_dbm: &[f64]) -> LinkResult<Self> {
        if samples_dbm.is_empty() {
            return Err(LinkError::EmptySeries);
        }
        let mw: Vec<f64> = samples_dbm.iter().map(|&db| db_to_mw(db)).collect();
        let n = mw.len() as f64;
        let mean_mw = mw.iter().sum::<f64>() / n;
        let variance = mw.iter().map(|x| (x - mean_mw).powi(2)).sum::<f64>() / n;

        Ok(Self {
            samples: mw.len(),
            mean_mw,
            std_mw: variance.sqrt(),
            mean_dbm: mw_to_db(mean_mw),
        })
    }
}

/// Channel gain derived from a noise and a signal measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainEstimate {
    /// Frequency both measurements were taken at, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_hz: Option<f64>,

    /// Transmit power the signal measurement was taken with
    pub tx_power_dbm: f64,

    /// Gain as a power ratio
    pub gain_linear: f64,

    /// Gain in decibels
    pub gain_db: f64,

    /// Noise-only measurement
    pub noise: PowerSummary,

    /// Signal plus noise measurement
    pub received: PowerSummary,
}

/// Estimate the channel gain from noise-only and signal-plus-noise readings
pub fn estimate(noise_dbm: &[f64], signal_dbm: &[f64], tx_power_dbm: f64) -> LinkResult<GainEstimate> {
    let noise = PowerSummary::from_dbm(noise_dbm)?;
    let received = PowerSummary::from_dbm(signal_dbm)?;

    info!(
        "p_noise = {:.1} dBm (mean={:e} mW std={:e} mW)",
        noise.mean_dbm, noise.mean_mw, noise.std_mw
    );
    info!(
        "p_rx    = {:.1} dBm (mean={:e} mW std={:e} mW)",
        received.mean_dbm, received.mean_mw, received.std_mw
    );

    let gain_linear = (received.mean_mw - noise.mean_mw) / db_to_mw(tx_power_dbm);
    if !(gain_linear.is_finite() && gain_linear > 0.0) {
        return Err(LinkError::BelowNoiseFloor { noise, received });
    }
    let gain_db = mw_to_db(gain_linear);

    info!("h = {:.1} dB", gain_db);

    Ok(GainEstimate {
        frequency_hz: None,
        tx_power_dbm,
        gain_linear,
        gain_db,
        noise,
        received,
    })
}
