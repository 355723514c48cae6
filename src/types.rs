use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

use crate::compute::ComputeError;
use crate::constants::DEFAULT_BLOCK_SIZE;
use crate::constants::DEFAULT_DOPPLER_BINS;
use crate::constants::DEFAULT_DOPPLER_SPACING_HZ;
use crate::constants::DEFAULT_SAMPLE_RATE;
use crate::constants::NUM_GPS_SATS;

/// Constants of one acquisition engine instance, fixed at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub block_size: usize,
    pub num_doppler_bins: usize,
    pub doppler_spacing_hz: f64,
    pub sample_rate: f64,
    pub excluded_prns: Vec<u8>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            num_doppler_bins: DEFAULT_DOPPLER_BINS,
            doppler_spacing_hz: DEFAULT_DOPPLER_SPACING_HZ,
            sample_rate: DEFAULT_SAMPLE_RATE,
            excluded_prns: vec![],
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if !self.block_size.is_power_of_two() {
            return Err(AcquisitionError::InvalidConfig(format!(
                "block_size={} is not a power of two",
                self.block_size
            )));
        }
        if self.num_doppler_bins == 0 || self.doppler_spacing_hz <= 0.0 {
            return Err(AcquisitionError::InvalidConfig(format!(
                "bad doppler search: {} bins spaced {} Hz",
                self.num_doppler_bins, self.doppler_spacing_hz
            )));
        }
        if self.sample_rate <= 0.0 {
            return Err(AcquisitionError::InvalidConfig(format!(
                "bad sample_rate: {}",
                self.sample_rate
            )));
        }
        Ok(())
    }

    /// PRNs searched each cycle, ascending.
    pub fn active_prns(&self) -> Vec<u8> {
        (1..=NUM_GPS_SATS as u8)
            .filter(|prn| !self.excluded_prns.contains(prn))
            .collect()
    }

    /// Center frequency of Doppler bin `idx`, symmetric around zero.
    pub fn doppler_bin_hz(&self, idx: usize) -> f64 {
        let n = self.num_doppler_bins as f64;
        let spacing = self.doppler_spacing_hz;
        -(n / 2.0).floor() * spacing + spacing / 2.0 + idx as f64 * spacing
    }

    pub fn doppler_search_range_hz(&self) -> (f64, f64) {
        (
            self.doppler_bin_hz(0),
            self.doppler_bin_hz(self.num_doppler_bins - 1),
        )
    }
}

/// Per-code, per-cycle acquisition outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakStatistics {
    pub prn: u8,
    pub peak: f64,
    pub mean: f64,
    pub doppler_hz: f64,
    pub doppler_bin: usize,
    pub code_phase_bin: usize,
    pub code_phase_chips: f64,
}

/// Read-only view over one cycle's correlation magnitudes, one row per
/// Doppler bin. Valid only for the duration of the sink callback.
pub struct CorrelationView<'a> {
    mag: &'a [f64],
    block_size: usize,
}

impl<'a> CorrelationView<'a> {
    pub fn new(mag: &'a [f64], block_size: usize) -> Self {
        debug_assert_eq!(mag.len() % block_size, 0);
        Self { mag, block_size }
    }

    pub fn num_bins(&self) -> usize {
        self.mag.len() / self.block_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn bin(&self, idx: usize) -> &'a [f64] {
        &self.mag[idx * self.block_size..(idx + 1) * self.block_size]
    }
}

#[derive(Debug)]
pub enum AcquisitionError {
    InvalidPrn(u8),
    InvalidConfig(String),
    CodeTable(String),
    Compute(ComputeError),
    WorkerStart(String),
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AcquisitionError::InvalidPrn(prn) => write!(f, "invalid prn: {}", prn),
            AcquisitionError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            AcquisitionError::CodeTable(msg) => write!(f, "code table: {}", msg),
            AcquisitionError::Compute(err) => write!(f, "compute: {}", err),
            AcquisitionError::WorkerStart(msg) => write!(f, "worker start: {}", msg),
        }
    }
}

impl Error for AcquisitionError {}

impl From<ComputeError> for AcquisitionError {
    fn from(err: ComputeError) -> Self {
        AcquisitionError::Compute(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doppler_bins_are_zero_centered() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.num_doppler_bins, 28);
        assert_eq!(config.doppler_bin_hz(0), -6750.0);
        assert_eq!(config.doppler_bin_hz(27), 6750.0);
        for i in 0..14 {
            let lo = config.doppler_bin_hz(i);
            let hi = config.doppler_bin_hz(27 - i);
            assert_eq!(lo, -hi);
        }
        assert_eq!(config.doppler_search_range_hz(), (-6750.0, 6750.0));
    }

    #[test]
    fn active_prns_honor_exclusions() {
        let config = AcquisitionConfig {
            excluded_prns: vec![1, 7, 32],
            ..Default::default()
        };
        let active = config.active_prns();
        assert_eq!(active.len(), 29);
        assert!(!active.contains(&7));
        assert_eq!(active[0], 2);
        assert!(active.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn config_validation_rejects_bad_block() {
        let config = AcquisitionConfig {
            block_size: 10000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(AcquisitionConfig::default().validate().is_ok());
    }
}
