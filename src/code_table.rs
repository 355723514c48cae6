use rustfft::FftPlanner;
use rustfft::num_complex::Complex64;

use crate::constants::CHIP_RATE_HZ;
use crate::constants::PRN_CODE_LEN;
use crate::gold_code::gen_code;
use crate::types::AcquisitionConfig;
use crate::types::AcquisitionError;

/// One PRN's ranging code resampled to the correlation block length, kept in
/// both time and (conjugated, matched-filter-ready) frequency domain.
pub struct UpsampledCode {
    pub prn: u8,
    pub time_domain: Vec<Complex64>,
    pub spectrum: Vec<Complex64>,
}

/// Immutable per-process table of upsampled code spectra, built once before
/// the worker's first cycle.
pub struct CodeTable {
    codes: Vec<UpsampledCode>,
    samples_per_code: usize,
}

impl CodeTable {
    pub fn build(config: &AcquisitionConfig) -> Result<Self, AcquisitionError> {
        let block_size = config.block_size;
        let samples_per_code =
            (PRN_CODE_LEN as f64 * config.sample_rate / CHIP_RATE_HZ) as usize;
        if samples_per_code == 0 {
            return Err(AcquisitionError::CodeTable(format!(
                "sample_rate {} Hz resamples 1023 chips to zero samples",
                config.sample_rate
            )));
        }
        if samples_per_code > block_size {
            log::warn!(
                "code table: one code period is {} samples, truncated to block of {}",
                samples_per_code,
                block_size
            );
        }

        let mut fft_planner: FftPlanner<f64> = FftPlanner::new();
        let fft_fw = fft_planner.plan_fft_forward(block_size);

        let mut codes = Vec::with_capacity(config.active_prns().len());
        for prn in config.active_prns() {
            let chips = gen_code(prn)?;

            // nearest-neighbor resample, zero-clear past the code period
            let mut time_domain = vec![Complex64::default(); block_size];
            for i in 0..block_size {
                let chip_idx = (i as f64 * CHIP_RATE_HZ / config.sample_rate) as usize;
                if chip_idx >= PRN_CODE_LEN {
                    break;
                }
                time_domain[i] = Complex64::new(chips[chip_idx] as f64, 0.0);
            }

            let mut spectrum = time_domain.clone();
            fft_fw.process(&mut spectrum);
            for v in spectrum.iter_mut() {
                *v = v.conj();
            }

            codes.push(UpsampledCode {
                prn,
                time_domain,
                spectrum,
            });
        }

        log::info!(
            "code table: {} codes upsampled to {} samples/code, block={}",
            codes.len(),
            samples_per_code,
            block_size
        );
        Ok(Self {
            codes,
            samples_per_code,
        })
    }

    pub fn get(&self, prn: u8) -> Option<&UpsampledCode> {
        self.codes.iter().find(|c| c.prn == prn)
    }

    pub fn codes(&self) -> &[UpsampledCode] {
        &self.codes
    }

    pub fn samples_per_code(&self) -> usize {
        self.samples_per_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_SAMPLE_RATE;

    fn small_config() -> AcquisitionConfig {
        AcquisitionConfig {
            block_size: 2048,
            sample_rate: 2.046e6,
            excluded_prns: (3..=32).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn upsampled_code_fills_one_period_then_zeros() {
        let table = CodeTable::build(&small_config()).unwrap();
        assert_eq!(table.samples_per_code(), 2046);
        let code = table.get(1).unwrap();
        assert_eq!(code.time_domain.len(), 2048);
        for v in &code.time_domain[..2046] {
            assert_eq!(v.re.abs(), 1.0);
            assert_eq!(v.im, 0.0);
        }
        for v in &code.time_domain[2046..] {
            assert_eq!(*v, Complex64::default());
        }
        // 2x upsampling duplicates each chip
        assert_eq!(code.time_domain[0], code.time_domain[1]);
    }

    #[test]
    fn default_ratio_leaves_16_pad_samples() {
        let config = AcquisitionConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            excluded_prns: (2..=32).collect(),
            ..Default::default()
        };
        let table = CodeTable::build(&config).unwrap();
        assert_eq!(table.samples_per_code(), 16368);
        let code = table.get(1).unwrap();
        assert_eq!(code.time_domain.len(), 16384);
        assert!(
            code.time_domain[16368..]
                .iter()
                .all(|v| *v == Complex64::default())
        );
    }

    #[test]
    fn excluded_prns_are_not_built() {
        let table = CodeTable::build(&small_config()).unwrap();
        assert_eq!(table.codes().len(), 2);
        assert!(table.get(1).is_some());
        assert!(table.get(2).is_some());
        assert!(table.get(3).is_none());
    }

    #[test]
    fn degenerate_sample_rate_is_fatal() {
        let config = AcquisitionConfig {
            sample_rate: 500.0,
            ..small_config()
        };
        match CodeTable::build(&config) {
            Err(AcquisitionError::CodeTable(_)) => {}
            other => panic!("expected code table error, got {:?}", other.is_ok()),
        }
    }
}
