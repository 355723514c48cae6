use rayon::prelude::*;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::error::Error;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::util::doppler_shift;
use crate::util::get_max_with_idx;
use crate::util::mean;

#[derive(Debug, Clone, PartialEq)]
pub enum ComputeError {
    BufferMapped(&'static str),
    QueueBusy(usize),
    ArgNotBound(&'static str),
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ComputeError::BufferMapped(name) => {
                write!(f, "buffer '{}' is host-mapped", name)
            }
            ComputeError::QueueBusy(n) => {
                write!(f, "queue has {} unfinished commands", n)
            }
            ComputeError::ArgNotBound(name) => write!(f, "kernel arg '{}' not bound", name),
            ComputeError::SizeMismatch {
                what,
                expected,
                actual,
            } => write!(f, "{}: expected {} elements, got {}", what, expected, actual),
        }
    }
}

impl Error for ComputeError {}

/// Compute-accelerator handle: owns the FFT plans every kernel runs on.
/// Injected into the acquisition worker at construction; never shared
/// across threads.
pub struct ComputeDevice {
    block_size: usize,
    fft_fw: Arc<dyn Fft<f64>>,
    fft_inv: Arc<dyn Fft<f64>>,
}

impl ComputeDevice {
    pub fn new(block_size: usize) -> Self {
        let mut planner: FftPlanner<f64> = FftPlanner::new();
        Self {
            block_size,
            fft_fw: planner.plan_fft_forward(block_size),
            fft_inv: planner.plan_fft_inverse(block_size),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

/// In-order command queue. Kernels execute at enqueue but completion is
/// only observable after `finish()`; host mapping is refused while commands
/// are outstanding.
#[derive(Default)]
pub struct CommandQueue {
    pending: usize,
    completed: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, name: &'static str) {
        log::trace!("queue: enqueue {}", name);
        self.pending += 1;
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Block until every enqueued command has completed.
    pub fn finish(&mut self) -> Result<(), ComputeError> {
        self.completed += self.pending as u64;
        self.pending = 0;
        Ok(())
    }
}

/// Device-resident buffer in a two-state lifecycle: unmapped (kernels may
/// read/write) or host-mapped through a [`MapGuard`] (host may read/write).
pub struct DeviceBuffer<T> {
    name: &'static str,
    data: Vec<T>,
    mapped: bool,
}

impl<T: Clone + Default> DeviceBuffer<T> {
    pub fn new(name: &'static str, len: usize) -> Self {
        Self {
            name,
            data: vec![T::default(); len],
            mapped: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Map the buffer into host memory. Refused while the queue still has
    /// unfinished commands; the guard unmaps on every exit path.
    pub fn map<'a>(
        &'a mut self,
        queue: &CommandQueue,
    ) -> Result<MapGuard<'a, T>, ComputeError> {
        if queue.pending() > 0 {
            return Err(ComputeError::QueueBusy(queue.pending()));
        }
        if self.mapped {
            return Err(ComputeError::BufferMapped(self.name));
        }
        self.mapped = true;
        Ok(MapGuard { buf: self })
    }

    fn check_unmapped(&self) -> Result<(), ComputeError> {
        if self.mapped {
            return Err(ComputeError::BufferMapped(self.name));
        }
        Ok(())
    }

    fn check_len(&self, expected: usize) -> Result<(), ComputeError> {
        if self.data.len() != expected {
            return Err(ComputeError::SizeMismatch {
                what: self.name,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

pub struct MapGuard<'a, T> {
    buf: &'a mut DeviceBuffer<T>,
}

impl<T> Deref for MapGuard<'_, T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.buf.data
    }
}

impl<T> DerefMut for MapGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.buf.data
    }
}

impl<T> Drop for MapGuard<'_, T> {
    fn drop(&mut self) {
        self.buf.mapped = false;
    }
}

/// Stage one of the correlation pair: shift the input block to each Doppler
/// bin and forward-transform every copy. Frequency offsets are bound once
/// at setup.
pub struct MixFftKernel {
    fft_fw: Arc<dyn Fft<f64>>,
    block_size: usize,
    doppler_bins_hz: Vec<f64>,
    sample_rate: f64,
}

impl MixFftKernel {
    pub fn new(device: &ComputeDevice, doppler_bins_hz: Vec<f64>, sample_rate: f64) -> Self {
        Self {
            fft_fw: Arc::clone(&device.fft_fw),
            block_size: device.block_size,
            doppler_bins_hz,
            sample_rate,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.doppler_bins_hz.len()
    }

    pub fn enqueue(
        &self,
        queue: &mut CommandQueue,
        input: &DeviceBuffer<Complex64>,
        mixed: &mut DeviceBuffer<Complex64>,
    ) -> Result<(), ComputeError> {
        input.check_unmapped()?;
        mixed.check_unmapped()?;
        input.check_len(self.block_size)?;
        mixed.check_len(self.block_size * self.num_bins())?;

        queue.record("mix_fft");
        mixed
            .data
            .par_chunks_mut(self.block_size)
            .enumerate()
            .for_each(|(bin, row)| {
                row.copy_from_slice(&input.data);
                // carrier wipe-off at minus the hypothesized Doppler
                doppler_shift(-self.doppler_bins_hz[bin], row, self.sample_rate);
                self.fft_fw.process(row);
            });
        Ok(())
    }
}

/// Stage two: multiply one code's spectrum against every mixed row, inverse
/// transform, and reduce each row to magnitude / max / argmax / mean. The
/// code-table offset is the only argument rebound between enqueues.
pub struct MatchedFilterKernel {
    fft_inv: Arc<dyn Fft<f64>>,
    block_size: usize,
    code_offset: Option<usize>,
}

impl MatchedFilterKernel {
    pub fn new(device: &ComputeDevice) -> Self {
        Self {
            fft_inv: Arc::clone(&device.fft_inv),
            block_size: device.block_size,
            code_offset: None,
        }
    }

    /// Rebind the per-code argument: element offset of the code's spectrum
    /// inside the code-table buffer.
    pub fn bind_code_offset(&mut self, offset: usize) {
        self.code_offset = Some(offset);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &self,
        queue: &mut CommandQueue,
        code_table: &DeviceBuffer<Complex64>,
        mixed: &DeviceBuffer<Complex64>,
        corr_mag: &mut DeviceBuffer<f64>,
        peak_val: &mut DeviceBuffer<f64>,
        peak_pos: &mut DeviceBuffer<u32>,
        mean_val: &mut DeviceBuffer<f64>,
    ) -> Result<(), ComputeError> {
        let offset = self
            .code_offset
            .ok_or(ComputeError::ArgNotBound("code_offset"))?;
        for check in [
            code_table.check_unmapped(),
            mixed.check_unmapped(),
            corr_mag.check_unmapped(),
            peak_val.check_unmapped(),
            peak_pos.check_unmapped(),
            mean_val.check_unmapped(),
        ] {
            check?;
        }
        let block = self.block_size;
        let bins = mixed.len() / block;
        if offset + block > code_table.len() {
            return Err(ComputeError::SizeMismatch {
                what: "code_table",
                expected: offset + block,
                actual: code_table.len(),
            });
        }
        corr_mag.check_len(bins * block)?;
        peak_val.check_len(bins)?;
        peak_pos.check_len(bins)?;
        mean_val.check_len(bins)?;

        queue.record("matched_filter");
        let spectrum = &code_table.data[offset..offset + block];
        corr_mag
            .data
            .par_chunks_mut(block)
            .zip(peak_val.data.par_iter_mut())
            .zip(peak_pos.data.par_iter_mut())
            .zip(mean_val.data.par_iter_mut())
            .enumerate()
            .for_each(|(bin, (((mag_row, pv), pp), mv))| {
                let mixed_row = &mixed.data[bin * block..(bin + 1) * block];
                let mut prod: Vec<Complex64> = mixed_row
                    .iter()
                    .zip(spectrum.iter())
                    .map(|(a, b)| a * b)
                    .collect();
                self.fft_inv.process(&mut prod);
                for (mag, v) in mag_row.iter_mut().zip(prod.iter()) {
                    // unnormalized fft+ifft scale by the block length
                    *mag = v.norm() / block as f64;
                }
                let (idx, max) = get_max_with_idx(mag_row);
                *pv = max;
                *pp = idx as u32;
                *mv = mean(mag_row);
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_table::CodeTable;
    use crate::types::AcquisitionConfig;

    const BLOCK: usize = 2048;

    fn config() -> AcquisitionConfig {
        AcquisitionConfig {
            block_size: BLOCK,
            sample_rate: 2.046e6,
            excluded_prns: (3..=32).collect(),
            ..Default::default()
        }
    }

    fn correlate(input: &[Complex64], prn: u8) -> (Vec<f64>, f64, u32, f64) {
        let device = ComputeDevice::new(BLOCK);
        let table = CodeTable::build(&config()).unwrap();
        let mut queue = CommandQueue::new();

        let mut input_buf = DeviceBuffer::<Complex64>::new("input", BLOCK);
        input_buf.map(&queue).unwrap().copy_from_slice(input);

        let mut code_buf = DeviceBuffer::<Complex64>::new("code_table", 2 * BLOCK);
        {
            let mut m = code_buf.map(&queue).unwrap();
            m[..BLOCK].copy_from_slice(&table.get(1).unwrap().spectrum);
            m[BLOCK..].copy_from_slice(&table.get(2).unwrap().spectrum);
        }

        let mix = MixFftKernel::new(&device, vec![0.0], 2.046e6);
        let mut mixed = DeviceBuffer::<Complex64>::new("mixed", BLOCK);
        mix.enqueue(&mut queue, &input_buf, &mut mixed).unwrap();
        queue.finish().unwrap();

        let mut mf = MatchedFilterKernel::new(&device);
        mf.bind_code_offset((prn as usize - 1) * BLOCK);
        let mut corr = DeviceBuffer::<f64>::new("corr", BLOCK);
        let mut pv = DeviceBuffer::<f64>::new("pv", 1);
        let mut pp = DeviceBuffer::<u32>::new("pp", 1);
        let mut mv = DeviceBuffer::<f64>::new("mv", 1);
        mf.enqueue(&mut queue, &code_buf, &mixed, &mut corr, &mut pv, &mut pp, &mut mv)
            .unwrap();
        queue.finish().unwrap();

        let mag = corr.map(&queue).unwrap().to_vec();
        let peak = pv.map(&queue).unwrap()[0];
        let pos = pp.map(&queue).unwrap()[0];
        let mean = mv.map(&queue).unwrap()[0];
        (mag, peak, pos, mean)
    }

    #[test]
    fn autocorrelation_peaks_at_zero_lag() {
        let table = CodeTable::build(&config()).unwrap();
        let input = table.get(1).unwrap().time_domain.clone();
        let (_, peak, pos, mean) = correlate(&input, 1);
        assert_eq!(pos, 0);
        assert!(peak > 2000.0, "peak={}", peak);
        assert!(peak / mean > 10.0, "peak/mean={}", peak / mean);
    }

    #[test]
    fn cross_correlation_stays_near_the_floor() {
        let table = CodeTable::build(&config()).unwrap();
        let input = table.get(2).unwrap().time_domain.clone();
        let (_, auto_peak, _, auto_mean) = correlate(&input, 2);
        let (_, peak, _, mean) = correlate(&input, 1);
        let cross_ratio = peak / mean;
        let auto_ratio = auto_peak / auto_mean;
        assert!(cross_ratio < 5.0, "cross peak/mean={}", cross_ratio);
        assert!(cross_ratio < auto_ratio / 5.0);
    }

    #[test]
    fn matched_filter_requires_bound_code() {
        let device = ComputeDevice::new(BLOCK);
        let mut queue = CommandQueue::new();
        let code = DeviceBuffer::<Complex64>::new("code_table", BLOCK);
        let mixed = DeviceBuffer::<Complex64>::new("mixed", BLOCK);
        let mut corr = DeviceBuffer::<f64>::new("corr", BLOCK);
        let mut pv = DeviceBuffer::<f64>::new("pv", 1);
        let mut pp = DeviceBuffer::<u32>::new("pp", 1);
        let mut mv = DeviceBuffer::<f64>::new("mv", 1);
        let mf = MatchedFilterKernel::new(&device);
        let err = mf
            .enqueue(&mut queue, &code, &mixed, &mut corr, &mut pv, &mut pp, &mut mv)
            .unwrap_err();
        assert_eq!(err, ComputeError::ArgNotBound("code_offset"));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn map_is_refused_while_commands_are_pending() {
        let mut queue = CommandQueue::new();
        queue.record("fake");
        let mut buf = DeviceBuffer::<f64>::new("out", 4);
        match buf.map(&queue) {
            Err(ComputeError::QueueBusy(1)) => {}
            _ => panic!("expected QueueBusy"),
        }
        queue.finish().unwrap();
        assert!(buf.map(&queue).is_ok());
        // guard dropped: mappable again
        assert!(buf.map(&queue).is_ok());
    }

    #[test]
    fn mix_kernel_checks_sizes() {
        let device = ComputeDevice::new(BLOCK);
        let mut queue = CommandQueue::new();
        let input = DeviceBuffer::<Complex64>::new("input", BLOCK);
        let mut mixed = DeviceBuffer::<Complex64>::new("mixed", BLOCK);
        let mix = MixFftKernel::new(&device, vec![0.0, 500.0], 2.046e6);
        assert!(matches!(
            mix.enqueue(&mut queue, &input, &mut mixed),
            Err(ComputeError::SizeMismatch { .. })
        ));
    }
}
