use colored::Colorize;
use rustfft::num_complex::Complex64;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::code_table::CodeTable;
use crate::compute::CommandQueue;
use crate::compute::ComputeDevice;
use crate::compute::DeviceBuffer;
use crate::compute::MatchedFilterKernel;
use crate::compute::MixFftKernel;
use crate::constants::PRN_CODE_LEN;
use crate::intake::SampleIntake;
use crate::types::AcquisitionConfig;
use crate::types::AcquisitionError;
use crate::types::CorrelationView;
use crate::types::PeakStatistics;
use crate::util::mean;

const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Per-code, per-cycle result delivery. Called synchronously on the worker
/// thread; implementations must not block for long.
pub trait ResultSink: Send {
    fn on_acquisition_result(&mut self, corr: &CorrelationView, stats: &PeakStatistics);
}

impl<F> ResultSink for F
where
    F: FnMut(&CorrelationView, &PeakStatistics) + Send,
{
    fn on_acquisition_result(&mut self, corr: &CorrelationView, stats: &PeakStatistics) {
        self(corr, stats)
    }
}

/// Code-phase delay in chips for the correlation argmax. The constants come
/// from the 1023-chip period and the fixed resampling ratio; keep as is.
fn code_phase_chips(block_size: usize, argmax: usize) -> f64 {
    if argmax == 0 {
        return 0.0;
    }
    (block_size as f64 / argmax as f64 - 0.5) * (PRN_CODE_LEN as f64 - 0.5)
}

/// GNSS acquisition engine: owns the intake buffer and the worker thread
/// that searches each active code over the Doppler/code-phase grid on the
/// injected compute device.
pub struct AcquisitionEngine {
    config: AcquisitionConfig,
    intake: Arc<SampleIntake>,
    cycles_completed: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AcquisitionEngine {
    /// Build the engine and start its worker. The code table is built on the
    /// worker thread before its first cycle; a failure there (or a bad
    /// config) is fatal and reported here, with no worker left running.
    pub fn start<S: ResultSink + 'static>(
        config: AcquisitionConfig,
        device: ComputeDevice,
        sink: S,
    ) -> Result<Self, AcquisitionError> {
        config.validate()?;
        if device.block_size() != config.block_size {
            return Err(AcquisitionError::InvalidConfig(format!(
                "device block size {} != configured {}",
                device.block_size(),
                config.block_size
            )));
        }

        let intake = Arc::new(SampleIntake::new(config.block_size, config.sample_rate));
        let cycles_completed = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AcquisitionError>>();
        let worker_config = config.clone();
        let worker_intake = intake.clone();
        let worker_cycles = cycles_completed.clone();
        let worker_shutdown = shutdown.clone();

        let handle = thread::Builder::new()
            .name("acq-worker".into())
            .spawn(move || {
                match Worker::setup(
                    worker_config,
                    device,
                    worker_intake,
                    sink,
                    worker_cycles,
                    worker_shutdown,
                ) {
                    Ok(mut worker) => {
                        let _ = ready_tx.send(Ok(()));
                        worker.run();
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|e| AcquisitionError::WorkerStart(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                config,
                intake,
                cycles_completed,
                shutdown,
                worker: Some(handle),
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AcquisitionError::WorkerStart(
                    "worker exited before signaling readiness".into(),
                ))
            }
        }
    }

    /// Real-time ingest path; see [`SampleIntake::append`]. Never blocks.
    pub fn append(&self, samples: &[Complex64]) -> usize {
        self.intake.append(samples)
    }

    pub fn set_sample_rate(&self, rate: f64) {
        self.intake.set_sample_rate(rate);
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn doppler_search_range_hz(&self) -> (f64, f64) {
        self.config.doppler_search_range_hz()
    }

    pub fn samples_dropped(&self) -> u64 {
        self.intake.samples_dropped()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }
}

impl Drop for AcquisitionEngine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.take() {
            // observed between cycles; bounded by one cycle + the idle wait
            let _ = handle.join();
        }
    }
}

struct Worker<S: ResultSink> {
    config: AcquisitionConfig,
    intake: Arc<SampleIntake>,
    sink: S,
    active: Vec<u8>,
    queue: CommandQueue,
    mix: MixFftKernel,
    matched_filter: MatchedFilterKernel,
    input_buf: DeviceBuffer<Complex64>,
    code_buf: DeviceBuffer<Complex64>,
    mixed: DeviceBuffer<Complex64>,
    corr_mag: DeviceBuffer<f64>,
    peak_val: DeviceBuffer<f64>,
    peak_pos: DeviceBuffer<u32>,
    mean_val: DeviceBuffer<f64>,
    staging: Vec<Complex64>,
    cycles_completed: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl<S: ResultSink> Worker<S> {
    fn setup(
        config: AcquisitionConfig,
        device: ComputeDevice,
        intake: Arc<SampleIntake>,
        sink: S,
        cycles_completed: Arc<AtomicU64>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, AcquisitionError> {
        let table = CodeTable::build(&config)?;
        let active = config.active_prns();
        let block = config.block_size;
        let bins = config.num_doppler_bins;

        let queue = CommandQueue::new();
        let mut code_buf = DeviceBuffer::<Complex64>::new("code_table", active.len() * block);
        {
            let mut mapped = code_buf.map(&queue)?;
            for (idx, prn) in active.iter().enumerate() {
                let code = table.get(*prn).ok_or(AcquisitionError::InvalidPrn(*prn))?;
                mapped[idx * block..(idx + 1) * block].copy_from_slice(&code.spectrum);
            }
        }

        let doppler_bins_hz: Vec<f64> = (0..bins).map(|i| config.doppler_bin_hz(i)).collect();
        let mix = MixFftKernel::new(&device, doppler_bins_hz, config.sample_rate);
        let matched_filter = MatchedFilterKernel::new(&device);

        log::info!(
            "acquisition: {} codes, {} doppler bins over {:?} Hz, block={}",
            active.len(),
            bins,
            config.doppler_search_range_hz(),
            block
        );

        Ok(Self {
            config,
            intake,
            sink,
            active,
            queue,
            mix,
            matched_filter,
            input_buf: DeviceBuffer::new("input", block),
            code_buf,
            mixed: DeviceBuffer::new("mixed", bins * block),
            corr_mag: DeviceBuffer::new("corr_mag", bins * block),
            peak_val: DeviceBuffer::new("peak_val", bins),
            peak_pos: DeviceBuffer::new("peak_pos", bins),
            mean_val: DeviceBuffer::new("mean_val", bins),
            staging: Vec::with_capacity(block),
            cycles_completed,
            shutdown,
        })
    }

    fn run(&mut self) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            if !self.intake.wait_full(IDLE_WAIT, &mut self.staging) {
                continue;
            }
            match self.run_cycle() {
                Ok(()) => {
                    self.cycles_completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => log::warn!("acquisition: cycle aborted: {}", err),
            }
        }
        // let the queue drain before device resources go away
        let _ = self.queue.finish();
        log::info!(
            "acquisition: worker exiting after {} cycles, {} samples dropped",
            self.cycles_completed.load(Ordering::Relaxed),
            self.intake.samples_dropped()
        );
    }

    /// One full acquisition cycle over the freshly drained block. An error
    /// in the shared mixing stage aborts the cycle; per-code errors are
    /// logged and that code is skipped.
    fn run_cycle(&mut self) -> Result<(), AcquisitionError> {
        {
            let mut input = self.input_buf.map(&self.queue)?;
            input.copy_from_slice(&self.staging);
        }
        self.mix
            .enqueue(&mut self.queue, &self.input_buf, &mut self.mixed)?;
        self.queue.finish()?;

        for idx in 0..self.active.len() {
            let prn = self.active[idx];
            self.matched_filter
                .bind_code_offset(idx * self.config.block_size);
            if let Err(err) = self.correlate_one(prn) {
                log::warn!(
                    "acquisition: {} skipped this cycle: {}",
                    format!("prn-{:02}", prn).yellow(),
                    err
                );
            }
        }
        Ok(())
    }

    fn correlate_one(&mut self, prn: u8) -> Result<(), AcquisitionError> {
        self.matched_filter.enqueue(
            &mut self.queue,
            &self.code_buf,
            &self.mixed,
            &mut self.corr_mag,
            &mut self.peak_val,
            &mut self.peak_pos,
            &mut self.mean_val,
        )?;
        self.queue.finish()?;

        let corr = self.corr_mag.map(&self.queue)?;
        let peak_val = self.peak_val.map(&self.queue)?;
        let peak_pos = self.peak_pos.map(&self.queue)?;
        let mean_val = self.mean_val.map(&self.queue)?;

        let mut best_bin = 0;
        for bin in 1..peak_val.len() {
            if peak_val[bin] > peak_val[best_bin] {
                best_bin = bin;
            }
        }
        let argmax = peak_pos[best_bin] as usize;
        let stats = PeakStatistics {
            prn,
            peak: peak_val[best_bin],
            mean: mean(&mean_val),
            doppler_hz: self.config.doppler_bin_hz(best_bin),
            doppler_bin: best_bin,
            code_phase_bin: argmax,
            code_phase_chips: code_phase_chips(self.config.block_size, argmax),
        };
        log::debug!(
            "acquisition: prn={:2} peak={:.1} mean={:.1} doppler={:5.0}Hz phase_bin={}",
            stats.prn,
            stats.peak,
            stats.mean,
            stats.doppler_hz,
            stats.code_phase_bin
        );

        let view = CorrelationView::new(&corr, self.config.block_size);
        self.sink.on_acquisition_result(&view, &stats);
        Ok(())
    }
}
