use rustfft::num_complex::Complex64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Nearest-neighbor rate conversion from the producer's rate down to the
/// receiver's intermediate rate. Phase state must be reset after any gap in
/// the input stream.
pub struct RateConverter {
    input_rate: f64,
    target_rate: f64,
    phase: f64,
}

impl RateConverter {
    pub fn new(input_rate: f64, target_rate: f64) -> Self {
        Self {
            input_rate,
            target_rate,
            phase: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Input samples consumed per output sample.
    fn step(&self) -> f64 {
        self.input_rate / self.target_rate
    }

    fn is_passthrough(&self) -> bool {
        self.input_rate == self.target_rate
    }
}

struct SampleBlock {
    buf: Vec<Complex64>,
    len: usize,
    // a filled block the worker has not drained yet; appends are dropped
    // while this is set
    full: bool,
    converter: RateConverter,
}

/// Fixed-capacity complex sample accumulator between the real-time producer
/// callback and the acquisition worker. The producer never blocks: if the
/// worker still owns the block, the chunk is dropped and counted.
pub struct SampleIntake {
    block: Mutex<SampleBlock>,
    full_signal: Condvar,
    samples_dropped: AtomicU64,
    pending_reset: AtomicBool,
}

impl SampleIntake {
    pub fn new(capacity: usize, sample_rate: f64) -> Self {
        Self {
            block: Mutex::new(SampleBlock {
                buf: vec![Complex64::default(); capacity],
                len: 0,
                full: false,
                converter: RateConverter::new(sample_rate, sample_rate),
            }),
            full_signal: Condvar::new(),
            samples_dropped: AtomicU64::new(0),
            pending_reset: AtomicBool::new(false),
        }
    }

    /// Append a producer chunk, returning how many input samples were
    /// consumed. Never blocks: contention or a still-undrained block drops
    /// the whole chunk.
    pub fn append(&self, samples: &[Complex64]) -> usize {
        let Ok(mut block) = self.block.try_lock() else {
            return self.drop_chunk(samples.len());
        };
        if block.full {
            return self.drop_chunk(samples.len());
        }

        if self.pending_reset.swap(false, Ordering::Relaxed) {
            block.converter.reset();
        }

        let consumed = if block.converter.is_passthrough() {
            let room = block.buf.len() - block.len;
            let n = usize::min(room, samples.len());
            let len = block.len;
            block.buf[len..len + n].copy_from_slice(&samples[..n]);
            block.len += n;
            n
        } else {
            let step = block.converter.step();
            let mut consumed = 0;
            while block.len < block.buf.len() {
                let src = block.converter.phase as usize;
                if src >= samples.len() {
                    // chunk fully consumed, rebase the phase for the next one
                    block.converter.phase -= samples.len() as f64;
                    consumed = samples.len();
                    break;
                }
                let len = block.len;
                block.buf[len] = samples[src];
                block.len += 1;
                block.converter.phase += step;
                consumed = src + 1;
            }
            consumed
        };

        if block.len == block.buf.len() {
            block.full = true;
            // conversion restarts at the hand-off boundary
            self.pending_reset.store(true, Ordering::Relaxed);
            self.full_signal.notify_one();
        }
        if consumed < samples.len() {
            // the tail of this chunk is lost to the producer
            self.pending_reset.store(true, Ordering::Relaxed);
        }
        consumed
    }

    fn drop_chunk(&self, n: usize) -> usize {
        self.samples_dropped.fetch_add(n as u64, Ordering::Relaxed);
        self.pending_reset.store(true, Ordering::Relaxed);
        0
    }

    /// Worker side: wait for a full block, drain it into `out` and re-arm.
    /// Returns false on timeout with no full block available.
    pub fn wait_full(&self, timeout: Duration, out: &mut Vec<Complex64>) -> bool {
        let mut block = self.block.lock().unwrap();
        if !block.full {
            let (guard, res) = self
                .full_signal
                .wait_timeout_while(block, timeout, |b| !b.full)
                .unwrap();
            block = guard;
            if res.timed_out() && !block.full {
                return false;
            }
        }
        out.clear();
        out.extend_from_slice(&block.buf[..block.len]);
        block.len = 0;
        block.full = false;
        true
    }

    /// Reconfigure the producer-side rate conversion. No-op if the rate
    /// already matches.
    pub fn set_sample_rate(&self, input_rate: f64) {
        let mut block = self.block.lock().unwrap();
        if block.converter.input_rate == input_rate {
            return;
        }
        let target = block.converter.target_rate;
        log::info!("intake: input rate {} -> target {}", input_rate, target);
        block.converter = RateConverter::new(input_rate, target);
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.block.lock().unwrap().buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: usize, tag: f64) -> Vec<Complex64> {
        (0..n).map(|i| Complex64::new(tag, i as f64)).collect()
    }

    #[test]
    fn append_fills_then_drops_until_drained() {
        let intake = SampleIntake::new(8, 1.0e6);
        assert_eq!(intake.append(&chunk(5, 1.0)), 5);
        assert_eq!(intake.append(&chunk(5, 2.0)), 3); // fills the block

        // full block in flight: everything drops and is counted
        for i in 0..4 {
            assert_eq!(intake.append(&chunk(6, 3.0)), 0);
            assert_eq!(intake.samples_dropped(), (i + 1) * 6);
        }

        let mut out = vec![];
        assert!(intake.wait_full(Duration::from_millis(10), &mut out));
        assert_eq!(out.len(), 8);
        assert_eq!(out[0], Complex64::new(1.0, 0.0));
        assert_eq!(out[5], Complex64::new(2.0, 0.0));

        // drained: appends succeed again, drop counter stays put
        assert_eq!(intake.append(&chunk(4, 4.0)), 4);
        assert_eq!(intake.samples_dropped(), 24);
    }

    #[test]
    fn wait_full_times_out_when_not_full() {
        let intake = SampleIntake::new(8, 1.0e6);
        intake.append(&chunk(3, 1.0));
        let mut out = vec![];
        assert!(!intake.wait_full(Duration::from_millis(5), &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn rate_conversion_decimates() {
        // 2 MHz in, 1 MHz target: every other sample kept
        let intake = SampleIntake::new(4, 1.0e6);
        intake.set_sample_rate(2.0e6);
        // fills on input sample 6, so 7 of 8 are consumed
        assert_eq!(intake.append(&chunk(8, 1.0)), 7);
        let mut out = vec![];
        assert!(intake.wait_full(Duration::from_millis(10), &mut out));
        assert_eq!(out.len(), 4);
        for (i, v) in out.iter().enumerate() {
            assert_eq!(v.im, (2 * i) as f64);
        }
    }

    #[test]
    fn set_sample_rate_same_value_is_noop() {
        let intake = SampleIntake::new(8, 1.0e6);
        intake.append(&chunk(2, 1.0));
        intake.set_sample_rate(1.0e6);
        // still passthrough, previous fill untouched
        assert_eq!(intake.append(&chunk(6, 2.0)), 6);
        let mut out = vec![];
        assert!(intake.wait_full(Duration::from_millis(10), &mut out));
        assert_eq!(out[0].re, 1.0);
    }
}
