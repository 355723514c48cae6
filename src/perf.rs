use chrono::Utc;

use crate::acquisition::AcquisitionEngine;

/// CSV-style sampler for the engine's lock-free counters. Call `sample`
/// from any slow-path thread; the engine side is atomics only.
pub struct PerfLog {
    last_cycles: u64,
    last_dropped: u64,
}

impl Default for PerfLog {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfLog {
    pub fn new() -> Self {
        Self {
            last_cycles: 0,
            last_dropped: 0,
        }
    }

    pub fn header() -> &'static str {
        "timestamp,cycles,cycles_delta,samples_dropped,dropped_delta"
    }

    pub fn sample(&mut self, engine: &AcquisitionEngine) -> String {
        let cycles = engine.cycles_completed();
        let dropped = engine.samples_dropped();
        let line = format!(
            "{},{},{},{},{}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            cycles,
            cycles - self.last_cycles,
            dropped,
            dropped - self.last_dropped,
        );
        self.last_cycles = cycles;
        self.last_dropped = dropped;
        line
    }

    pub fn log_sample(&mut self, engine: &AcquisitionEngine) {
        log::info!(target: "perf", "{}", self.sample(engine));
    }
}
