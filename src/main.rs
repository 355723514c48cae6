use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use structopt::StructOpt;

use gnss_acq::acquisition::AcquisitionEngine;
use gnss_acq::code_table::CodeTable;
use gnss_acq::compute::ComputeDevice;
use gnss_acq::perf::PerfLog;
use gnss_acq::types::{AcquisitionConfig, CorrelationView, PeakStatistics};
use gnss_acq::util::doppler_shift;

#[derive(StructOpt, Debug)]
#[structopt(name = "gnss-acq", about = "GPS C/A acquisition engine demo")]
struct Options {
    #[structopt(long, default_value = "16384")]
    block_size: usize,
    #[structopt(long, default_value = "28")]
    doppler_bins: usize,
    #[structopt(long, default_value = "500")]
    doppler_spacing_hz: f64,
    #[structopt(long, default_value = "16368000")]
    sample_rate: f64,
    /// PRN synthesized into the test signal
    #[structopt(long, default_value = "7")]
    prn: u8,
    /// Doppler bin index the test signal is shifted to
    #[structopt(long, default_value = "19")]
    doppler_bin: usize,
    #[structopt(long, default_value = "4")]
    cycles: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let opt = Options::from_args();

    let config = AcquisitionConfig {
        block_size: opt.block_size,
        num_doppler_bins: opt.doppler_bins,
        doppler_spacing_hz: opt.doppler_spacing_hz,
        sample_rate: opt.sample_rate,
        excluded_prns: vec![],
    };
    let doppler_hz = config.doppler_bin_hz(opt.doppler_bin);
    println!(
        "synthesizing prn-{:02} at {:+.0} Hz, search range {:?} Hz",
        opt.prn,
        doppler_hz,
        config.doppler_search_range_hz()
    );

    let table = CodeTable::build(&config)?;
    let mut block = table
        .get(opt.prn)
        .ok_or("prn outside the active set")?
        .time_domain
        .clone();
    doppler_shift(doppler_hz, &mut block, config.sample_rate);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::Relaxed))?;

    let engine = AcquisitionEngine::start(
        config,
        ComputeDevice::new(opt.block_size),
        |_: &CorrelationView, stats: &PeakStatistics| {
            if stats.peak > 10.0 * stats.mean {
                println!(
                    "prn-{:02} {} doppler {:+5.0} Hz phase {:7.1} chips peak/mean {:.1}",
                    stats.prn,
                    "HIT ".green(),
                    stats.doppler_hz,
                    stats.code_phase_chips,
                    stats.peak / stats.mean
                );
            } else {
                log::debug!(
                    "prn-{:02} miss, peak/mean {:.2}",
                    stats.prn,
                    stats.peak / stats.mean
                );
            }
        },
    )?;

    let mut perf = PerfLog::new();
    println!("{}", PerfLog::header());
    while running.load(Ordering::Relaxed) && engine.cycles_completed() < opt.cycles {
        for chunk in block.chunks(2048) {
            engine.append(chunk);
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    println!("{}", perf.sample(&engine));
    Ok(())
}
