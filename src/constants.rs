pub const PRN_CODE_LEN: usize = 1023;
pub const NUM_GPS_SATS: usize = 32;

pub const CHIP_RATE_HZ: f64 = 1.023e6;
pub const L1CA_HZ: f64 = 1575.42e6;

pub const DEFAULT_SAMPLE_RATE: f64 = 16.368e6;
pub const DEFAULT_BLOCK_SIZE: usize = 16384;
pub const DEFAULT_DOPPLER_BINS: usize = 28;
pub const DEFAULT_DOPPLER_SPACING_HZ: f64 = 500.0;
