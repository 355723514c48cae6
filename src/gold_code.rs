use once_cell::sync::Lazy;

use crate::constants::NUM_GPS_SATS;
use crate::constants::PRN_CODE_LEN;
use crate::types::AcquisitionError;

const G1_TAP: [usize; 2] = [2, 9];
const G2_TAP: [usize; 6] = [1, 2, 5, 7, 8, 9];

// G2 output phase taps per PRN, from ICD-GPS-200 Table 3-I. Not derivable,
// must match the published assignment exactly.
const PRN_TO_G2_TAP: [(usize, usize); NUM_GPS_SATS] = [
    (2, 6),
    (3, 7),
    (4, 8),
    (5, 9),
    (1, 9),
    (2, 10),
    (1, 8),
    (2, 9),
    (3, 10),
    (2, 3),
    (3, 4),
    (5, 6),
    (6, 7),
    (7, 8),
    (8, 9),
    (9, 10),
    (1, 4),
    (2, 5),
    (3, 6),
    (4, 7),
    (5, 8),
    (6, 9),
    (1, 3),
    (4, 6),
    (5, 7),
    (6, 8),
    (7, 9),
    (8, 10),
    (1, 6),
    (2, 7),
    (3, 8),
    (4, 9),
];

static CHIP_CACHE: Lazy<Vec<Vec<i8>>> =
    Lazy::new(|| (1..=NUM_GPS_SATS as u8).map(gen_chips).collect());

/// C/A ranging code for `prn`, 1023 bipolar chips. Pure function of the PRN,
/// served from a process-wide cache.
pub fn gen_code(prn: u8) -> Result<&'static [i8], AcquisitionError> {
    if prn == 0 || prn as usize > NUM_GPS_SATS {
        return Err(AcquisitionError::InvalidPrn(prn));
    }
    Ok(&CHIP_CACHE[prn as usize - 1])
}

fn gen_chips(prn: u8) -> Vec<i8> {
    let mut g1 = [1u8; 10];
    let mut g2 = [1u8; 10];
    let mut g = Vec::with_capacity(PRN_CODE_LEN);

    let taps = PRN_TO_G2_TAP[prn as usize - 1];
    for _ in 0..PRN_CODE_LEN {
        let v = (g1[9] + g2[taps.0 - 1] + g2[taps.1 - 1]) % 2;
        g.push(if v == 0 { -1i8 } else { 1i8 });

        let v = G1_TAP.iter().map(|&x| g1[x]).sum::<u8>() % 2;
        g1[9] = v;
        g1.rotate_right(1);

        let v = G2_TAP.iter().map(|&x| g2[x]).sum::<u8>() % 2;
        g2[9] = v;
        g2.rotate_right(1);
    }
    g
}
