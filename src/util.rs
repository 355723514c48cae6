use rustfft::num_complex::Complex64;

const PI: f64 = std::f64::consts::PI;

pub fn get_max_with_idx(v: &[f64]) -> (usize, f64) {
    let mut max = 0.0f64;
    let mut idx = 0;
    for i in 0..v.len() {
        if v[i] > max {
            max = v[i];
            idx = i;
        }
    }
    (idx, max)
}

pub fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

/// Multiply a block in place by a complex exponential at `shift_hz`.
pub fn doppler_shift(shift_hz: f64, iq_vec: &mut [Complex64], sample_rate: f64) {
    for (i, v) in iq_vec.iter_mut().enumerate() {
        let phase = 2.0 * PI * shift_hz * i as f64 / sample_rate;
        *v *= Complex64::from_polar(1.0, phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_with_idx_finds_peak() {
        let v = vec![0.5, 3.0, 1.0, 2.5];
        assert_eq!(get_max_with_idx(&v), (1, 3.0));
        assert_eq!(get_max_with_idx(&[]), (0, 0.0));
    }

    #[test]
    fn mean_of_block() {
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn doppler_shift_preserves_magnitude() {
        let mut v = vec![Complex64::new(1.0, 0.0); 64];
        doppler_shift(1000.0, &mut v, 16.368e6);
        for x in &v {
            assert!((x.norm() - 1.0).abs() < 1e-12);
        }
        // first sample gets zero phase
        assert!((v[0] - Complex64::new(1.0, 0.0)).norm() < 1e-12);
    }
}
