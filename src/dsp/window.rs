use crate::dsp::Sample;

/// Fill `buffer[..size]` with a Hann window and zero the remainder.
///
/// The window spans one analysis grain (2 pitch periods). At 50% overlap —
/// grains spaced one period apart — overlapping Hann windows sum to unity,
/// which is what lets the overlap-add resynthesis reconstruct the input
/// when no pitch shift is requested.
pub fn fill_hann<T: Sample>(buffer: &mut [T], size: usize) {
    debug_assert!(size > 1);
    debug_assert!(size <= buffer.len());

    for sample in buffer.iter_mut() {
        *sample = T::zero();
    }

    let step = std::f64::consts::TAU / (size - 1) as f64;
    for (i, sample) in buffer.iter_mut().enumerate().take(size) {
        *sample = T::coerce(0.5 * (1.0 - (i as f64 * step).cos()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_symmetric_and_zero_ended() {
        let mut buffer = vec![0.0f64; 256];
        fill_hann(&mut buffer, 256);

        assert!(buffer[0].abs() < 1e-12);
        assert!(buffer[255].abs() < 1e-12);
        assert!((buffer[127] - buffer[128]).abs() < 1e-3);
        assert!(buffer[128] > 0.99);
    }

    #[test]
    fn overlapped_halves_sum_to_unity() {
        // COLA property at 50% overlap: w[i] + w[i + size/2] ≈ 1.
        let size = 400;
        let mut buffer = vec![0.0f64; size];
        fill_hann(&mut buffer, size);

        for i in 0..size / 2 {
            let sum = buffer[i] + buffer[i + size / 2];
            assert!((sum - 1.0).abs() < 0.01, "COLA violated at {i}: {sum}");
        }
    }

    #[test]
    fn tail_beyond_size_is_cleared() {
        let mut buffer = vec![1.0f32; 64];
        fill_hann(&mut buffer, 32);
        assert!(buffer[32..].iter().all(|&s| s == 0.0));
    }
}
