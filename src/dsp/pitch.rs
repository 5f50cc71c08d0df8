use crate::dsp::Sample;

/*
Periodicity Estimation (ASDF)
=============================

Estimates the fundamental period of a block of audio with the Average
Squared Difference Function:

    ASDF(k) = mean over n of (x[n] - x[n + k])²

For a periodic signal the difference collapses near the true period. The
candidate is the FIRST lag whose ASDF dips below the confidence threshold,
walked forward to its local minimum — not the global minimum, which for a
clean tone often lands on 2x the period (the octave below) because twice the
period cancels marginally better. Two refinements on top:

  confidence   If no lag gets below the threshold the frame is noise and is
               reported as unpitched. The threshold is an absolute level on
               the normalized ASDF and is deliberately configurable — it is
               exactly the knob that moves the pitched/unpitched
               classification boundary.

  sub-sample   A 3-point quadratic fit around the minimum recovers the
               fractional period, which matters audibly: at 44.1kHz a
               220 Hz tone has a period of 200.45 samples, and rounding to
               200 would detune the analysis by almost 4 cents.

The lag search range is derived from a Hz range and the sample rate. The
derivation (and the ASDF scratch buffer it sizes) runs only when the range
or rate actually changes — never per block.
*/

pub const DEFAULT_MIN_HZ: f64 = 40.0;
pub const DEFAULT_MAX_HZ: f64 = 2_000.0;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.01;

pub struct PeriodicityEstimator<T: Sample> {
    min_hz: f64,
    max_hz: f64,
    sample_rate: f64,

    min_period: usize,
    max_period: usize,

    confidence_threshold: T,

    // One slot per lag in [min_period, max_period]; index 0 holds the ASDF
    // for lag min_period. Sized in recalculate_lag_range, cleared nowhere —
    // every detect() overwrites the span it reads.
    asdf: Vec<T>,
}

impl<T: Sample> PeriodicityEstimator<T> {
    pub fn new(min_hz: f64, max_hz: f64, sample_rate: f64) -> Self {
        debug_assert!(max_hz > min_hz && min_hz > 0.0);
        debug_assert!(sample_rate > 0.0);

        let mut estimator = Self {
            min_hz,
            max_hz,
            sample_rate,
            min_period: 0,
            max_period: 0,
            confidence_threshold: T::coerce(DEFAULT_CONFIDENCE_THRESHOLD),
            asdf: Vec::new(),
        };
        estimator.recalculate_lag_range();
        estimator
    }

    /// NOT realtime-safe: may resize the ASDF scratch buffer.
    pub fn set_hz_range(&mut self, min_hz: f64, max_hz: f64) {
        debug_assert!(max_hz > min_hz && min_hz > 0.0);

        if self.min_hz == min_hz && self.max_hz == max_hz {
            return;
        }

        self.min_hz = min_hz;
        self.max_hz = max_hz;
        self.recalculate_lag_range();
    }

    /// NOT realtime-safe: may resize the ASDF scratch buffer.
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        debug_assert!(sample_rate > 0.0);

        if self.sample_rate == sample_rate {
            return;
        }

        self.sample_rate = sample_rate;
        self.recalculate_lag_range();
    }

    pub fn set_confidence_threshold(&mut self, threshold: f64) {
        self.confidence_threshold = T::coerce(threshold);
    }

    pub fn min_period(&self) -> usize {
        self.min_period
    }

    pub fn max_period(&self) -> usize {
        self.max_period
    }

    fn recalculate_lag_range(&mut self) {
        self.min_period = (self.sample_rate / self.max_hz).round() as usize;
        self.max_period = (self.sample_rate / self.min_hz).round() as usize;

        if self.max_period <= self.min_period {
            self.max_period = self.min_period + 1;
        }

        let lag_count = self.max_period - self.min_period + 1;
        self.asdf.resize(lag_count, T::zero());
    }

    /// Returns the detected fundamental frequency in Hz, or `None` when the
    /// frame is unpitched (low periodicity confidence or too short to hold
    /// a full period).
    pub fn detect(&mut self, input: &[T]) -> Option<f64> {
        let num_samples = input.len();

        if num_samples <= self.min_period {
            return None;
        }

        // A (near-)silent block has a flat zero ASDF that would pass the
        // confidence gate; treat it as unpitched outright.
        let mut power = T::zero();
        for &sample in input {
            power += sample * sample;
        }
        if power.to_f64() / num_samples as f64 <= 1e-10 {
            return None;
        }

        // Lags that don't fit in this block are excluded from the search.
        let max_lag = self.max_period.min(num_samples - 1);
        let lag_count = max_lag - self.min_period + 1;

        for k in self.min_period..=max_lag {
            let pairs = num_samples - k;
            let mut sum = T::zero();

            for n in 0..pairs {
                let diff = input[n] - input[n + k];
                sum += diff * diff;
            }

            self.asdf[k - self.min_period] = sum * T::coerce(1.0 / pairs as f64);
        }

        let asdf = &self.asdf[..lag_count];

        let first_below = asdf
            .iter()
            .position(|&value| value <= self.confidence_threshold);

        let mut min_index = match first_below {
            Some(index) => index,
            None => return None,
        };

        // Descend to the local minimum of the dip we landed in.
        while min_index + 1 < lag_count && asdf[min_index + 1] < asdf[min_index] {
            min_index += 1;
        }

        let refined = quadratic_minimum(asdf, min_index);
        let period = refined + self.min_period as f64;

        Some(self.sample_rate / period)
    }
}

/// 3-point quadratic fit around `pos`. At either edge of the data the fit is
/// rejected and the integer position returned unmodified.
fn quadratic_minimum<T: Sample>(data: &[T], pos: usize) -> f64 {
    if pos == 0 || pos + 1 >= data.len() {
        return pos as f64;
    }

    let s1 = data[pos];
    if s1 == T::zero() {
        return pos as f64;
    }

    let s0 = data[pos - 1].to_f64();
    let s2 = data[pos + 1].to_f64();
    let s1 = s1.to_f64();

    let denom = s0 - 2.0 * s1 + s2;
    if denom == 0.0 {
        return pos as f64;
    }

    pos as f64 + 0.5 * (s0 - s2) / denom
}
