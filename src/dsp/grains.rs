use crate::dsp::Sample;

/*
Grain Onset Extraction
======================

Locates the analysis-grain start positions for pitch-synchronous overlap-add.
Grains are 2 periods long and must be CENTERED on a point of synchronicity
(one energy peak per pitch period), so each emitted onset is `peak - period`.

After the peak-synchronized onsets are placed, the leading and trailing
edges of the block are back/forward-filled in period steps so every region
of the input is covered by a grain. The fills step monotonically past the
current extremes, so no emitted index can collide with an existing one and
the result stays strictly increasing.
*/

pub struct GrainOnsetExtractor {
    // Peak-picking scratch, sized once at construction.
    peaks: Vec<usize>,
}

impl GrainOnsetExtractor {
    pub fn with_capacity(max_block_size: usize) -> Self {
        Self {
            peaks: Vec::with_capacity(max_block_size),
        }
    }

    /// Pitched path: one onset per pitch period, synchronized to the local
    /// absolute-value peak of each `period`-sized window.
    ///
    /// The result is strictly increasing and never empty; an input too short
    /// to hold any full grain degrades to a single onset at 0 so the caller's
    /// render step stays well-defined for the block.
    pub fn extract<T: Sample>(&mut self, input: &[T], period: usize, onsets: &mut Vec<usize>) {
        onsets.clear();
        self.peaks.clear();

        let len = input.len();
        debug_assert!(period > 0);
        debug_assert!(len > 0);

        // One candidate peak per period-sized window; restricting to one per
        // window is what prevents duplicate detections within a period.
        let mut window_start = 0;
        while window_start < len {
            let window_end = (window_start + period).min(len);

            let mut best = window_start;
            let mut best_value = input[window_start].abs();
            for i in window_start + 1..window_end {
                let value = input[i].abs();
                if value > best_value {
                    best_value = value;
                    best = i;
                }
            }
            self.peaks.push(best);

            window_start = window_end;
        }

        // Center a 2-period grain on each peak; peaks too close to the block
        // start to fit the leading period are dropped here and recovered by
        // the backward fill below.
        for &peak in &self.peaks {
            if peak >= period {
                onsets.push(peak - period);
            }
        }

        if onsets.is_empty() {
            onsets.push(0);
            return;
        }

        // Fill in hypothetical missed grains at the start of the block.
        let mut first = onsets[0];
        while first >= period {
            first -= period;
            onsets.insert(0, first);
        }

        // ...and at the end.
        let mut last = onsets[onsets.len() - 1];
        while last + period < len {
            last += period;
            onsets.push(last);
        }
    }

    /// Unpitched path: a fixed, non-synchronized cadence at `grain_rate`.
    /// The caller jitters `grain_rate` between blocks to keep the imposed
    /// periodicity from becoming audible.
    pub fn extract_unpitched(len: usize, grain_rate: usize, onsets: &mut Vec<usize>) {
        debug_assert!(grain_rate > 0);

        onsets.clear();

        let mut i = 0;
        while i < len {
            onsets.push(i);
            i += grain_rate;
        }
    }
}
