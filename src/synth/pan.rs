use crate::synth::tuning::CENTER_PAN;

/*
Pan Assignment
==============

Maintains the table of MIDI pan positions (0–127) for the current stereo
width and hands them out center-out: the first voice to sound sits in the
middle of the image, and the sides fill in as more voices stack up.

For width w (0.0–1.0) the table spans [63.5·(1-w), 63.5·(1+w)] with one
evenly spaced slot per voice, stored directly in assigning order:
middle slot first, then alternating outward (+1, −1, +2, −2, …).
*/

pub struct PanAssigner {
    // Pan values in assigning order, with a parallel in-use mask.
    positions: Vec<u8>,
    in_use: Vec<bool>,
    // Ascending-order scratch for rebuilds, sized once. Width changes can
    // arrive over the control queue mid-callback, so rebuilding must not
    // allocate.
    spaced: Vec<u8>,
    width: u8,
}

impl PanAssigner {
    pub fn new(voice_count: usize, stereo_width: u8) -> Self {
        let mut assigner = Self {
            positions: vec![CENTER_PAN; voice_count],
            in_use: vec![false; voice_count],
            spaced: vec![CENTER_PAN; voice_count],
            width: stereo_width.min(100),
        };
        assigner.rebuild();
        assigner
    }

    pub fn stereo_width(&self) -> u8 {
        self.width
    }

    /// Returns false (and does nothing) when the width is unchanged.
    pub fn set_stereo_width(&mut self, width: u8) -> bool {
        let width = width.min(100);
        if width == self.width {
            return false;
        }
        self.width = width;
        self.rebuild();
        true
    }

    fn rebuild(&mut self) {
        let count = self.positions.len();
        if count == 0 {
            return;
        }

        let range = 63.5 * self.width as f64 / 100.0;
        let min_pan = 63.5 - range;
        let increment = 2.0 * range / count as f64;

        // Evenly spaced values, ascending.
        for i in 0..count {
            self.spaced[i] = (min_pan + increment * i as f64 + increment / 2.0).round() as u8;
        }

        // Reorder center-out into assigning order.
        let middle = count / 2;
        let mut write = 0;
        let mut step = 1usize;
        self.positions[write] = self.spaced[middle];
        write += 1;
        while write < count {
            if middle + step < count {
                self.positions[write] = self.spaced[middle + step];
                write += 1;
            }
            if write < count && step <= middle {
                self.positions[write] = self.spaced[middle - step];
                write += 1;
            }
            step += 1;
        }

        for used in self.in_use.iter_mut() {
            *used = false;
        }
    }

    /// Claim the next unused position in assigning order. When every slot is
    /// taken the center is returned (and not tracked).
    pub fn next_pan(&mut self) -> u8 {
        for (i, used) in self.in_use.iter_mut().enumerate() {
            if !*used {
                *used = true;
                return self.positions[i];
            }
        }
        CENTER_PAN
    }

    /// Return a position to the pool. `pan` is matched to the closest slot
    /// currently in use, so a voice re-centered by a width change can still
    /// hand its old value back.
    pub fn pan_turned_off(&mut self, pan: u8) {
        let mut best: Option<(usize, u8)> = None;
        for (i, &used) in self.in_use.iter().enumerate() {
            if !used {
                continue;
            }
            let distance = self.positions[i].abs_diff(pan);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }
        if let Some((i, _)) = best {
            self.in_use[i] = false;
        }
    }

    /// Claim the unused position closest to `old`. Used when the stereo
    /// width changes under sounding voices, keeping each of them near its
    /// previous spot in the image.
    pub fn closest_unused(&mut self, old: u8) -> u8 {
        let mut best: Option<(usize, u8)> = None;
        for (i, &used) in self.in_use.iter().enumerate() {
            if used {
                continue;
            }
            let distance = self.positions[i].abs_diff(old);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }
        match best {
            Some((i, _)) => {
                self.in_use[i] = true;
                self.positions[i]
            }
            None => CENTER_PAN,
        }
    }

    /// Release every slot.
    pub fn reset(&mut self) {
        for used in self.in_use.iter_mut() {
            *used = false;
        }
    }
}
