use crate::dsp::envelope::{AdsrParams, Envelope};
use crate::dsp::Sample;
use crate::synth::tuning::CENTER_PAN;

/*
Voice — synchronized overlap-add resynthesis
============================================

One voice renders one monophonic pitch-shifted copy of the input. The pool
computes the expensive per-block analysis ONCE (detected period, grain
onsets, Hann window) and every active voice consumes the same analysis at a
different output pitch.

The pitch shift itself is pure grain placement. Each analysis grain is two
input periods long and windowed so that grains overlapping at one-period
spacing sum back to the original signal. The voice replays each grain into
its synthesis buffer at OUTPUT-period spacing instead:

    spacing == analysis period   →  input pitch (identity)
    spacing  < analysis period   →  grains packed closer, pitch raised
    spacing  > analysis period   →  grains spread apart, pitch lowered

The grains' own spectral content never changes, which is what preserves the
vocal formants. The overlap factor stays pinned at two analysis periods, so
extreme shift ratios thin out or pile up the overlap — that is the intended
artifact ceiling, not something this code defends against.

The synthesis buffer is an accumulation frontier: `write_cursor` is the next
grain placement position. Once a block's worth of samples has accumulated at
the front it is enveloped, gain-staged, panned into the stereo output, and
the remaining tail is moved up to the front for the next block.
*/

/// Per-block shared analysis handed from the pool to every active voice.
pub(crate) struct BlockContext<'a, T: Sample> {
    pub input: &'a [T],
    pub analysis_period: usize,
    pub onsets: &'a [usize],
    pub window: &'a [T],
    pub adsr_enabled: bool,
    pub soft_pedal_gain: T,
    pub released_gain: T,
    pub aftertouch_enabled: bool,
}

/// What happened to the voice over the block just rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderOutcome {
    Sounding,
    /// The tail finished; the voice freed itself. Carries the pan position
    /// the pool should reclaim.
    Finished { pan: u8 },
}

pub struct Voice<T: Sample> {
    note: Option<u8>,
    note_on_seq: u64,
    key_down: bool,
    playing_but_released: bool,
    sustaining_from_sostenuto: bool,
    is_pedal_voice: bool,
    is_descant_voice: bool,

    velocity: f64,
    velocity_gain: T,
    aftertouch: u8,

    output_freq: f64,
    sample_rate: f64,

    pan: u8,
    prev_pan: u8,
    pan_left: T,
    pan_right: T,

    adsr: Envelope<T>,
    quick_attack: Envelope<T>,
    quick_release: Envelope<T>,
    quick_fading: bool,
    note_turned_off: bool,

    // Mono accumulation buffer. `write_cursor` is the next grain placement
    // index; contributions may extend one grain length past it.
    synthesis: Vec<T>,
    write_cursor: usize,
    // One pre-windowed grain, so windowing happens once per grain per block.
    windowed: Vec<T>,
}

impl<T: Sample> Voice<T> {
    pub(crate) fn new(
        max_block_size: usize,
        sample_rate: f64,
        adsr: AdsrParams,
        quick_attack: AdsrParams,
        quick_release: AdsrParams,
    ) -> Self {
        Self {
            note: None,
            note_on_seq: 0,
            key_down: false,
            playing_but_released: false,
            sustaining_from_sostenuto: false,
            is_pedal_voice: false,
            is_descant_voice: false,
            velocity: 0.0,
            velocity_gain: T::zero(),
            aftertouch: 0,
            output_freq: 0.0,
            sample_rate,
            pan: CENTER_PAN,
            prev_pan: CENTER_PAN,
            pan_left: T::coerce(0.5),
            pan_right: T::coerce(0.5),
            adsr: Envelope::new(adsr, sample_rate),
            quick_attack: Envelope::new(quick_attack, sample_rate),
            quick_release: Envelope::new(quick_release, sample_rate),
            quick_fading: false,
            note_turned_off: false,
            synthesis: vec![T::zero(); max_block_size * 4],
            write_cursor: 0,
            windowed: vec![T::zero(); max_block_size],
        }
    }

    // ------------------------------------------------------------------
    // state queries

    pub fn note(&self) -> Option<u8> {
        self.note
    }

    pub fn is_active(&self) -> bool {
        self.note.is_some()
    }

    pub fn is_key_down(&self) -> bool {
        self.key_down
    }

    /// Sounding, but the key that started it has been released.
    pub fn is_playing_but_released(&self) -> bool {
        self.playing_but_released
    }

    pub fn is_sustaining_from_sostenuto(&self) -> bool {
        self.sustaining_from_sostenuto
    }

    pub fn is_pedal_pitch_voice(&self) -> bool {
        self.is_pedal_voice
    }

    pub fn is_descant_voice(&self) -> bool {
        self.is_descant_voice
    }

    pub fn note_on_seq(&self) -> u64 {
        self.note_on_seq
    }

    pub fn pan(&self) -> u8 {
        self.pan
    }

    pub fn previous_pan(&self) -> u8 {
        self.prev_pan
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn output_freq(&self) -> f64 {
        self.output_freq
    }

    // ------------------------------------------------------------------
    // pool-driven mutations

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start_note(
        &mut self,
        note: u8,
        velocity: f64,
        velocity_gain: f64,
        output_freq: f64,
        seq: u64,
        key_down: bool,
        is_pedal: bool,
        is_descant: bool,
    ) {
        self.note = Some(note);
        self.note_on_seq = seq;
        self.velocity = velocity;
        self.velocity_gain = T::coerce(velocity_gain);
        self.output_freq = output_freq;
        self.key_down = key_down;
        self.playing_but_released = false;
        self.sustaining_from_sostenuto = false;
        self.is_pedal_voice = is_pedal;
        self.is_descant_voice = is_descant;
        self.aftertouch = 0;
        self.note_turned_off = false;
        self.quick_fading = false;

        self.adsr.trigger();
        self.quick_attack.trigger();
        self.quick_release.reset();
    }

    /// `allow_tail_off = false` forces the quick-release envelope instead of
    /// the primary release so a stolen or latched-off note dies without a
    /// discontinuity.
    pub(crate) fn stop_note(&mut self, allow_tail_off: bool) {
        if allow_tail_off {
            self.adsr.release();
            self.quick_attack.release();
        } else {
            self.quick_fading = true;
            self.quick_release.release_from(T::one());
        }
        self.note_turned_off = true;
        self.key_down = false;
        self.playing_but_released = true;
    }

    pub(crate) fn set_key_down(&mut self, down: bool) {
        self.key_down = down;
        self.playing_but_released = !down && self.is_active();
    }

    pub(crate) fn set_sustaining_from_sostenuto(&mut self, sustaining: bool) {
        self.sustaining_from_sostenuto = sustaining;
    }

    pub(crate) fn set_output_freq(&mut self, freq: f64) {
        debug_assert!(freq > 0.0);
        self.output_freq = freq;
    }

    pub(crate) fn set_velocity_gain(&mut self, gain: f64) {
        self.velocity_gain = T::coerce(gain);
    }

    pub(crate) fn set_pan(&mut self, pan: u8) {
        let pan = pan.min(127);
        if pan == self.pan {
            return;
        }
        self.prev_pan = self.pan;
        self.pan = pan;
        self.pan_right = T::coerce(pan as f64 / 127.0);
        self.pan_left = T::one() - self.pan_right;
    }

    pub(crate) fn aftertouch_changed(&mut self, pressure: u8) {
        self.aftertouch = pressure.min(127);
    }

    pub(crate) fn set_adsr_params(&mut self, params: AdsrParams) {
        self.adsr.set_params(params);
    }

    pub(crate) fn set_quick_attack_params(&mut self, params: AdsrParams) {
        self.quick_attack.set_params(params);
    }

    pub(crate) fn set_quick_release_params(&mut self, params: AdsrParams) {
        self.quick_release.set_params(params);
    }

    pub(crate) fn update_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.adsr.set_sample_rate(sample_rate);
        self.quick_attack.set_sample_rate(sample_rate);
        self.quick_release.set_sample_rate(sample_rate);
    }

    /// Reset to Idle and mark available for a new note.
    pub(crate) fn clear_note(&mut self) {
        self.note = None;
        self.key_down = false;
        self.playing_but_released = false;
        self.sustaining_from_sostenuto = false;
        self.is_pedal_voice = false;
        self.is_descant_voice = false;
        self.note_turned_off = false;
        self.quick_fading = false;
        self.aftertouch = 0;
        self.adsr.reset();
        self.quick_attack.reset();
        self.quick_release.reset();
        for sample in self.synthesis.iter_mut() {
            *sample = T::zero();
        }
        self.write_cursor = 0;
    }

    // ------------------------------------------------------------------
    // rendering

    pub(crate) fn render(
        &mut self,
        ctx: &BlockContext<'_, T>,
        left: &mut [T],
        right: &mut [T],
    ) -> RenderOutcome {
        debug_assert!(self.is_active());

        let still_sounding = if self.quick_fading {
            self.quick_release.is_active()
        } else if ctx.adsr_enabled {
            self.adsr.is_active()
        } else {
            self.quick_attack.is_active()
        };

        if !still_sounding {
            let pan = self.pan;
            self.clear_note();
            return RenderOutcome::Finished { pan };
        }

        let num_samples = ctx.input.len();
        debug_assert!(left.len() >= num_samples && right.len() >= num_samples);

        if self.output_freq > 0.0 {
            let output_period = ((self.sample_rate / self.output_freq).round() as usize).max(1);
            self.sola(ctx, output_period);
        }

        let pressure = T::coerce(self.aftertouch as f64 / 127.0);
        let amp = if ctx.aftertouch_enabled {
            // Pressure raises the voice from its velocity gain toward full
            // scale; zero pressure is neutral.
            self.velocity_gain + (T::one() - self.velocity_gain) * pressure
        } else {
            self.velocity_gain
        };
        let released_gain = if self.playing_but_released {
            ctx.released_gain
        } else {
            T::one()
        };

        for i in 0..num_samples {
            let mut env = if ctx.adsr_enabled {
                self.adsr.next()
            } else {
                self.quick_attack.next()
            };
            if self.quick_fading {
                env *= self.quick_release.next();
            }

            let sample = self.synthesis[i] * env * amp * ctx.soft_pedal_gain * released_gain;
            left[i] += sample * self.pan_left;
            right[i] += sample * self.pan_right;
        }

        self.move_up(num_samples);

        RenderOutcome::Sounding
    }

    /// Place every analysis grain that fits this block into the synthesis
    /// buffer at output-period spacing.
    fn sola(&mut self, ctx: &BlockContext<'_, T>, output_period: usize) {
        let num_samples = ctx.input.len();
        let grain_len = 2 * ctx.analysis_period;

        if grain_len == 0 || self.write_cursor > num_samples {
            return;
        }

        for &onset in ctx.onsets {
            let grain_end = onset + grain_len;
            if grain_end > num_samples {
                // Grains past the block boundary are picked up, re-windowed,
                // by the next block's onset set.
                break;
            }
            if self.write_cursor >= grain_end {
                continue;
            }

            debug_assert!(grain_len <= self.windowed.len());
            debug_assert!(grain_len <= ctx.window.len());
            for s in 0..grain_len {
                self.windowed[s] = ctx.input[onset + s] * ctx.window[s];
            }

            while self.write_cursor < grain_end {
                let base = self.write_cursor;
                if base + grain_len > self.synthesis.len() {
                    return; // frontier ran past the prepared budget
                }
                for s in 0..grain_len {
                    self.synthesis[base + s] += self.windowed[s];
                }
                self.write_cursor += output_period;
            }
        }
    }

    /// Shift the un-output tail of the synthesis buffer to the front and
    /// zero the vacated region.
    fn move_up(&mut self, used: usize) {
        let len = self.synthesis.len();
        let used = used.min(len);
        self.synthesis.copy_within(used.., 0);
        for sample in self.synthesis[len - used..].iter_mut() {
            *sample = T::zero();
        }
        self.write_cursor = self.write_cursor.saturating_sub(used);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::grains::GrainOnsetExtractor;
    use crate::dsp::window::fill_hann;

    const SAMPLE_RATE: f64 = 44_100.0;

    fn test_voice() -> Voice<f64> {
        Voice::new(
            2_048,
            SAMPLE_RATE,
            AdsrParams::default(),
            AdsrParams::new(0.015, 0.01, 1.0, 0.015),
            AdsrParams::new(0.01, 0.005, 1.0, 0.015),
        )
    }

    fn sine(freq: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|n| (2.0 * std::f64::consts::PI * freq * n as f64 / SAMPLE_RATE).sin())
            .collect()
    }

    #[test]
    fn identity_shift_reproduces_input_with_constant_delay() {
        let period = 200usize;
        let freq = SAMPLE_RATE / period as f64;
        let block = sine(freq, 2_000);

        let mut extractor = GrainOnsetExtractor::with_capacity(2_048);
        let mut onsets = Vec::with_capacity(2_048);
        extractor.extract(&block, period, &mut onsets);

        let mut window = vec![0.0f64; 2_048];
        fill_hann(&mut window, 2 * period);

        let mut voice = test_voice();
        voice.start_note(57, 1.0, 1.0, freq, 1, true, false, false);

        let ctx = BlockContext {
            input: &block,
            analysis_period: period,
            onsets: &onsets,
            window: &window,
            adsr_enabled: false, // quick attack only: near-unity after a few ms
            soft_pedal_gain: 1.0,
            released_gain: 1.0,
            aftertouch_enabled: false,
        };

        voice.sola(&ctx, period);

        // Steady-state placement lags the source by a constant offset that
        // depends on where the first grain onset fell.
        let first = onsets[0];
        let delay = period * (1 + first.div_ceil(period)) - first;

        // Mid-block, COLA at one-period spacing reconstructs the input.
        for t in 4 * period..1_500 {
            let expected = block[t - delay];
            let got = voice.synthesis[t];
            assert!(
                (got - expected).abs() < 0.05,
                "sample {t}: got {got}, expected {expected}"
            );
        }
    }

    #[test]
    fn upward_shift_advances_frontier_slower() {
        let period = 200usize;
        let freq = SAMPLE_RATE / period as f64;
        let block = sine(freq, 1_600);

        let mut extractor = GrainOnsetExtractor::with_capacity(2_048);
        let mut onsets = Vec::with_capacity(2_048);
        extractor.extract(&block, period, &mut onsets);

        let mut window = vec![0.0f64; 2_048];
        fill_hann(&mut window, 2 * period);

        let ctx = BlockContext {
            input: &block,
            analysis_period: period,
            onsets: &onsets,
            window: &window,
            adsr_enabled: false,
            soft_pedal_gain: 1.0,
            released_gain: 1.0,
            aftertouch_enabled: false,
        };

        let mut identity = test_voice();
        identity.start_note(57, 1.0, 1.0, freq, 1, true, false, false);
        identity.sola(&ctx, period);

        let mut shifted = test_voice();
        shifted.start_note(69, 1.0, 1.0, freq * 2.0, 2, true, false, false);
        shifted.sola(&ctx, period / 2);

        // Raising pitch packs grain replays at half spacing, so the shifted
        // voice needs more replays and accumulates more total energy.
        let energy = |v: &Voice<f64>| v.synthesis.iter().map(|s| s * s).sum::<f64>();
        assert!(energy(&shifted) > energy(&identity) * 1.2);
    }

    #[test]
    fn hard_stop_uses_quick_release() {
        let mut voice = test_voice();
        voice.start_note(60, 1.0, 1.0, 261.6, 1, true, false, false);

        voice.stop_note(false);
        assert!(voice.quick_fading);
        assert!(voice.quick_release.is_active());
        assert!(voice.is_playing_but_released());
    }

    #[test]
    fn finished_tail_frees_the_voice_and_reports_pan() {
        let mut voice = test_voice();
        voice.start_note(60, 1.0, 1.0, 261.6, 1, true, false, false);
        voice.set_pan(96);
        voice.stop_note(false);

        // Exhaust the quick release.
        for _ in 0..(0.015 * SAMPLE_RATE) as usize + 8 {
            voice.quick_release.next();
        }

        let block = vec![0.0f64; 64];
        let mut left = vec![0.0f64; 64];
        let mut right = vec![0.0f64; 64];
        let ctx = BlockContext {
            input: &block,
            analysis_period: 16,
            onsets: &[0],
            window: &[0.0; 64][..],
            adsr_enabled: true,
            soft_pedal_gain: 1.0,
            released_gain: 1.0,
            aftertouch_enabled: true,
        };

        let outcome = voice.render(&ctx, &mut left, &mut right);
        assert_eq!(outcome, RenderOutcome::Finished { pan: 96 });
        assert!(!voice.is_active());
    }

    #[test]
    fn pan_gains_track_position() {
        let mut voice = test_voice();
        voice.set_pan(0);
        assert!(voice.pan_left > 0.99 && voice.pan_right < 0.01);

        voice.set_pan(127);
        assert!(voice.pan_right > 0.99 && voice.pan_left < 0.01);
        assert_eq!(voice.previous_pan(), 0);
    }
}
