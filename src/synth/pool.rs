use std::ops::Range;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::dsp::envelope::AdsrParams;
use crate::dsp::grains::GrainOnsetExtractor;
use crate::dsp::pitch::PeriodicityEstimator;
use crate::dsp::window::fill_hann;
use crate::dsp::Sample;
use crate::io::midi::{
    MidiEvent, TimedMidi, CC_SOFT_PEDAL, CC_SOSTENUTO_PEDAL, CC_SUSTAIN_PEDAL,
};
use crate::synth::config::{ConfigError, HarmonizerConfig};
use crate::synth::message::{ControlMessage, MessageReceiver};
use crate::synth::pan::PanAssigner;
use crate::synth::tuning::{PitchBendTracker, PitchConverter, VelocityMapper, CENTER_PAN};
use crate::synth::voice::{BlockContext, RenderOutcome, Voice};

/*
VoicePool
=========

The pool owns every voice plus the analysis machinery they share. One call
to `render_block` runs the whole engine for one audio callback:

  1. drain pending control messages (via `drain_control`, host's choice)
  2. apply the block's MIDI events in timestamp order
  3. detect the input period once (ASDF), or fabricate a jittered period
     for unpitched frames
  4. extract grain onsets once
  5. let every sounding voice replay those grains at its own output pitch,
     mixing additively into the stereo output

Everything on this path works out of buffers sized at construction; the
render path never allocates. Methods documented as NOT realtime-safe
(sample-rate and Hz-range changes) resize buffers and must be called while
audio is quiesced.
*/

/// One auto-harmony lane (pedal pitch below the chord, descant above it).
#[derive(Debug, Clone, Copy)]
struct AutoHarmony {
    enabled: bool,
    threshold: u8,
    interval: i8,
    current_pitch: Option<u8>,
}

impl AutoHarmony {
    fn new(threshold: u8) -> Self {
        Self {
            enabled: false,
            threshold,
            interval: 12,
            current_pitch: None,
        }
    }
}

pub struct VoicePool<T: Sample> {
    voices: Vec<Voice<T>>,
    // Whether each voice currently holds a slot in the pan table. Voices
    // forced to center by the lowest-panned-note threshold do not.
    pan_claimed: Vec<bool>,

    estimator: PeriodicityEstimator<T>,
    grain_extractor: GrainOnsetExtractor,
    onsets: Vec<usize>,
    window: Vec<T>,
    window_size: usize,
    polarity_flipped: Vec<T>,

    pan_assigner: PanAssigner,
    converter: PitchConverter,
    bend: PitchBendTracker,
    velocity_map: VelocityMapper,

    adsr_params: AdsrParams,
    quick_attack_params: AdsrParams,
    quick_release_params: AdsrParams,
    adsr_enabled: bool,

    latch_on: bool,
    interval_latch_on: bool,
    // (interval from the latch-time input pitch, velocity captured then)
    latched_intervals: Vec<(i32, f64)>,
    latch_base_note: Option<u8>,
    desired_notes: Vec<u8>,
    desired_velocities: Vec<f64>,

    pedal: AutoHarmony,
    descant: AutoHarmony,

    sustain_pedal_down: bool,
    sostenuto_pedal_down: bool,
    soft_pedal_down: bool,
    soft_pedal_gain: f64,
    released_voice_gain: f64,

    note_stealing: bool,
    lowest_panned_note: u8,
    aftertouch_gain_enabled: bool,

    current_input_freq: Option<f64>,
    unpitched_period_range: Range<usize>,
    rng: SmallRng,

    sample_rate: f64,
    max_block_size: usize,
    note_seq: u64,
    current_frame: u32,

    midi_out: Vec<TimedMidi>,
}

impl<T: Sample> VoicePool<T> {
    /// NOT realtime-safe: allocates every buffer the render path will use.
    pub fn new(config: HarmonizerConfig, sample_rate: f64) -> Result<Self, ConfigError> {
        config.validate()?;
        if !(sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(sample_rate));
        }

        let mut estimator = PeriodicityEstimator::new(config.min_hz, config.max_hz, sample_rate);
        estimator.set_confidence_threshold(config.confidence_threshold);
        let window_capacity =
            2 * estimator.max_period().max(config.unpitched_period_range.end - 1);

        let voices = (0..config.voice_count)
            .map(|_| {
                Voice::new(
                    config.max_block_size,
                    sample_rate,
                    config.adsr,
                    config.quick_attack,
                    config.quick_release,
                )
            })
            .collect();

        Ok(Self {
            voices,
            pan_claimed: vec![false; config.voice_count],
            estimator,
            grain_extractor: GrainOnsetExtractor::with_capacity(config.max_block_size),
            onsets: Vec::with_capacity(config.max_block_size),
            window: vec![T::zero(); window_capacity],
            window_size: 0,
            polarity_flipped: vec![T::zero(); config.max_block_size],
            pan_assigner: PanAssigner::new(config.voice_count, config.stereo_width),
            converter: PitchConverter::new(config.concert_pitch_hz),
            bend: PitchBendTracker::new(
                config.pitch_bend_range_up,
                config.pitch_bend_range_down,
            ),
            velocity_map: VelocityMapper::new(config.velocity_sensitivity),
            adsr_params: config.adsr,
            quick_attack_params: config.quick_attack,
            quick_release_params: config.quick_release,
            adsr_enabled: config.adsr_enabled,
            latch_on: false,
            interval_latch_on: false,
            latched_intervals: Vec::with_capacity(config.voice_count),
            latch_base_note: None,
            desired_notes: Vec::with_capacity(config.voice_count),
            desired_velocities: Vec::with_capacity(config.voice_count),
            pedal: AutoHarmony::new(0),
            descant: AutoHarmony::new(127),
            sustain_pedal_down: false,
            sostenuto_pedal_down: false,
            soft_pedal_down: false,
            soft_pedal_gain: config.soft_pedal_gain,
            released_voice_gain: config.released_voice_gain,
            note_stealing: config.note_stealing,
            lowest_panned_note: config.lowest_panned_note,
            aftertouch_gain_enabled: config.aftertouch_gain_enabled,
            current_input_freq: None,
            unpitched_period_range: config.unpitched_period_range,
            rng: SmallRng::seed_from_u64(0x9e37_79b9),
            sample_rate,
            max_block_size: config.max_block_size,
            note_seq: 0,
            current_frame: 0,
            midi_out: Vec::with_capacity(config.voice_count * 8),
        })
    }

    // ------------------------------------------------------------------
    // rendering

    /// Render one block. `input` is mono; `left`/`right` are overwritten.
    /// MIDI events must arrive in non-decreasing frame order.
    pub fn render_block(
        &mut self,
        input: &[T],
        midi: &[TimedMidi],
        left: &mut [T],
        right: &mut [T],
    ) {
        let num_samples = input.len();
        debug_assert!(num_samples <= self.max_block_size);
        debug_assert!(left.len() >= num_samples && right.len() >= num_samples);

        for sample in left[..num_samples].iter_mut() {
            *sample = T::zero();
        }
        for sample in right[..num_samples].iter_mut() {
            *sample = T::zero();
        }

        self.midi_out.clear();
        self.current_frame = 0;
        for timed in midi {
            self.current_frame = timed.frame;
            self.handle_event(timed.event);
        }

        if num_samples == 0 || !self.voices.iter().any(|v| v.is_active()) {
            return;
        }

        let detected = self.estimator.detect(input);
        let (period, use_flipped) = match detected {
            Some(hz) => {
                self.input_freq_changed(hz);
                self.current_input_freq = Some(hz);
                (((self.sample_rate / hz).round() as usize).max(1), false)
            }
            None => {
                self.current_input_freq = None;
                let period = self
                    .rng
                    .gen_range(self.unpitched_period_range.clone());
                // Random polarity roughly every other unpitched block keeps
                // the fixed grain cadence from ringing at a single pitch.
                (period, self.rng.gen_bool(0.5))
            }
        };

        if detected.is_some() {
            self.grain_extractor.extract(input, period, &mut self.onsets);
        } else {
            GrainOnsetExtractor::extract_unpitched(num_samples, period, &mut self.onsets);
        }

        let grain_len = 2 * period;
        if grain_len != self.window_size && grain_len <= self.window.len() {
            fill_hann(&mut self.window, grain_len);
            self.window_size = grain_len;
        }

        let block_input: &[T] = if use_flipped {
            for (dst, src) in self.polarity_flipped[..num_samples]
                .iter_mut()
                .zip(input.iter())
            {
                *dst = -*src;
            }
            &self.polarity_flipped[..num_samples]
        } else {
            input
        };

        let ctx = BlockContext {
            input: block_input,
            analysis_period: period,
            onsets: &self.onsets,
            window: &self.window,
            adsr_enabled: self.adsr_enabled,
            soft_pedal_gain: if self.soft_pedal_down {
                T::coerce(self.soft_pedal_gain)
            } else {
                T::one()
            },
            released_gain: T::coerce(self.released_voice_gain),
            aftertouch_enabled: self.aftertouch_gain_enabled,
        };

        for index in 0..self.voices.len() {
            if !self.voices[index].is_active() {
                continue;
            }
            let was_pedal = self.voices[index].is_pedal_pitch_voice();
            let was_descant = self.voices[index].is_descant_voice();

            let outcome = self.voices[index].render(&ctx, left, right);
            if let RenderOutcome::Finished { pan } = outcome {
                if self.pan_claimed[index] {
                    self.pan_assigner.pan_turned_off(pan);
                    self.pan_claimed[index] = false;
                }
                if was_pedal {
                    self.pedal.current_pitch = None;
                }
                if was_descant {
                    self.descant.current_pitch = None;
                }
            }
        }
    }

    /// Pull pending parameter changes off the message queue. Call at the
    /// top of the audio callback, before `render_block`.
    pub fn drain_control<R: MessageReceiver>(&mut self, receiver: &mut R) {
        while let Some(message) = receiver.pop() {
            self.apply_message(message);
        }
    }

    fn apply_message(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::StereoWidth(width) => self.set_stereo_width(width),
            ControlMessage::LowestPannedNote(note) => self.set_lowest_panned_note(note),
            ControlMessage::Adsr(params) => self.set_adsr(params),
            ControlMessage::AdsrEnabled(enabled) => self.adsr_enabled = enabled,
            ControlMessage::QuickAttackMs(ms) => self.set_quick_attack_ms(ms),
            ControlMessage::QuickReleaseMs(ms) => self.set_quick_release_ms(ms),
            ControlMessage::PitchBendRange { up, down } => self.set_pitch_bend_range(up, down),
            ControlMessage::VelocitySensitivity(percent) => {
                self.set_velocity_sensitivity(percent)
            }
            ControlMessage::ConcertPitchHz(hz) => self.set_concert_pitch_hz(hz),
            ControlMessage::NoteStealing(enabled) => self.note_stealing = enabled,
            ControlMessage::Latch(on) => self.set_latch(on),
            ControlMessage::IntervalLatch(on) => self.set_interval_latch(on),
            ControlMessage::PedalPitchEnabled(on) => self.set_pedal_pitch_enabled(on),
            ControlMessage::PedalPitchUpperThreshold(threshold) => {
                self.set_pedal_pitch_threshold(threshold)
            }
            ControlMessage::PedalPitchInterval(interval) => {
                self.set_pedal_pitch_interval(interval)
            }
            ControlMessage::DescantEnabled(on) => self.set_descant_enabled(on),
            ControlMessage::DescantLowerThreshold(threshold) => {
                self.set_descant_threshold(threshold)
            }
            ControlMessage::DescantInterval(interval) => self.set_descant_interval(interval),
            ControlMessage::SoftPedalGain(gain) => {
                self.soft_pedal_gain = gain.clamp(0.0, 1.0)
            }
            ControlMessage::AllNotesOff => self.all_notes_off(false),
        }
    }

    // ------------------------------------------------------------------
    // MIDI

    fn handle_event(&mut self, event: MidiEvent) {
        match event {
            MidiEvent::NoteOn { key, velocity, .. } => {
                if velocity == 0 {
                    self.note_off(key);
                } else {
                    self.note_on(key, velocity as f64 / 127.0);
                }
            }
            MidiEvent::NoteOff { key, .. } => self.note_off(key),
            MidiEvent::PolyAftertouch { key, pressure, .. } => {
                if let Some(index) = self.find_sounding(key) {
                    self.voices[index].aftertouch_changed(pressure);
                }
            }
            MidiEvent::ChannelPressure { pressure, .. } => {
                for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
                    voice.aftertouch_changed(pressure);
                }
            }
            MidiEvent::ControlChange {
                controller, value, ..
            } => self.handle_control_change(controller, value),
            MidiEvent::PitchBend { value, .. } => {
                self.bend.set_wheel(value);
                self.refresh_output_freqs();
            }
        }
    }

    fn handle_control_change(&mut self, controller: u8, value: u8) {
        let down = value >= 64;
        match controller {
            CC_SUSTAIN_PEDAL => {
                self.sustain_pedal_down = down;
                if !down && !self.latch_on && !self.interval_latch_on {
                    self.turn_off_keyup_notes();
                }
            }
            CC_SOSTENUTO_PEDAL => {
                self.sostenuto_pedal_down = down;
                if down {
                    for voice in self.voices.iter_mut() {
                        if voice.is_active() && voice.is_key_down() {
                            voice.set_sustaining_from_sostenuto(true);
                        }
                    }
                } else {
                    for index in 0..self.voices.len() {
                        let voice = &mut self.voices[index];
                        if !voice.is_sustaining_from_sostenuto() {
                            continue;
                        }
                        voice.set_sustaining_from_sostenuto(false);
                        if !voice.is_key_down() {
                            self.stop_voice(index, true, true);
                        }
                    }
                    self.pitch_collection_changed();
                }
            }
            CC_SOFT_PEDAL => self.soft_pedal_down = down,
            _ => {}
        }
    }

    /// `velocity` is normalized 0.0–1.0.
    pub fn note_on(&mut self, key: u8, velocity: f64) {
        self.start_auto_or_keyboard_note(key, velocity, true, false, false, true);
        self.pitch_collection_changed();
    }

    pub fn note_off(&mut self, key: u8) {
        if let Some(index) = self.find_sounding(key) {
            let voice = &mut self.voices[index];
            if voice.is_pedal_pitch_voice() || voice.is_descant_voice() {
                return; // auto voices ignore keyboard offs
            }
            let keep_ringing = self.latch_on
                || self.interval_latch_on
                || self.sustain_pedal_down
                || voice.is_sustaining_from_sostenuto();
            if keep_ringing {
                voice.set_key_down(false);
            } else {
                self.stop_voice(index, true, false);
            }
        }
        self.pitch_collection_changed();
    }

    /// Start `notes` as a chord, turning off sounding non-auto notes that
    /// are not part of it.
    pub fn play_chord(&mut self, notes: &[u8], velocity: f64) {
        self.desired_notes.clear();
        self.desired_velocities.clear();
        for &note in notes.iter().take(self.voices.len()) {
            self.desired_notes.push(note);
            self.desired_velocities.push(velocity);
        }
        self.apply_desired_chord();
    }

    pub fn all_notes_off(&mut self, allow_tail_off: bool) {
        for index in 0..self.voices.len() {
            if self.voices[index].is_active() {
                self.stop_voice(index, allow_tail_off, false);
            }
        }
        self.pedal.current_pitch = None;
        self.descant.current_pitch = None;
        self.latched_intervals.clear();
        self.latch_base_note = None;
        self.sustain_pedal_down = false;
        self.sostenuto_pedal_down = false;
    }

    // ------------------------------------------------------------------
    // voice allocation

    fn start_auto_or_keyboard_note(
        &mut self,
        key: u8,
        velocity: f64,
        key_down: bool,
        is_pedal: bool,
        is_descant: bool,
        emit_on_steal_only: bool,
    ) {
        let key = key.min(127);

        let index = if let Some(existing) = self.find_sounding(key) {
            Some(existing)
        } else if let Some(free) = self.voices.iter().position(|v| !v.is_active()) {
            Some(free)
        } else if self.note_stealing {
            self.find_voice_to_steal()
        } else {
            None // exhausted and stealing is off: the note is dropped
        };

        let Some(index) = index else { return };

        if self.voices[index].is_active() {
            // Steal or retrigger: release the old note's pan slot and
            // auto-harmony role, and tell the host it ended.
            let old_note = self.voices[index].note();
            if old_note != Some(key) {
                if let Some(old) = old_note {
                    self.emit_note_off(old);
                }
            }
            if self.pan_claimed[index] {
                self.pan_assigner.pan_turned_off(self.voices[index].pan());
                self.pan_claimed[index] = false;
            }
            if self.voices[index].is_pedal_pitch_voice() {
                self.pedal.current_pitch = None;
            }
            if self.voices[index].is_descant_voice() {
                self.descant.current_pitch = None;
            }
        }

        let pan = if key < self.lowest_panned_note {
            CENTER_PAN
        } else {
            self.pan_claimed[index] = true;
            self.pan_assigner.next_pan()
        };

        self.note_seq += 1;
        let freq = self.converter.midi_to_hz(self.bend.bent_pitch(key));
        let gain = self.velocity_map.gain(velocity);
        self.voices[index].start_note(
            key,
            velocity,
            gain,
            freq,
            self.note_seq,
            key_down,
            is_pedal,
            is_descant,
        );
        self.voices[index].set_pan(pan);

        if !emit_on_steal_only {
            self.emit_note_on(key, velocity);
        }
    }

    fn find_sounding(&self, key: u8) -> Option<usize> {
        self.voices
            .iter()
            .position(|v| v.is_active() && v.note() == Some(key))
    }

    /// Oldest released voice first, then oldest held; pedal-pitch and
    /// descant voices only as a last resort.
    fn find_voice_to_steal(&self) -> Option<usize> {
        let mut best_released: Option<(usize, u64)> = None;
        let mut best_held: Option<(usize, u64)> = None;
        let mut best_any: Option<(usize, u64)> = None;

        for (index, voice) in self.voices.iter().enumerate() {
            if !voice.is_active() {
                continue;
            }
            let seq = voice.note_on_seq();
            let older = |best: Option<(usize, u64)>| match best {
                Some((_, best_seq)) => seq < best_seq,
                None => true,
            };

            if older(best_any) {
                best_any = Some((index, seq));
            }
            if voice.is_pedal_pitch_voice() || voice.is_descant_voice() {
                continue;
            }
            if voice.is_playing_but_released() {
                if older(best_released) {
                    best_released = Some((index, seq));
                }
            } else if older(best_held) {
                best_held = Some((index, seq));
            }
        }

        best_released
            .or(best_held)
            .or(best_any)
            .map(|(index, _)| index)
    }

    fn stop_voice(&mut self, index: usize, allow_tail_off: bool, emit: bool) {
        let note = self.voices[index].note();
        self.voices[index].stop_note(allow_tail_off);
        if let (true, Some(note)) = (emit, note) {
            self.emit_note_off(note);
        }
    }

    fn turn_off_keyup_notes(&mut self) {
        for index in 0..self.voices.len() {
            let voice = &self.voices[index];
            if voice.is_active()
                && voice.is_playing_but_released()
                && !voice.is_pedal_pitch_voice()
                && !voice.is_descant_voice()
                && !voice.is_sustaining_from_sostenuto()
            {
                self.stop_voice(index, true, true);
            }
        }
        self.pitch_collection_changed();
    }

    fn emit_note_on(&mut self, key: u8, velocity: f64) {
        let velocity = (velocity * 127.0).round().clamp(1.0, 127.0) as u8;
        self.emit(MidiEvent::NoteOn {
            channel: 0,
            key,
            velocity,
        });
    }

    fn emit_note_off(&mut self, key: u8) {
        self.emit(MidiEvent::NoteOff {
            channel: 0,
            key,
            velocity: 0,
        });
    }

    // The outgoing buffer is reserved once at construction. A pathological
    // event stream could outrun it within one block; overflow drops the
    // report rather than reallocating mid-callback.
    fn emit(&mut self, event: MidiEvent) {
        if self.midi_out.len() < self.midi_out.capacity() {
            self.midi_out.push(TimedMidi::new(self.current_frame, event));
        }
    }

    // ------------------------------------------------------------------
    // auto harmony

    /// Re-evaluate pedal pitch and descant whenever the keyboard-held pitch
    /// set may have changed.
    fn pitch_collection_changed(&mut self) {
        self.apply_pedal_pitch();
        self.apply_descant();
    }

    fn held_extreme(&self, lowest: bool) -> Option<(u8, f64)> {
        let mut best: Option<(u8, f64)> = None;
        for voice in &self.voices {
            if !voice.is_active()
                || !voice.is_key_down()
                || voice.is_pedal_pitch_voice()
                || voice.is_descant_voice()
            {
                continue;
            }
            let note = match voice.note() {
                Some(note) => note,
                None => continue,
            };
            let better = match best {
                Some((current, _)) => {
                    if lowest {
                        note < current
                    } else {
                        note > current
                    }
                }
                None => true,
            };
            if better {
                best = Some((note, voice.velocity()));
            }
        }
        best
    }

    fn apply_pedal_pitch(&mut self) {
        let desired = if self.pedal.enabled && self.pedal.interval != 0 {
            self.held_extreme(true).and_then(|(lowest, velocity)| {
                if lowest <= self.pedal.threshold {
                    let pitch = lowest as i16 - self.pedal.interval as i16;
                    (0..=127).contains(&pitch).then(|| (pitch as u8, velocity))
                } else {
                    None
                }
            })
        } else {
            None
        };
        // A pitch the keyboard is already sounding is not doubled.
        let desired = desired.filter(|(pitch, _)| {
            self.find_sounding(*pitch)
                .map(|i| {
                    self.voices[i].is_pedal_pitch_voice()
                })
                .unwrap_or(true)
        });

        if desired.map(|(pitch, _)| pitch) == self.pedal.current_pitch {
            return;
        }

        if let Some(old) = self.pedal.current_pitch.take() {
            if let Some(index) = self.find_sounding(old) {
                if self.voices[index].is_pedal_pitch_voice() {
                    self.stop_voice(index, true, true);
                }
            }
        }

        if let Some((pitch, velocity)) = desired {
            self.start_auto_or_keyboard_note(pitch, velocity, false, true, false, false);
            self.pedal.current_pitch = Some(pitch);
        }
    }

    fn apply_descant(&mut self) {
        let desired = if self.descant.enabled && self.descant.interval != 0 {
            self.held_extreme(false).and_then(|(highest, velocity)| {
                if highest >= self.descant.threshold {
                    let pitch = highest as i16 + self.descant.interval as i16;
                    (0..=127).contains(&pitch).then(|| (pitch as u8, velocity))
                } else {
                    None
                }
            })
        } else {
            None
        };
        let desired = desired.filter(|(pitch, _)| {
            self.find_sounding(*pitch)
                .map(|i| self.voices[i].is_descant_voice())
                .unwrap_or(true)
        });

        if desired.map(|(pitch, _)| pitch) == self.descant.current_pitch {
            return;
        }

        if let Some(old) = self.descant.current_pitch.take() {
            if let Some(index) = self.find_sounding(old) {
                if self.voices[index].is_descant_voice() {
                    self.stop_voice(index, true, true);
                }
            }
        }

        if let Some((pitch, velocity)) = desired {
            self.start_auto_or_keyboard_note(pitch, velocity, false, false, true, false);
            self.descant.current_pitch = Some(pitch);
        }
    }

    // ------------------------------------------------------------------
    // latch

    pub fn set_latch(&mut self, on: bool) {
        if self.latch_on == on {
            return;
        }
        self.latch_on = on;
        if !on && !self.interval_latch_on && !self.sustain_pedal_down {
            self.turn_off_keyup_notes();
        }
    }

    /// Turning interval latch on snapshots the currently sounding pitches
    /// as intervals relative to the detected input pitch; the set is
    /// re-pitched whenever the input moves to a new note.
    pub fn set_interval_latch(&mut self, on: bool) {
        if self.interval_latch_on == on {
            return;
        }
        self.interval_latch_on = on;
        self.latched_intervals.clear();
        self.latch_base_note = None;

        if on {
            let base = match self.current_input_freq {
                Some(hz) => self.converter.hz_to_midi(hz).round() as i32,
                None => return, // nothing to latch against until input is pitched
            };
            self.latch_base_note = Some(base.clamp(0, 127) as u8);
            for voice in &self.voices {
                if voice.is_active()
                    && !voice.is_pedal_pitch_voice()
                    && !voice.is_descant_voice()
                {
                    if let Some(note) = voice.note() {
                        if self.latched_intervals.len() < self.latched_intervals.capacity() {
                            self.latched_intervals
                                .push((note as i32 - base, voice.velocity()));
                        }
                    }
                }
            }
        } else if !self.latch_on && !self.sustain_pedal_down {
            self.turn_off_keyup_notes();
        }
    }

    fn input_freq_changed(&mut self, hz: f64) {
        if !self.interval_latch_on || self.latched_intervals.is_empty() {
            return;
        }
        let base = self.converter.hz_to_midi(hz).round() as i32;
        if self.latch_base_note == Some(base.clamp(0, 127) as u8) {
            return;
        }
        self.latch_base_note = Some(base.clamp(0, 127) as u8);

        self.desired_notes.clear();
        self.desired_velocities.clear();
        for i in 0..self.latched_intervals.len() {
            let (interval, velocity) = self.latched_intervals[i];
            let note = base + interval;
            if (0..=127).contains(&note) {
                self.desired_notes.push(note as u8);
                self.desired_velocities.push(velocity);
            }
        }
        self.apply_desired_chord();
    }

    /// Retrigger the pool so exactly `desired_notes` (non-auto) are
    /// sounding.
    fn apply_desired_chord(&mut self) {
        for index in 0..self.voices.len() {
            let voice = &self.voices[index];
            if !voice.is_active()
                || voice.is_pedal_pitch_voice()
                || voice.is_descant_voice()
            {
                continue;
            }
            let note = match voice.note() {
                Some(note) => note,
                None => continue,
            };
            if !self.desired_notes.contains(&note) {
                self.stop_voice(index, true, true);
            }
        }

        for i in 0..self.desired_notes.len() {
            let note = self.desired_notes[i];
            let velocity = self.desired_velocities[i];
            let already = self
                .find_sounding(note)
                .map(|index| {
                    !self.voices[index].is_pedal_pitch_voice()
                        && !self.voices[index].is_descant_voice()
                })
                .unwrap_or(false);
            if !already {
                self.start_auto_or_keyboard_note(note, velocity, true, false, false, false);
            }
        }

        self.pitch_collection_changed();
    }

    // ------------------------------------------------------------------
    // runtime settings

    /// No-op when the width is unchanged; otherwise rebuilds the pan table
    /// and moves every panned voice to the slot closest to its old spot.
    pub fn set_stereo_width(&mut self, width: u8) {
        if !self.pan_assigner.set_stereo_width(width) {
            return;
        }
        for index in 0..self.voices.len() {
            if !self.voices[index].is_active() {
                self.pan_claimed[index] = false;
                continue;
            }
            let note = self.voices[index].note().unwrap_or(0);
            if note < self.lowest_panned_note {
                self.pan_claimed[index] = false;
                self.voices[index].set_pan(CENTER_PAN);
            } else {
                let pan = self.pan_assigner.closest_unused(self.voices[index].pan());
                self.pan_claimed[index] = true;
                self.voices[index].set_pan(pan);
            }
        }
    }

    pub fn set_lowest_panned_note(&mut self, note: u8) {
        if self.lowest_panned_note == note {
            return;
        }
        self.lowest_panned_note = note;
        for index in 0..self.voices.len() {
            if !self.voices[index].is_active() {
                continue;
            }
            let voice_note = self.voices[index].note().unwrap_or(0);
            let should_pan = voice_note >= note;
            if !should_pan && self.pan_claimed[index] {
                self.pan_assigner.pan_turned_off(self.voices[index].pan());
                self.pan_claimed[index] = false;
                self.voices[index].set_pan(CENTER_PAN);
            } else if should_pan && !self.pan_claimed[index] {
                let pan = self.pan_assigner.next_pan();
                self.pan_claimed[index] = true;
                self.voices[index].set_pan(pan);
            }
        }
    }

    pub fn set_adsr(&mut self, params: AdsrParams) {
        self.adsr_params = params;
        for voice in self.voices.iter_mut() {
            voice.set_adsr_params(params);
        }
    }

    pub fn set_adsr_enabled(&mut self, enabled: bool) {
        self.adsr_enabled = enabled;
    }

    /// Attack time for non-legato note starts. Applied to both quick
    /// envelopes so their ramp rates stay paired.
    pub fn set_quick_attack_ms(&mut self, ms: u16) {
        let seconds = ms as f64 / 1_000.0;
        self.quick_attack_params.attack = seconds;
        self.quick_release_params.attack = seconds;
        self.push_quick_envelope_params();
    }

    /// Release time for forced fade-outs. Applied to both quick envelopes
    /// so their ramp rates stay paired.
    pub fn set_quick_release_ms(&mut self, ms: u16) {
        let seconds = ms as f64 / 1_000.0;
        self.quick_release_params.release = seconds;
        self.quick_attack_params.release = seconds;
        self.push_quick_envelope_params();
    }

    fn push_quick_envelope_params(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.set_quick_attack_params(self.quick_attack_params);
            voice.set_quick_release_params(self.quick_release_params);
        }
    }

    pub fn set_pitch_bend_range(&mut self, up: u8, down: u8) {
        if self.bend.range_up() == up && self.bend.range_down() == down {
            return;
        }
        self.bend.set_range(up, down);
        self.refresh_output_freqs();
    }

    pub fn set_velocity_sensitivity(&mut self, percent: u8) {
        self.velocity_map.set_sensitivity_percent(percent);
        for voice in self.voices.iter_mut() {
            if voice.is_active() {
                let gain = self.velocity_map.gain(voice.velocity());
                voice.set_velocity_gain(gain);
            }
        }
    }

    pub fn set_concert_pitch_hz(&mut self, hz: f64) {
        if !(hz > 0.0) || self.converter.concert_pitch_hz() == hz {
            return;
        }
        self.converter.set_concert_pitch_hz(hz);
        self.refresh_output_freqs();
    }

    pub fn set_note_stealing(&mut self, enabled: bool) {
        self.note_stealing = enabled;
    }

    pub fn set_pedal_pitch_enabled(&mut self, on: bool) {
        if self.pedal.enabled == on {
            return;
        }
        self.pedal.enabled = on;
        self.apply_pedal_pitch();
    }

    pub fn set_pedal_pitch_threshold(&mut self, threshold: u8) {
        if self.pedal.threshold == threshold {
            return;
        }
        self.pedal.threshold = threshold;
        self.apply_pedal_pitch();
    }

    /// Semitones below the lowest held note. Zero turns the feature off.
    pub fn set_pedal_pitch_interval(&mut self, interval: i8) {
        if self.pedal.interval == interval {
            return;
        }
        self.pedal.interval = interval;
        if interval == 0 {
            self.pedal.enabled = false;
        }
        self.apply_pedal_pitch();
    }

    pub fn set_descant_enabled(&mut self, on: bool) {
        if self.descant.enabled == on {
            return;
        }
        self.descant.enabled = on;
        self.apply_descant();
    }

    pub fn set_descant_threshold(&mut self, threshold: u8) {
        if self.descant.threshold == threshold {
            return;
        }
        self.descant.threshold = threshold;
        self.apply_descant();
    }

    /// Semitones above the highest held note. Zero turns the feature off.
    pub fn set_descant_interval(&mut self, interval: i8) {
        if self.descant.interval == interval {
            return;
        }
        self.descant.interval = interval;
        if interval == 0 {
            self.descant.enabled = false;
        }
        self.apply_descant();
    }

    pub fn set_soft_pedal_gain(&mut self, gain: f64) {
        self.soft_pedal_gain = gain.clamp(0.0, 1.0);
    }

    /// NOT realtime-safe: re-derives the pitch search lag range and may
    /// grow the shared window buffer.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<(), ConfigError> {
        if !(sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(sample_rate));
        }
        self.sample_rate = sample_rate;
        self.estimator.set_sample_rate(sample_rate);
        self.grow_window_capacity();
        for voice in self.voices.iter_mut() {
            voice.update_sample_rate(sample_rate);
        }
        Ok(())
    }

    /// NOT realtime-safe: resizes the ASDF scratch and window buffers.
    pub fn set_hz_range(&mut self, min_hz: f64, max_hz: f64) {
        self.estimator.set_hz_range(min_hz, max_hz);
        self.grow_window_capacity();
    }

    pub fn set_confidence_threshold(&mut self, threshold: f64) {
        self.estimator.set_confidence_threshold(threshold);
    }

    fn grow_window_capacity(&mut self) {
        let needed =
            2 * self.estimator.max_period().max(self.unpitched_period_range.end - 1);
        if needed > self.window.len() {
            self.window.resize(needed, T::zero());
        }
        self.window_size = 0; // force a refill at the next block
    }

    fn refresh_output_freqs(&mut self) {
        for voice in self.voices.iter_mut() {
            if let Some(note) = voice.note() {
                let freq = self.converter.midi_to_hz(self.bend.bent_pitch(note));
                voice.set_output_freq(freq);
            }
        }
    }

    // ------------------------------------------------------------------
    // queries

    pub fn num_active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Collect sounding pitches into `out`, ascending. Released-but-ringing
    /// notes are skipped unless `include_released` is set.
    pub fn report_active_notes(&self, out: &mut Vec<u8>, include_released: bool) {
        out.clear();
        for voice in &self.voices {
            if !voice.is_active() {
                continue;
            }
            if !include_released && voice.is_playing_but_released() {
                continue;
            }
            if let Some(note) = voice.note() {
                out.push(note);
            }
        }
        out.sort_unstable();
    }

    pub fn voice_pan(&self, index: usize) -> Option<u8> {
        self.voices.get(index).map(|v| v.pan())
    }

    pub fn voice_velocity(&self, index: usize) -> Option<f64> {
        self.voices.get(index).map(|v| v.velocity())
    }

    pub fn voice_note(&self, index: usize) -> Option<u8> {
        self.voices.get(index).and_then(|v| v.note())
    }

    /// Last detected input frequency, `None` while the input is unpitched.
    pub fn current_input_frequency(&self) -> Option<f64> {
        self.current_input_freq
    }

    pub fn is_latch_on(&self) -> bool {
        self.latch_on
    }

    pub fn is_interval_latch_on(&self) -> bool {
        self.interval_latch_on
    }

    pub fn is_pedal_pitch_on(&self) -> bool {
        self.pedal.enabled
    }

    pub fn pedal_pitch_note(&self) -> Option<u8> {
        self.pedal.current_pitch
    }

    pub fn is_descant_on(&self) -> bool {
        self.descant.enabled
    }

    pub fn descant_note(&self) -> Option<u8> {
        self.descant.current_pitch
    }

    pub fn is_sustain_pedal_down(&self) -> bool {
        self.sustain_pedal_down
    }

    /// Note on/offs the pool generated itself during the last block
    /// (stealing, latch teardown, pedal pitch, descant).
    pub fn midi_out(&self) -> &[TimedMidi] {
        &self.midi_out
    }
}
