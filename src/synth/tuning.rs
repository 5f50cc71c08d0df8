//! Pitch and velocity conversion helpers shared across the pool.

pub const CENTER_PAN: u8 = 64;

/// Concert-pitch-aware conversion between MIDI pitch and Hz.
#[derive(Debug, Clone, Copy)]
pub struct PitchConverter {
    concert_pitch_hz: f64,
}

impl PitchConverter {
    pub fn new(concert_pitch_hz: f64) -> Self {
        debug_assert!(concert_pitch_hz > 0.0);
        Self { concert_pitch_hz }
    }

    pub fn concert_pitch_hz(&self) -> f64 {
        self.concert_pitch_hz
    }

    pub fn set_concert_pitch_hz(&mut self, hz: f64) {
        debug_assert!(hz > 0.0);
        self.concert_pitch_hz = hz;
    }

    /// MIDI (possibly fractional, post-bend) to frequency.
    pub fn midi_to_hz(&self, midi: f64) -> f64 {
        self.concert_pitch_hz * ((midi - 69.0) / 12.0).exp2()
    }

    /// Frequency to fractional MIDI pitch.
    pub fn hz_to_midi(&self, hz: f64) -> f64 {
        debug_assert!(hz > 0.0);
        69.0 + 12.0 * (hz / self.concert_pitch_hz).log2()
    }
}

/// Tracks the pitch wheel and bends incoming notes by the configured
/// up/down semitone ranges.
#[derive(Debug, Clone, Copy)]
pub struct PitchBendTracker {
    range_up: u8,
    range_down: u8,
    /// Signed wheel offset from center: -8192..=8191.
    wheel: i16,
}

impl PitchBendTracker {
    pub fn new(range_up: u8, range_down: u8) -> Self {
        Self {
            range_up,
            range_down,
            wheel: 0,
        }
    }

    pub fn range_up(&self) -> u8 {
        self.range_up
    }

    pub fn range_down(&self) -> u8 {
        self.range_down
    }

    pub fn set_range(&mut self, up: u8, down: u8) {
        self.range_up = up;
        self.range_down = down;
    }

    pub fn wheel(&self) -> i16 {
        self.wheel
    }

    pub fn set_wheel(&mut self, value: i16) {
        self.wheel = value.clamp(-8192, 8191);
    }

    pub fn is_centered(&self) -> bool {
        self.wheel == 0
    }

    /// The effective (fractional) pitch of `note` under the current wheel
    /// position and bend ranges.
    pub fn bent_pitch(&self, note: u8) -> f64 {
        let offset = if self.wheel >= 0 {
            self.range_up as f64 * self.wheel as f64 / 8191.0
        } else {
            self.range_down as f64 * self.wheel as f64 / 8192.0
        };
        note as f64 + offset
    }
}

/// Maps raw 0–1 velocity through the sensitivity setting.
///
/// Sensitivity 1.0 tracks velocity exactly; 0.0 plays every note at full
/// gain. In between, quiet notes are raised proportionally:
/// `v + (1 - v) * (1 - sensitivity)`.
#[derive(Debug, Clone, Copy)]
pub struct VelocityMapper {
    sensitivity: f64,
}

impl VelocityMapper {
    pub fn new(sensitivity_percent: u8) -> Self {
        Self {
            sensitivity: sensitivity_percent.min(100) as f64 / 100.0,
        }
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn set_sensitivity_percent(&mut self, percent: u8) {
        self.sensitivity = percent.min(100) as f64 / 100.0;
    }

    pub fn gain(&self, velocity: f64) -> f64 {
        let velocity = velocity.clamp(0.0, 1.0);
        velocity + (1.0 - velocity) * (1.0 - self.sensitivity)
    }
}
