use std::fmt;
use std::ops::Range;

use crate::dsp::envelope::AdsrParams;
use crate::dsp::pitch::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_HZ, DEFAULT_MIN_HZ};
use crate::MAX_BLOCK_SIZE;

/// Prepare-time configuration for a [`VoicePool`](crate::synth::VoicePool).
///
/// Everything here is fixed-capacity input to construction: changing the
/// voice count or block budget afterwards means rebuilding the pool from a
/// non-audio context. The runtime-tweakable settings (stereo width, ADSR,
/// pedal-pitch thresholds, ...) have setters on the pool itself; the values
/// here are just their initial state.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizerConfig {
    /// Number of voices in the pool. Fixed for the pool's lifetime.
    pub voice_count: usize,
    /// Largest block the host will ever hand to `render_block`.
    pub max_block_size: usize,

    /// Pitch-detection search range in Hz.
    pub min_hz: f64,
    pub max_hz: f64,
    /// Normalized-ASDF level above which a frame is declared unpitched.
    pub confidence_threshold: f64,

    /// Tuning reference for A4.
    pub concert_pitch_hz: f64,

    pub adsr: AdsrParams,
    pub quick_attack: AdsrParams,
    pub quick_release: AdsrParams,
    pub adsr_enabled: bool,

    /// Pitch-bend ranges in semitones.
    pub pitch_bend_range_up: u8,
    pub pitch_bend_range_down: u8,

    /// 0–100; 100 = full velocity tracking, 0 = velocity ignored.
    pub velocity_sensitivity: u8,

    /// 0–100 stereo spread of the pan table.
    pub stereo_width: u8,
    /// Notes below this pitch are always panned center.
    pub lowest_panned_note: u8,

    pub note_stealing: bool,

    /// Gain applied to every voice while the soft pedal is down.
    pub soft_pedal_gain: f64,
    /// Gain applied to voices that are sounding with their key released.
    pub released_voice_gain: f64,

    /// The arbitrary analysis "period" imposed on unpitched frames is drawn
    /// from this range each block.
    pub unpitched_period_range: Range<usize>,
    /// Enables the aftertouch amplitude response.
    pub aftertouch_gain_enabled: bool,
}

impl Default for HarmonizerConfig {
    fn default() -> Self {
        Self {
            voice_count: 12,
            max_block_size: MAX_BLOCK_SIZE,
            min_hz: DEFAULT_MIN_HZ,
            max_hz: DEFAULT_MAX_HZ,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            concert_pitch_hz: 440.0,
            adsr: AdsrParams::new(0.035, 0.06, 0.8, 0.01),
            quick_attack: AdsrParams::new(0.015, 0.01, 1.0, 0.015),
            quick_release: AdsrParams::new(0.01, 0.005, 1.0, 0.015),
            adsr_enabled: true,
            pitch_bend_range_up: 2,
            pitch_bend_range_down: 2,
            velocity_sensitivity: 100,
            stereo_width: 100,
            lowest_panned_note: 0,
            note_stealing: true,
            soft_pedal_gain: 0.65,
            released_voice_gain: 1.0,
            unpitched_period_range: 50..201,
            aftertouch_gain_enabled: true,
        }
    }
}

impl HarmonizerConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.voice_count == 0 {
            return Err(ConfigError::NoVoices);
        }
        if self.max_block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if !(self.min_hz > 0.0 && self.max_hz > self.min_hz) {
            return Err(ConfigError::InvalidHzRange {
                min_hz: self.min_hz,
                max_hz: self.max_hz,
            });
        }
        if !(self.concert_pitch_hz > 0.0) {
            return Err(ConfigError::InvalidConcertPitch(self.concert_pitch_hz));
        }
        if self.unpitched_period_range.is_empty() || self.unpitched_period_range.start == 0 {
            return Err(ConfigError::InvalidUnpitchedRange);
        }
        Ok(())
    }
}

/// Rejected configuration. Only surfaces from non-realtime construction;
/// the render path never produces errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NoVoices,
    ZeroBlockSize,
    InvalidHzRange { min_hz: f64, max_hz: f64 },
    InvalidConcertPitch(f64),
    InvalidUnpitchedRange,
    InvalidSampleRate(f64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoVoices => write!(f, "voice count must be at least 1"),
            ConfigError::ZeroBlockSize => write!(f, "max block size must be at least 1"),
            ConfigError::InvalidHzRange { min_hz, max_hz } => {
                write!(f, "invalid pitch search range: {min_hz} Hz .. {max_hz} Hz")
            }
            ConfigError::InvalidConcertPitch(hz) => {
                write!(f, "concert pitch must be positive, got {hz} Hz")
            }
            ConfigError::InvalidUnpitchedRange => {
                write!(f, "unpitched period range must be non-empty and start above 0")
            }
            ConfigError::InvalidSampleRate(rate) => {
                write!(f, "sample rate must be positive, got {rate}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
