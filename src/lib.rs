pub mod dsp;
pub mod io;
pub mod synth; // Voice management, polyphony, MIDI semantics

/// Default upper bound on the number of samples per processed block.
/// All internal buffers are sized against this (or the configured override)
/// at construction time; the render path never allocates.
pub use synth::{ConfigError, HarmonizerConfig, VoicePool};

pub const MAX_BLOCK_SIZE: usize = 2048;

pub(crate) const MIN_TIME: f64 = 1.0 / 48_000.0;
