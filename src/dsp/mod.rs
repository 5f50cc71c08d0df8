//! Low-level DSP primitives used by the harmonizer voices.
//!
//! These components are allocation-free and realtime-safe: every buffer they
//! touch is handed in or sized once up front, so they can run inside the audio
//! callback. They intentionally stay focused on the signal-processing math —
//! voice allocation and MIDI semantics live in the `synth` layer.

use num_traits::Float;

/// Attack/decay/sustain/release envelope generator.
pub mod envelope;
/// Pitch-synchronous grain onset extraction (PSOLA epoch detection).
pub mod grains;
/// ASDF periodicity estimation with sub-sample refinement.
pub mod pitch;
/// Analysis window generation.
pub mod window;

pub use envelope::EnvelopeStage;

/// Floating-point sample type the engine is generic over.
///
/// Implemented for `f32` and `f64` so the same algorithm code serves both
/// precisions without duplication. `coerce` brings literal constants into the
/// sample domain without a fallible cast.
pub trait Sample:
    Float
    + std::ops::AddAssign
    + std::ops::SubAssign
    + std::ops::MulAssign
    + std::fmt::Debug
    + Send
    + 'static
{
    fn coerce(value: f64) -> Self;

    fn to_f64(self) -> f64;
}

impl Sample for f32 {
    #[inline]
    fn coerce(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Sample for f64 {
    #[inline]
    fn coerce(value: f64) -> Self {
        value
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}
