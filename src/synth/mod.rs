// Purpose: voice management, polyphony, MIDI semantics.
// This layer sits above the dsp primitives and owns the per-block render loop.

pub mod config;
pub mod message;
pub mod pan;
pub mod pool;
pub mod tuning;
pub mod voice;

pub use config::{ConfigError, HarmonizerConfig};
pub use pool::VoicePool;
