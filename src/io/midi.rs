//! MIDI-like event surface.
//!
//! The engine does not talk to MIDI hardware; the host hands it an ordered,
//! frame-stamped event list per block, and the engine reports internally
//! generated note on/offs (latch, pedal pitch, descant, stealing) back out
//! through the same event type for host/UI observation.

/// Controller numbers the engine reacts to.
pub const CC_SUSTAIN_PEDAL: u8 = 64;
pub const CC_SOSTENUTO_PEDAL: u8 = 66;
pub const CC_SOFT_PEDAL: u8 = 67;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    /// Per-key pressure.
    PolyAftertouch { channel: u8, key: u8, pressure: u8 },
    /// Channel-wide pressure, applied to every sounding voice.
    ChannelPressure { channel: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// 14-bit bend as a signed offset from center: -8192..=8191.
    PitchBend { channel: u8, value: i16 },
}

/// A MIDI event stamped with its sample offset inside the current block.
/// Hosts must deliver these in non-decreasing `frame` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedMidi {
    pub frame: u32,
    pub event: MidiEvent,
}

impl TimedMidi {
    pub fn new(frame: u32, event: MidiEvent) -> Self {
        Self { frame, event }
    }
}
