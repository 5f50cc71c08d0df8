use crate::dsp::envelope::AdsrParams;

#[cfg(feature = "rtrb")]
use rtrb::Consumer;

/// Parameter changes pushed from a non-audio thread.
///
/// The audio thread drains these at the top of each block via
/// [`VoicePool::drain_control`](crate::synth::VoicePool::drain_control); the
/// ring buffer replaces any locking around the parameter copy. Settings that
/// would resize buffers (voice count, block budget, Hz search range) are
/// deliberately absent — those rebuild the pool outside the audio context.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ControlMessage {
    StereoWidth(u8),
    LowestPannedNote(u8),
    Adsr(AdsrParams),
    AdsrEnabled(bool),
    QuickAttackMs(u16),
    QuickReleaseMs(u16),
    PitchBendRange { up: u8, down: u8 },
    VelocitySensitivity(u8),
    ConcertPitchHz(f64),
    NoteStealing(bool),
    Latch(bool),
    IntervalLatch(bool),
    PedalPitchEnabled(bool),
    PedalPitchUpperThreshold(u8),
    PedalPitchInterval(i8),
    DescantEnabled(bool),
    DescantLowerThreshold(u8),
    DescantInterval(i8),
    SoftPedalGain(f64),
    AllNotesOff,
}

pub trait MessageReceiver {
    fn pop(&mut self) -> Option<ControlMessage>;
}

#[cfg(feature = "rtrb")]
impl MessageReceiver for Consumer<ControlMessage> {
    fn pop(&mut self) -> Option<ControlMessage> {
        Consumer::pop(self).ok()
    }
}
