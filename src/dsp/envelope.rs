use crate::{dsp::Sample, MIN_TIME};

/*
ADSR Envelope
=============

Linear ADSR envelope generator shaping each voice's amplitude.

  Level
    1.0 ┐     ╱╲
        │    ╱  ╲___________
    S   │   ╱               ╲
        │  ╱                 ╲
    0.0 └─╱───────────────────╲──→ Time
        Attack Decay  Sustain  Release

A small state machine governs the stages: `trigger()` (gate high) restarts
the attack from zero, `release()` (gate low) ramps to silence from wherever
the level currently is. Releasing from the CURRENT level rather than the
sustain level is what prevents clicks when a note is released mid-attack.

Release is special-cased: the starting level and total sample count are
snapshotted at `release()` time and interpolated linearly, so the envelope
lands on exactly 0.0 and the owning voice can be recycled deterministically.

Each voice carries three of these: the primary ADSR, a quick-release
envelope used when a note must stop without its normal tail (voice stealing,
latch teardown), and a quick-attack envelope used to debounce note starts
when the primary ADSR is bypassed.
*/

/// Parameter block for one envelope. Attack/decay/release in seconds,
/// sustain as a 0.0–1.0 ratio.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdsrParams {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl AdsrParams {
    pub const fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self::new(0.035, 0.06, 0.8, 0.01)
    }
}

/// The current stage of the envelope state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,    // gate low, level = 0
    Attack,  // ramping up to 1.0
    Decay,   // ramping down to the sustain level
    Sustain, // holding while the gate stays high
    Release, // ramping down to 0
}

pub struct Envelope<T: Sample> {
    params: AdsrParams,
    sample_rate: f64,

    stage: EnvelopeStage,
    level: T,

    decay_start_level: T,

    // Release bookkeeping, snapshotted at release() for precision.
    release_start_level: T,
    release_total_samples: u32,
    release_elapsed_samples: u32,
}

impl<T: Sample> Envelope<T> {
    pub fn new(params: AdsrParams, sample_rate: f64) -> Self {
        Self {
            params: Self::sanitized(params),
            sample_rate,
            stage: EnvelopeStage::Idle,
            level: T::zero(),
            decay_start_level: T::zero(),
            release_start_level: T::zero(),
            release_total_samples: 1,
            release_elapsed_samples: 0,
        }
    }

    fn sanitized(params: AdsrParams) -> AdsrParams {
        AdsrParams {
            attack: params.attack.max(MIN_TIME),
            decay: params.decay.max(MIN_TIME),
            sustain: params.sustain.clamp(0.0, 1.0),
            release: params.release.max(MIN_TIME),
        }
    }

    /// Replace the parameter block. Takes effect from the current sample on;
    /// the stage machine is left where it is.
    pub fn set_params(&mut self, params: AdsrParams) {
        self.params = Self::sanitized(params);
    }

    pub fn params(&self) -> AdsrParams {
        self.params
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        debug_assert!(sample_rate > 0.0);
        self.sample_rate = sample_rate;
    }

    /// Gate high: restart the attack from zero for a clean retrigger.
    pub fn trigger(&mut self) {
        self.level = T::zero();
        self.stage = EnvelopeStage::Attack;
        self.release_elapsed_samples = 0;
    }

    /// Gate low: ramp to silence from the current level.
    pub fn release(&mut self) {
        if self.stage == EnvelopeStage::Idle {
            return;
        }

        self.release_start_level = self.level;
        self.release_total_samples =
            ((self.params.release * self.sample_rate).round() as u32).max(1);
        self.release_elapsed_samples = 0;
        self.stage = EnvelopeStage::Release;
    }

    /// Begin the release ramp from an explicit level, regardless of the
    /// current stage. Used for forced fade-outs where the envelope was not
    /// necessarily running beforehand.
    pub fn release_from(&mut self, level: T) {
        self.level = level.min(T::one()).max(T::zero());
        self.release_start_level = self.level;
        self.release_total_samples =
            ((self.params.release * self.sample_rate).round() as u32).max(1);
        self.release_elapsed_samples = 0;
        self.stage = EnvelopeStage::Release;
    }

    /// Advance one sample and return the new level.
    pub fn next(&mut self) -> T {
        match self.stage {
            EnvelopeStage::Idle => {
                self.level = T::zero();
            }

            EnvelopeStage::Attack => {
                let increment = T::coerce(1.0 / (self.params.attack * self.sample_rate));
                self.level += increment;

                if self.level >= T::one() {
                    self.level = T::one();
                    self.decay_start_level = T::one();
                    self.stage = EnvelopeStage::Decay;
                }
            }

            EnvelopeStage::Decay => {
                let target = T::coerce(self.params.sustain);
                let total_drop = self.decay_start_level - target;
                let decrement = total_drop * T::coerce(1.0 / (self.params.decay * self.sample_rate));
                self.level -= decrement;

                if self.level <= target {
                    self.level = target;
                    self.stage = EnvelopeStage::Sustain;
                }
            }

            EnvelopeStage::Sustain => {
                self.level = T::coerce(self.params.sustain);
            }

            EnvelopeStage::Release => {
                let progress = T::coerce(
                    self.release_elapsed_samples as f64 / self.release_total_samples as f64,
                );
                self.level = (self.release_start_level * (T::one() - progress)).max(T::zero());

                self.release_elapsed_samples = self.release_elapsed_samples.saturating_add(1);

                if self.release_elapsed_samples >= self.release_total_samples {
                    self.level = T::zero();
                    self.stage = EnvelopeStage::Idle;
                }
            }
        }

        debug_assert!(self.level >= T::zero() && self.level <= T::one());

        self.level
    }

    /// Returns true while the envelope is producing output (not idle).
    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeStage::Idle
    }

    pub fn reset(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.level = T::zero();
        self.decay_start_level = T::zero();
        self.release_start_level = T::zero();
        self.release_elapsed_samples = 0;
    }

    pub fn level(&self) -> T {
        self.level
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 1_000.0;

    fn advance(env: &mut Envelope<f32>, samples: usize) {
        for _ in 0..samples {
            env.next();
        }
    }

    #[test]
    fn attack_reaches_full_level() {
        let mut env = Envelope::<f32>::new(AdsrParams::new(0.01, 0.1, 0.7, 0.2), SAMPLE_RATE);

        env.trigger();
        advance(&mut env, (0.01 * SAMPLE_RATE) as usize);

        assert!(env.level() > 0.99, "expected attack to reach full level");
        assert_ne!(env.stage(), EnvelopeStage::Attack);
    }

    #[test]
    fn sustain_holds_target_level() {
        let sustain = 0.6;
        let mut env = Envelope::<f32>::new(AdsrParams::new(0.01, 0.05, sustain, 0.2), SAMPLE_RATE);

        env.trigger();
        advance(&mut env, ((0.01 + 0.05) * SAMPLE_RATE) as usize + 5);

        assert_eq!(env.stage(), EnvelopeStage::Sustain);
        assert!((env.level() - sustain as f32).abs() < 0.05);
    }

    #[test]
    fn release_falls_back_to_idle() {
        let release = 0.03;
        let mut env = Envelope::<f32>::new(AdsrParams::new(0.01, 0.05, 0.5, release), SAMPLE_RATE);

        env.trigger();
        advance(&mut env, (0.02 * SAMPLE_RATE) as usize);

        env.release();
        advance(&mut env, (release * SAMPLE_RATE) as usize + 2);

        assert!(env.level() <= 0.001, "release should fall back to zero");
        assert_eq!(env.stage(), EnvelopeStage::Idle);
    }

    #[test]
    fn release_starts_from_current_level_mid_attack() {
        let mut env = Envelope::<f32>::new(AdsrParams::new(0.1, 0.05, 0.7, 0.05), SAMPLE_RATE);

        env.trigger();
        advance(&mut env, 20); // partway up the attack ramp
        let mid_level = env.level();
        assert!(mid_level > 0.0 && mid_level < 1.0);

        env.release();
        let after = env.next();
        assert!(
            after <= mid_level,
            "release must ramp down from the interrupted level, not jump"
        );
    }

    #[test]
    fn double_precision_instantiation_behaves() {
        let mut env = Envelope::<f64>::new(AdsrParams::default(), 48_000.0);
        env.trigger();
        for _ in 0..4_800 {
            env.next();
        }
        assert!(env.is_active());
    }
}
