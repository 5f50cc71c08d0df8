use harmonizer_dsp::io::midi::{MidiEvent, TimedMidi, CC_SOFT_PEDAL};
use harmonizer_dsp::synth::{HarmonizerConfig, VoicePool};

const SAMPLE_RATE: f64 = 44_100.0;
const BLOCK: usize = 2_048;

fn pool_f64(voices: usize) -> VoicePool<f64> {
    let config = HarmonizerConfig {
        voice_count: voices,
        ..Default::default()
    };
    VoicePool::new(config, SAMPLE_RATE).unwrap()
}

fn sine(freq: f64, len: usize) -> Vec<f64> {
    (0..len)
        .map(|n| (2.0 * std::f64::consts::PI * freq * n as f64 / SAMPLE_RATE).sin())
        .collect()
}

fn noise(len: usize) -> Vec<f64> {
    let mut state = 0x12345678u32;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f64 / (1u32 << 24) as f64 * 2.0 - 1.0
        })
        .collect()
}

fn render(pool: &mut VoicePool<f64>, input: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut left = vec![0.0; input.len()];
    let mut right = vec![0.0; input.len()];
    pool.render_block(input, &[], &mut left, &mut right);
    (left, right)
}

fn active_notes(pool: &VoicePool<f64>, include_released: bool) -> Vec<u8> {
    let mut notes = Vec::new();
    pool.report_active_notes(&mut notes, include_released);
    notes
}

#[test]
fn four_note_ons_take_four_distinct_voices() {
    let mut pool = pool_f64(4);
    for note in [60, 64, 67, 70] {
        pool.note_on(note, 0.8);
    }
    assert_eq!(pool.num_active_voices(), 4);
    assert_eq!(active_notes(&pool, false), vec![60, 64, 67, 70]);
}

#[test]
fn fifth_note_steals_a_released_voice_before_a_held_one() {
    let mut pool = pool_f64(4);
    for note in [60, 64, 67, 70] {
        pool.note_on(note, 0.8);
    }
    // 64 goes into its release tail; it stays allocated but is the
    // preferred steal target even though 60 is older.
    pool.note_off(64);
    pool.note_on(72, 0.8);

    let notes = active_notes(&pool, true);
    assert_eq!(notes, vec![60, 67, 70, 72]);
}

#[test]
fn fifth_note_steals_the_oldest_held_voice_when_none_are_released() {
    let mut pool = pool_f64(4);
    for note in [60, 64, 67, 70] {
        pool.note_on(note, 0.8);
    }
    pool.note_on(72, 0.8);
    assert_eq!(active_notes(&pool, false), vec![64, 67, 70, 72]);
}

#[test]
fn note_is_dropped_when_pool_is_full_and_stealing_is_off() {
    let mut pool = pool_f64(2);
    pool.set_note_stealing(false);
    pool.note_on(60, 0.8);
    pool.note_on(64, 0.8);
    pool.note_on(67, 0.8);
    assert_eq!(active_notes(&pool, false), vec![60, 64]);
    assert!(pool.midi_out().is_empty());
}

#[test]
fn pedal_pitch_activates_below_the_threshold_and_releases_with_its_source() {
    let mut pool = pool_f64(4);
    pool.set_pedal_pitch_interval(12);
    pool.set_pedal_pitch_threshold(60);
    pool.set_pedal_pitch_enabled(true);

    pool.note_on(55, 0.9);
    assert_eq!(pool.pedal_pitch_note(), Some(43));
    assert_eq!(active_notes(&pool, false), vec![43, 55]);

    pool.note_off(55);
    assert_eq!(pool.pedal_pitch_note(), None);
    assert!(active_notes(&pool, false).is_empty());
}

#[test]
fn descant_activates_above_the_threshold() {
    let mut pool = pool_f64(4);
    pool.set_descant_interval(7);
    pool.set_descant_threshold(60);
    pool.set_descant_enabled(true);

    pool.note_on(64, 0.9);
    assert_eq!(pool.descant_note(), Some(71));

    pool.note_off(64);
    assert_eq!(pool.descant_note(), None);
}

#[test]
fn threshold_change_reevaluates_pedal_pitch_immediately() {
    let mut pool = pool_f64(4);
    pool.set_pedal_pitch_interval(12);
    pool.set_pedal_pitch_threshold(50);
    pool.set_pedal_pitch_enabled(true);

    pool.note_on(55, 0.9);
    assert_eq!(pool.pedal_pitch_note(), None);

    pool.set_pedal_pitch_threshold(60);
    assert_eq!(pool.pedal_pitch_note(), Some(43));
}

#[test]
fn interval_latch_retriggers_when_the_input_note_moves() {
    let mut pool = pool_f64(8);

    // Hold a C major triad against a sung C.
    pool.note_on(60, 0.8);
    pool.note_on(64, 0.8);
    pool.note_on(67, 0.8);
    let middle_c = sine(261.625_565, BLOCK);
    render(&mut pool, &middle_c);
    let detected = pool.current_input_frequency().expect("pitched input");
    assert!((detected - 261.63).abs() < 1.0);

    pool.set_interval_latch(true);
    pool.note_off(60);
    pool.note_off(64);
    pool.note_off(67);

    // The singer moves up a whole step; the latched intervals follow.
    let d4 = sine(293.664_768, BLOCK);
    render(&mut pool, &d4);
    assert_eq!(active_notes(&pool, false), vec![62, 66, 69]);
}

#[test]
fn stereo_width_setter_is_idempotent() {
    let mut pool = pool_f64(4);
    pool.note_on(60, 0.8);
    pool.note_on(64, 0.8);

    pool.set_stereo_width(50);
    let pans: Vec<_> = (0..4).map(|i| pool.voice_pan(i)).collect();

    pool.set_stereo_width(50);
    let pans_again: Vec<_> = (0..4).map(|i| pool.voice_pan(i)).collect();
    assert_eq!(pans, pans_again);
}

#[test]
fn pitched_input_produces_sound_for_a_held_note() {
    let mut pool = pool_f64(4);
    pool.note_on(57, 1.0); // A3: matches the input pitch
    let input = sine(220.0, BLOCK);
    let (left, right) = render(&mut pool, &input);

    let peak = left
        .iter()
        .chain(right.iter())
        .fold(0.0f64, |acc, s| acc.max(s.abs()));
    assert!(peak > 0.01, "expected audible output, peak was {peak}");
    assert!(left.iter().chain(right.iter()).all(|s| s.is_finite()));
}

#[test]
fn soft_pedal_scales_output_amplitude_only() {
    let input = sine(220.0, BLOCK);

    let mut plain = pool_f64(4);
    plain.note_on(57, 1.0);
    let (left_plain, _) = render(&mut plain, &input);
    let peak = left_plain.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
    assert!(peak > 0.01);

    let mut soft = pool_f64(4);
    soft.note_on(57, 1.0);
    let pedal = [TimedMidi::new(
        0,
        MidiEvent::ControlChange {
            channel: 0,
            controller: CC_SOFT_PEDAL,
            value: 127,
        },
    )];
    let mut left = vec![0.0; BLOCK];
    let mut right = vec![0.0; BLOCK];
    soft.render_block(&input, &pedal, &mut left, &mut right);

    // Same render, uniformly attenuated by the default soft-pedal gain;
    // envelope timing is untouched so the blocks line up sample for sample.
    for (dry, wet) in left_plain.iter().zip(left.iter()) {
        assert!(
            (wet - dry * 0.65).abs() < 1e-9,
            "soft pedal must scale amplitude: {dry} vs {wet}"
        );
    }
}

#[test]
fn unpitched_input_still_renders_and_reports_no_frequency() {
    let mut pool = pool_f64(4);
    pool.note_on(60, 1.0);
    let input = noise(BLOCK);
    let (left, right) = render(&mut pool, &input);

    assert_eq!(pool.current_input_frequency(), None);
    assert!(left.iter().chain(right.iter()).all(|s| s.is_finite()));
}

#[test]
fn silence_renders_when_no_voices_are_active() {
    let mut pool = pool_f64(4);
    let input = sine(220.0, BLOCK);
    let (left, right) = render(&mut pool, &input);
    assert!(left.iter().all(|s| *s == 0.0));
    assert!(right.iter().all(|s| *s == 0.0));
}

#[test]
fn midi_note_events_drive_the_pool_through_render() {
    let mut pool = pool_f64(4);
    let input = sine(220.0, BLOCK);
    let mut left = vec![0.0; BLOCK];
    let mut right = vec![0.0; BLOCK];

    let events = [
        TimedMidi::new(
            0,
            MidiEvent::NoteOn {
                channel: 0,
                key: 57,
                velocity: 100,
            },
        ),
        TimedMidi::new(
            4,
            MidiEvent::NoteOn {
                channel: 0,
                key: 64,
                velocity: 100,
            },
        ),
    ];
    pool.render_block(&input, &events, &mut left, &mut right);
    assert_eq!(pool.num_active_voices(), 2);

    let off = [TimedMidi::new(
        0,
        MidiEvent::NoteOff {
            channel: 0,
            key: 64,
            velocity: 0,
        },
    )];
    pool.render_block(&input, &off, &mut left, &mut right);
    assert_eq!(active_notes(&pool, false), vec![57]);
}

#[test]
fn pitch_bend_moves_voice_output_frequency() {
    let mut pool = pool_f64(4);
    let input = sine(220.0, BLOCK);
    let mut left = vec![0.0; BLOCK];
    let mut right = vec![0.0; BLOCK];

    let events = [
        TimedMidi::new(
            0,
            MidiEvent::NoteOn {
                channel: 0,
                key: 69,
                velocity: 100,
            },
        ),
        TimedMidi::new(
            0,
            MidiEvent::PitchBend {
                channel: 0,
                value: 8_191, // full bend up: +2 semitones by default
            },
        ),
    ];
    pool.render_block(&input, &events, &mut left, &mut right);

    // Output should stay finite and produce energy under bend.
    assert!(left.iter().chain(right.iter()).all(|s| s.is_finite()));
    assert_eq!(pool.num_active_voices(), 1);
}

#[test]
fn float_precision_pool_renders() {
    let config = HarmonizerConfig {
        voice_count: 4,
        ..Default::default()
    };
    let mut pool: VoicePool<f32> = VoicePool::new(config, SAMPLE_RATE).unwrap();
    pool.note_on(57, 1.0);

    let input: Vec<f32> = (0..BLOCK)
        .map(|n| (2.0 * std::f32::consts::PI * 220.0 * n as f32 / SAMPLE_RATE as f32).sin())
        .collect();
    let mut left = vec![0.0f32; BLOCK];
    let mut right = vec![0.0f32; BLOCK];
    pool.render_block(&input, &[], &mut left, &mut right);

    assert!(left.iter().chain(right.iter()).all(|s| s.is_finite()));
}
