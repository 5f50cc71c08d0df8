//! Benchmarks for the analysis stages and the full render path.
//!
//! Run with: cargo bench
//!
//! The full-pool renders are the numbers that matter for real-time use:
//! a 512-sample block at 44.1kHz gives an 11.6ms deadline, and the whole
//! engine (detection, grain extraction, every voice) has to fit inside it.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use harmonizer_dsp::dsp::grains::GrainOnsetExtractor;
use harmonizer_dsp::dsp::pitch::PeriodicityEstimator;
use harmonizer_dsp::synth::{HarmonizerConfig, VoicePool};

/// Common audio callback sizes.
const BLOCK_SIZES: &[usize] = &[128, 256, 512, 1024];

const SAMPLE_RATE: f64 = 44_100.0;

fn sine(freq: f64, len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| (2.0 * std::f64::consts::PI * freq * n as f64 / SAMPLE_RATE).sin() as f32)
        .collect()
}

fn bench_pitch_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("analysis/pitch");

    for &size in BLOCK_SIZES {
        let input = sine(220.0, size);
        let mut estimator = PeriodicityEstimator::<f32>::new(40.0, 2_000.0, SAMPLE_RATE);

        group.bench_with_input(BenchmarkId::new("detect", size), &size, |b, _| {
            b.iter(|| estimator.detect(black_box(&input)))
        });
    }

    group.finish();
}

fn bench_grain_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("analysis/grains");
    let period = 200;

    for &size in BLOCK_SIZES {
        let input = sine(220.0, size);
        let mut extractor = GrainOnsetExtractor::with_capacity(size);
        let mut onsets = Vec::with_capacity(size);

        group.bench_with_input(BenchmarkId::new("extract", size), &size, |b, _| {
            b.iter(|| {
                extractor.extract(black_box(&input), black_box(period), &mut onsets);
                black_box(&onsets);
            })
        });
    }

    group.finish();
}

fn bench_pool_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/render");

    for &voices in &[1usize, 4, 12] {
        let config = HarmonizerConfig {
            voice_count: voices,
            ..Default::default()
        };
        let mut pool: VoicePool<f32> = VoicePool::new(config, SAMPLE_RATE).unwrap();

        // A held triad (truncated to the voice count) over a pitched input.
        for (i, note) in [57u8, 61, 64].iter().enumerate() {
            if i < voices {
                pool.note_on(*note, 0.9);
            }
        }

        let input = sine(220.0, 512);
        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];

        group.bench_with_input(
            BenchmarkId::new("voices", voices),
            &voices,
            |b, _| {
                b.iter(|| {
                    pool.render_block(
                        black_box(&input),
                        &[],
                        black_box(&mut left),
                        black_box(&mut right),
                    );
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_pitch_detection,
    bench_grain_extraction,
    bench_pool_render,
);
criterion_main!(benches);
