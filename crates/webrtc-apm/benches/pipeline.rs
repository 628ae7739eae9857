//! Benchmarks for the capture and render pipelines.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use tracing_subscriber::EnvFilter;
use webrtc_apm::{AudioProcessing, AudioProcessingBuilder, GainControlMode, StreamConfig};

fn tone(samples: usize, offset: usize) -> Vec<f32> {
    (0..samples)
        .map(|i| ((offset + i) as f32 * 0.01).sin() * 0.1)
        .collect()
}

fn make_apm(sample_rate_hz: usize, channels: usize) -> (AudioProcessing, StreamConfig) {
    // RUST_LOG=webrtc_apm=debug shows the reinitializations.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    let apm = AudioProcessingBuilder::new().build().unwrap();
    apm.echo_cancellation().enable(true).unwrap();
    apm.noise_suppression().enable(true).unwrap();
    apm.gain_control().set_mode(GainControlMode::AdaptiveDigital);
    apm.gain_control().enable(true).unwrap();
    apm.high_pass_filter().enable(true).unwrap();
    apm.voice_detection().enable(true).unwrap();
    let stream = StreamConfig::new(sample_rate_hz, channels);

    // Warm up so the adaptive stages run in steady state.
    let src_data = tone(stream.num_frames(), 0);
    let src: Vec<&[f32]> = vec![src_data.as_slice(); channels];
    let mut dst_data = vec![vec![0.0f32; stream.num_frames()]; channels];
    for _ in 0..20 {
        let mut dst: Vec<&mut [f32]> = dst_data.iter_mut().map(Vec::as_mut_slice).collect();
        apm.process_reverse_stream_f32(&src, &stream, &stream, &mut dst)
            .unwrap();
        apm.set_stream_delay_ms(20).unwrap();
        apm.process_stream_f32(&src, &stream, &stream, &mut dst)
            .unwrap();
    }
    (apm, stream)
}

fn bench_process_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_stream");

    for (name, rate, channels) in [
        ("16k_mono", 16000, 1),
        ("32k_mono", 32000, 1),
        ("48k_mono", 48000, 1),
        ("48k_stereo", 48000, 2),
    ] {
        let (apm, stream) = make_apm(rate, channels);
        let src_data = tone(stream.num_frames(), 7);
        let src: Vec<&[f32]> = vec![src_data.as_slice(); channels];
        let mut dst_data = vec![vec![0.0f32; stream.num_frames()]; channels];

        group.bench_function(name, |b| {
            b.iter(|| {
                let mut dst: Vec<&mut [f32]> = dst_data.iter_mut().map(Vec::as_mut_slice).collect();
                apm.set_stream_delay_ms(20).unwrap();
                apm.process_stream_f32(black_box(&src), &stream, &stream, &mut dst)
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_render_and_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_and_capture");
    let (apm, stream) = make_apm(48000, 1);
    let far = tone(stream.num_frames(), 3);
    let near = tone(stream.num_frames(), 11);
    let mut out = vec![0.0f32; stream.num_frames()];

    group.bench_function("48k_mono", |b| {
        b.iter(|| {
            apm.process_reverse_stream_f32(&[far.as_slice()], &stream, &stream, &mut [out.as_mut_slice()])
                .unwrap();
            apm.set_stream_delay_ms(20).unwrap();
            apm.process_stream_f32(black_box(&[near.as_slice()]), &stream, &stream, &mut [out.as_mut_slice()])
                .unwrap();
        });
    });

    group.finish();
}

fn bench_disabled(c: &mut Criterion) {
    let apm = AudioProcessing::new();
    let stream = StreamConfig::new(48000, 1);
    let src = tone(stream.num_frames(), 0);
    let mut dst = vec![0.0f32; stream.num_frames()];

    c.bench_function("pass_through_48k_mono", |b| {
        b.iter(|| {
            apm.process_stream_f32(black_box(&[src.as_slice()]), &stream, &stream, &mut [dst.as_mut_slice()])
                .unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_process_stream,
    bench_render_and_capture,
    bench_disabled
);
criterion_main!(benches);
