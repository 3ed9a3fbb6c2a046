use super::mic::{
    append_downmixed_samples, downsampling_tap_count, low_pass_fir, resample_linear,
    resample_to_target_rate, FrameAssembler,
};
use super::{AudioClip, ListenOptions, TARGET_RATE};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn clip_duration_matches_sample_count() {
    let clip = AudioClip {
        samples: vec![0.0; TARGET_RATE as usize],
        sample_rate: TARGET_RATE,
    };
    assert_eq!(clip.duration(), Duration::from_secs(1));
}

#[test]
fn clip_duration_zero_rate_is_zero() {
    let clip = AudioClip {
        samples: vec![0.0; 100],
        sample_rate: 0,
    };
    assert_eq!(clip.duration(), Duration::ZERO);
}

#[test]
fn listen_options_builder_sets_onset() {
    let onset = || {};
    let options =
        ListenOptions::new(Duration::from_millis(500), Duration::from_secs(3)).with_onset(&onset);
    assert!(options.on_speech_start.is_some());
}

#[test]
fn downmix_averages_stereo_pairs() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[1.0f32, 0.0, 0.5, 0.5], 2, |s| s);
    assert_eq!(buf, vec![0.5, 0.5]);
}

#[test]
fn downmix_mono_passes_through() {
    let mut buf = Vec::new();
    append_downmixed_samples(&mut buf, &[1i16, -1], 1, |s| s as f32);
    assert_eq!(buf.len(), 2);
}

#[test]
fn assembler_emits_fixed_size_frames() {
    let (tx, rx) = bounded(8);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut assembler = FrameAssembler::new(4, tx, dropped.clone());

    assembler.push(&[0.1f32; 10], 1, |s| s);
    let first = rx.try_recv().expect("first frame");
    let second = rx.try_recv().expect("second frame");
    assert_eq!(first.len(), 4);
    assert_eq!(second.len(), 4);
    // Two samples remain pending until the next callback.
    assert!(rx.try_recv().is_err());
    assert_eq!(dropped.load(Ordering::Relaxed), 0);
}

#[test]
fn assembler_counts_dropped_frames_when_channel_full() {
    let (tx, rx) = bounded(1);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut assembler = FrameAssembler::new(2, tx, dropped.clone());

    assembler.push(&[0.0f32; 8], 1, |s| s);
    assert!(dropped.load(Ordering::Relaxed) > 0);
    drop(rx);
}

#[test]
fn resample_identity_at_target_rate() {
    let input = vec![0.25f32; 160];
    let output = resample_to_target_rate(&input, TARGET_RATE);
    assert_eq!(output, input);
}

#[test]
fn resample_halves_48k_to_16k() {
    let input = vec![0.1f32; 4800];
    let output = resample_to_target_rate(&input, 48_000);
    let expected = 4800 / 3;
    assert!((output.len() as i64 - expected as i64).abs() <= 1);
}

#[test]
fn resample_upsamples_8k_to_16k() {
    let input = vec![0.1f32; 800];
    let output = resample_to_target_rate(&input, 8_000);
    assert!((output.len() as i64 - 1600).abs() <= 1);
}

#[test]
fn resample_linear_preserves_constant_signal() {
    let input = vec![0.5f32; 100];
    let output = resample_linear(&input, 2.0);
    assert!(output.iter().all(|s| (s - 0.5).abs() < 1e-5));
}

#[test]
fn tap_count_is_odd_and_bounded() {
    for rate in [22_050u32, 44_100, 48_000, 96_000] {
        let taps = downsampling_tap_count(rate);
        assert_eq!(taps % 2, 1, "taps must be odd for {rate}");
        assert!(taps <= 129);
    }
}

#[test]
fn low_pass_preserves_dc() {
    let input = vec![1.0f32; 256];
    let output = low_pass_fir(&input, 48_000, 13);
    // Away from the edges the DC level should survive the filter.
    for sample in &output[13..output.len() - 13] {
        assert!((sample - 1.0).abs() < 0.01);
    }
}
