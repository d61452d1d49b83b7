//! Audio pipeline integration tests
//!
//! Exercises codec, capture and scheduling against fake devices

use live_voice::audio::{CaptureConfig, INPUT_MIME_TYPE, decode_fragment, encode_frame};
use live_voice::voice::{CapturePipeline, InterruptionHandler, PlaybackScheduler};
use live_voice::Error;

mod common;

use common::{FakeBackend, approx, fragment, odd_fragment};

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss)]
fn generate_sine_samples(frequency: f32, len: usize, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

fn attached_scheduler(backend: &FakeBackend) -> PlaybackScheduler {
    let (output, _ended) = backend.speaker();
    let mut scheduler = PlaybackScheduler::new();
    scheduler.attach(output);
    scheduler
}

#[test]
fn test_encode_decode_within_one_step() {
    let samples = generate_sine_samples(440.0, 4096, 16000, 0.9);
    let blob = encode_frame(&samples);
    assert_eq!(blob.mime_type, INPUT_MIME_TYPE);

    let decoded = decode_fragment(&blob.data, 16000).unwrap();
    assert_eq!(decoded.samples.len(), samples.len());
    for (original, restored) in samples.iter().zip(&decoded.samples) {
        assert!(
            (original - restored).abs() <= 1.0 / 32768.0 + f32::EPSILON,
            "{original} -> {restored}"
        );
    }
}

#[test]
fn test_encode_clamps_out_of_range() {
    let blob = encode_frame(&[2.0, -2.0]);
    let decoded = decode_fragment(&blob.data, 16000).unwrap();
    assert!((decoded.samples[0] - 32767.0 / 32768.0).abs() < f32::EPSILON);
    assert!((decoded.samples[1] + 1.0).abs() < f32::EPSILON);
}

#[test]
fn test_fragments_play_gaplessly() {
    let backend = FakeBackend::new();
    let mut scheduler = attached_scheduler(&backend);

    let durations = [0.5, 0.125, 0.75, 0.25];
    for seconds in durations {
        scheduler.schedule(&fragment(seconds)).unwrap();
    }

    let started = backend.started();
    assert_eq!(started.len(), durations.len());
    let mut expected = 0.0;
    for (source, seconds) in started.iter().zip(durations) {
        assert!(approx(source.start, expected), "start {} != {expected}", source.start);
        assert!(approx(source.duration, seconds));
        expected += seconds;
    }
    assert!(approx(scheduler.cursor(), expected));
}

#[test]
fn test_fragment_after_underrun_starts_now() {
    let backend = FakeBackend::new();
    let mut scheduler = attached_scheduler(&backend);

    scheduler.schedule(&fragment(0.5)).unwrap();
    backend.set_now(3.0);
    let late = scheduler.schedule(&fragment(0.5)).unwrap().unwrap();
    let next = scheduler.schedule(&fragment(0.5)).unwrap().unwrap();

    assert!(approx(late.start, 3.0));
    assert!(approx(next.start, 3.5));
}

#[test]
fn test_interruption_restarts_at_current_time() {
    let backend = FakeBackend::new();
    let mut scheduler = attached_scheduler(&backend);
    let mut barge_in = InterruptionHandler::new();

    scheduler.schedule(&fragment(1.0)).unwrap();
    scheduler.schedule(&fragment(1.0)).unwrap();
    backend.set_now(0.4);

    assert_eq!(barge_in.interrupt(&mut scheduler), 2);
    assert_eq!(backend.sounding(), 0);
    assert_eq!(backend.stopped().len(), 2);
    assert!(approx(scheduler.cursor(), 0.0));

    let next = scheduler.schedule(&fragment(0.5)).unwrap().unwrap();
    assert!(approx(next.start, 0.4));
    assert_eq!(barge_in.count(), 1);
}

#[test]
fn test_odd_fragment_is_skipped() {
    let backend = FakeBackend::new();
    let mut scheduler = attached_scheduler(&backend);

    scheduler.schedule(&fragment(0.25)).unwrap();
    let err = scheduler.schedule(&odd_fragment()).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));

    let next = scheduler.schedule(&fragment(0.25)).unwrap().unwrap();
    assert!(approx(next.start, 0.25));
    assert_eq!(backend.started().len(), 2);
}

#[test]
fn test_scheduler_reports_drain() {
    let backend = FakeBackend::new();
    let mut scheduler = attached_scheduler(&backend);

    let a = scheduler.schedule(&fragment(0.1)).unwrap().unwrap();
    let b = scheduler.schedule(&fragment(0.1)).unwrap().unwrap();

    assert!(!scheduler.on_source_ended(a.id));
    assert!(scheduler.is_playing());
    assert!(scheduler.on_source_ended(b.id));
    assert!(!scheduler.is_playing());
}

#[tokio::test]
async fn test_capture_frames_arrive_in_order() {
    let backend = FakeBackend::new();
    let mut capture = CapturePipeline::start(&backend, &CaptureConfig::default()).unwrap();

    let first = generate_sine_samples(220.0, 4096, 16000, 0.5);
    let second = generate_sine_samples(880.0, 4096, 16000, 0.5);
    assert!(backend.capture(&first));
    assert!(backend.capture(&second));

    assert_eq!(capture.next_blob().await.unwrap(), encode_frame(&first));
    assert_eq!(capture.next_blob().await.unwrap(), encode_frame(&second));

    capture.stop();
    capture.stop();
    assert_eq!(backend.input_stops(), 1);
    assert!(!backend.capture(&first));
    assert!(capture.next_blob().await.is_none());
}

#[test]
fn test_capture_denied() {
    let backend = FakeBackend::denying_mic();
    let result = CapturePipeline::start(&backend, &CaptureConfig::default());
    assert!(matches!(result, Err(Error::MicrophoneAccess(_))));
}

#[test]
fn test_next_blob_waits_for_audio() {
    let backend = FakeBackend::new();
    let mut capture = CapturePipeline::start(&backend, &CaptureConfig::default()).unwrap();

    let mut next = tokio_test::task::spawn(capture.next_blob());
    tokio_test::assert_pending!(next.poll());

    assert!(backend.capture(&[0.1; 32]));
    assert!(next.is_woken());
    let blob = tokio_test::assert_ready!(next.poll());
    assert_eq!(blob, Some(encode_frame(&[0.1; 32])));
}
