//! Integration tests for the frame pipeline
//!
//! These tests drive frames through the arrival entry point and check what
//! subscribers observe:
//! - Geometry detection memoization
//! - Ordering of frames and inertial samples
//! - Overflow recovery and configuration changes under load

mod common;

use common::builders::{inertial_batch, FrameBuilder};
use common::mock_helpers::{CountingDetector, RecordingSubscriber, ScriptedDevice};
use common::{assert_float_eq, frame_timeout, test_config};
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ultrasound_stream::{
    ArrivalOutcome, ChannelSubscriber, FrameGeometry, StreamConfig, StreamState, UltrasoundStream,
};

fn running(config: StreamConfig, detector: CountingDetector) -> UltrasoundStream {
    let (device, _handle) = ScriptedDevice::new();
    let stream = UltrasoundStream::with_detector(config, Box::new(device), detector).unwrap();
    stream.open().unwrap();
    stream.start().unwrap();
    stream
}

fn wait_for(recorder: &RecordingSubscriber, count: usize) {
    let deadline = Instant::now() + frame_timeout();
    while recorder.len() < count && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
#[serial]
fn test_end_to_end_geometry_memoization() {
    let detector = CountingDetector::default();
    let stream = running(test_config(), detector.clone());
    let (subscriber, events) = ChannelSubscriber::new("e2e", 16);
    stream.subscribe(subscriber);

    let frame = FrameBuilder::new(640, 480).valid_rect(40, 0, 600, 480).build();
    for ts in 1..=3u64 {
        assert_eq!(
            stream.on_frame_arrived(frame.raw(), ts * 1_000_000, &[]),
            ArrivalOutcome::Accepted
        );
    }

    let frames = events.collect_frames(3, frame_timeout());
    assert_eq!(frames.len(), 3);
    assert_eq!(detector.calls(), 1);
    let order: Vec<u128> = frames.iter().map(|f| f.device_timestamp.as_millis()).collect();
    assert_eq!(order, vec![1, 2, 3]);
    let expected = FrameGeometry::Linear {
        left: 40.0,
        right: 600.0,
        top: 0.0,
        bottom: 480.0,
    };
    assert!(frames.iter().all(|f| f.geometry.as_ref() == Some(&expected)));

    let changed = FrameBuilder::new(640, 480).valid_rect(40, 0, 599, 480).build();
    stream.on_frame_arrived(changed.raw(), 4_000_000, &[]);
    let frames = events.collect_frames(1, frame_timeout());
    assert_eq!(frames.len(), 1);
    assert_eq!(detector.calls(), 2);
    assert_eq!(stream.stats().geometry_detections, 2);
}

#[test]
#[serial]
fn test_undetectable_mask_is_not_retried() {
    let detector = CountingDetector::default();
    let stream = running(test_config(), detector.clone());
    let recorder = Arc::new(RecordingSubscriber::default());
    stream.subscribe(recorder.clone());

    let blank = FrameBuilder::new(32, 32).no_valid_pixels().build();
    for ts in 0..5 {
        stream.on_frame_arrived(blank.raw(), ts, &[]);
    }
    wait_for(&recorder, 5);

    assert_eq!(detector.calls(), 1);
    assert!(recorder.frames().iter().all(|f| f.geometry.is_none()));
}

#[test]
#[serial]
fn test_frames_and_inertial_samples_keep_order() {
    let stream = running(test_config(), CountingDetector::default());
    let recorder = Arc::new(RecordingSubscriber::default());
    stream.subscribe(recorder.clone());

    let frame = FrameBuilder::new(16, 16).microns_per_pixel(500.0).build();
    let mut accepted = 0;
    for i in 0..40u64 {
        let imu = inertial_batch(i * 10, 3);
        if stream.on_frame_arrived(frame.raw(), i, &imu) == ArrivalOutcome::Accepted {
            accepted += 1;
        }
        if i % 8 == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    wait_for(&recorder, accepted);

    let frames = recorder.frames();
    assert_eq!(frames.len(), accepted);
    let stamps: Vec<Duration> = frames.iter().map(|f| f.device_timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]), "frames reordered");
    for f in &frames {
        let imu: Vec<u64> = f.inertial_samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(imu.len(), 3);
        assert!(imu.windows(2).all(|w| w[1] == w[0] + 1));
        assert_float_eq(f.image.spacing().x, 0.5, 1e-12);
        assert_float_eq(f.ultrasound.end_depth_mm, 8.0, 1e-9);
    }
}

#[test]
#[serial]
fn test_empty_inertial_batch_stays_empty() {
    let stream = running(test_config(), CountingDetector::default());
    let recorder = Arc::new(RecordingSubscriber::default());
    stream.subscribe(recorder.clone());

    let frame = FrameBuilder::new(8, 8).build();
    stream.on_frame_arrived(frame.raw(), 0, &[]);
    wait_for(&recorder, 1);
    assert!(recorder.frames()[0].inertial_samples.is_empty());
}

#[test]
#[serial]
fn test_paused_frames_never_reach_subscribers() {
    let stream = running(test_config(), CountingDetector::default());
    let recorder = Arc::new(RecordingSubscriber::default());
    stream.subscribe(recorder.clone());
    let frame = FrameBuilder::new(8, 8).build();

    stream.pause().unwrap();
    for ts in 0..10 {
        assert_eq!(
            stream.on_frame_arrived(frame.raw(), ts, &[]),
            ArrivalOutcome::DroppedInactive
        );
    }
    stream.resume().unwrap();
    stream.on_frame_arrived(frame.raw(), 10, &[]);
    wait_for(&recorder, 1);
    std::thread::sleep(Duration::from_millis(20));

    let frames = recorder.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].device_timestamp, Duration::from_nanos(10));
    assert_eq!(stream.stats().frames_dropped_inactive, 10);
}

#[test]
#[serial]
fn test_configure_during_streaming_never_tears_frames() {
    let stream = Arc::new(running(test_config(), CountingDetector::default()));
    let recorder = Arc::new(RecordingSubscriber::default());
    stream.subscribe(recorder.clone());

    let producer = {
        let stream = stream.clone();
        std::thread::spawn(move || {
            let frame = FrameBuilder::new(12, 12).build();
            let mut accepted = 0;
            for ts in 0..200u64 {
                if stream.on_frame_arrived(frame.raw(), ts, &[]) == ArrivalOutcome::Accepted {
                    accepted += 1;
                }
                if ts % 20 == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            accepted
        })
    };

    for i in 0..20 {
        let mut config = stream.config();
        config.convert_to_gray = i % 2 == 0;
        stream.configure(config).unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }
    let accepted = producer.join().unwrap();
    wait_for(&recorder, accepted);

    for frame in recorder.frames() {
        let channels = frame.image.channels() as usize;
        assert!(channels == 1 || channels == 4);
        assert_eq!(frame.image.as_bytes().len(), 144 * channels);
    }
    assert_eq!(stream.state(), StreamState::Running);
}

#[test]
#[serial]
fn test_stats_account_for_every_frame() {
    let mut config = test_config();
    config.queue_capacity = 2;
    let stream = running(config, CountingDetector::default());
    let frame = FrameBuilder::new(64, 64).build();

    for ts in 0..100 {
        stream.on_frame_arrived(frame.raw(), ts, &[]);
    }
    stream.close().unwrap();

    let stats = stream.stats();
    assert_eq!(stats.frames_received, 100);
    assert_eq!(stats.frames_accepted + stats.overflow_events, 100);
    assert_eq!(stats.queue_depth, 0);
    assert!(stats.frames_emitted <= stats.frames_accepted);
}

#[test]
#[serial]
#[cfg(feature = "mock-device")]
fn test_mock_device_generator_streams_frames() {
    use common::mock_helpers::create_test_mock_device;
    use ultrasound_stream::Resolution;

    let device = create_test_mock_device();
    let handle = device.handle();
    let stream = UltrasoundStream::connect(test_config(), Box::new(device)).unwrap();
    let recorder = Arc::new(RecordingSubscriber::default());
    stream.subscribe(recorder.clone());
    stream.start().unwrap();

    let mut generator = handle.spawn_generator(100.0, Resolution::new(64, 48)).unwrap();
    wait_for(&recorder, 5);
    generator.stop();
    stream.close().unwrap();

    assert!(recorder.len() >= 5);
    assert!(recorder.frames().iter().all(|f| f.geometry.is_some()));
    assert_eq!(stream.stats().geometry_detections, 1);
}
