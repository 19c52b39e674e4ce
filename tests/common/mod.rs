//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::time::Duration;
use ultrasound_stream::StreamConfig;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Upper bound when waiting for frames to come out of the worker
pub fn frame_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Config pointing at a fake address with a fast shutdown poll
pub fn test_config() -> StreamConfig {
    let mut config = StreamConfig::with_address("192.168.1.1", 35583);
    config.shutdown.poll_interval_ms = 10;
    config.shutdown.max_attempts = 100;
    config
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
