//! Core data types for the ultrasound stream
//!
//! This module defines the values that flow through the pipeline:
//!
//! - [`PixelBuffer`] - Owned 8-bit image data with its physical pixel spacing
//! - [`InertialSample`] - One IMU reading delivered alongside a frame
//! - [`FrameRecord`] - A fully enriched frame as delivered to subscribers
//! - [`StreamState`] - Lifecycle state of a stream
//! - [`StreamStats`] - Counters describing pipeline throughput and losses

use crate::error::{Result, StreamError};
use crate::stream::geometry::FrameGeometry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Three-component vector used for inertial readings
pub type Vec3 = [f64; 3];

/// Identifier written into the device and probe metadata fields
pub const DEVICE_ID: &str = "Clarius";

/// Physical size of one pixel in millimetres
///
/// Frames are 2-D, so the third axis is always 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spacing {
    /// Lateral spacing (mm)
    pub x: f64,
    /// Axial spacing (mm)
    pub y: f64,
}

impl Spacing {
    /// Create a spacing from millimetre values
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Isotropic spacing from the device's microns-per-pixel value
    pub fn from_microns(microns_per_pixel: f64) -> Self {
        let mm = microns_per_pixel * 1e-3;
        Self { x: mm, y: mm }
    }

    /// Spacing along the (fixed) third axis
    pub fn z(&self) -> f64 {
        1.0
    }
}

impl Default for Spacing {
    fn default() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

/// Owned buffer of interleaved 8-bit samples
///
/// The length of `data` is always `width * height * channels` and never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
    spacing: Spacing,
}

impl PixelBuffer {
    /// Create a buffer, validating that the data matches the declared shape
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
        spacing: Spacing,
    ) -> Result<Self> {
        let expected = Self::expected_len(width, height, channels);
        if expected == 0 {
            return Err(StreamError::InvalidFrame(format!(
                "zero-sized image {}x{}x{}",
                width, height, channels
            )));
        }
        if data.len() != expected {
            return Err(StreamError::InvalidFrame(format!(
                "expected {} bytes for {}x{}x{}, got {}",
                expected,
                width,
                height,
                channels,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
            spacing,
        })
    }

    /// Copy a borrowed slice into a new buffer
    pub fn copy_from(
        width: u32,
        height: u32,
        channels: u8,
        data: &[u8],
        spacing: Spacing,
    ) -> Result<Self> {
        let expected = Self::expected_len(width, height, channels);
        if data.len() < expected {
            return Err(StreamError::InvalidFrame(format!(
                "buffer holds {} bytes, {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                expected
            )));
        }
        Self::new(width, height, channels, data[..expected].to_vec(), spacing)
    }

    fn expected_len(width: u32, height: u32, channels: u8) -> usize {
        width as usize * height as usize * channels as usize
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    /// Number of pixels (not bytes)
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw interleaved samples
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer and return its samples
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Physical extent of the image in millimetres (x, y)
    pub fn extent_mm(&self) -> (f64, f64) {
        (
            self.width as f64 * self.spacing.x,
            self.height as f64 * self.spacing.y,
        )
    }
}

/// A single IMU reading
///
/// Samples inside one frame keep the device's sampling order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InertialSample {
    /// Angular velocity
    pub gyro: Vec3,
    /// Linear acceleration
    pub linear_acceleration: Vec3,
    /// Magnetic field
    pub magnetic: Vec3,
    /// Device timestamp of the sample
    pub timestamp: u64,
}

/// Ultrasound acquisition metadata attached to every frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UltrasoundMetadata {
    pub device: String,
    pub probe: String,
    /// Imaging depth covered by the frame (mm)
    pub end_depth_mm: f64,
    pub focal_depth_mm: f64,
    /// Whether the image is already scan converted
    pub scan_converted: bool,
}

impl UltrasoundMetadata {
    /// Derive metadata from the physical extent of a frame
    pub fn for_image(image: &PixelBuffer) -> Self {
        let (_, end_depth_mm) = image.extent_mm();
        Self {
            device: DEVICE_ID.to_string(),
            probe: DEVICE_ID.to_string(),
            end_depth_mm,
            focal_depth_mm: end_depth_mm / 2.0,
            scan_converted: true,
        }
    }
}

/// A frame as delivered to subscribers
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Active image (replaced when grayscale conversion is enabled)
    pub image: PixelBuffer,
    /// Capture time on the device clock; only comparable within one stream
    pub device_timestamp: Duration,
    /// Local wall-clock time at which the frame was accepted
    pub arrival_timestamp: DateTime<Utc>,
    pub ultrasound: UltrasoundMetadata,
    /// Most recent detected geometry, if any
    pub geometry: Option<FrameGeometry>,
    pub inertial_samples: Vec<InertialSample>,
}

impl FrameRecord {
    /// Build a record stamped with the current wall-clock time
    pub fn new(image: PixelBuffer, device_timestamp: Duration) -> Self {
        let ultrasound = UltrasoundMetadata::for_image(&image);
        Self {
            image,
            device_timestamp,
            arrival_timestamp: Utc::now(),
            ultrasound,
            geometry: None,
            inertial_samples: Vec::new(),
        }
    }

    pub fn with_geometry(mut self, geometry: Option<FrameGeometry>) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_inertial_samples(mut self, samples: Vec<InertialSample>) -> Self {
        self.inertial_samples = samples;
        self
    }
}

/// Lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamState {
    /// Constructed, no device session
    #[default]
    Idle = 0,
    /// Device session established
    Initialized = 1,
    /// Accepting frames
    Running = 2,
    /// Session open, frames discarded
    Paused = 3,
    /// Torn down; terminal
    Closed = 4,
}

impl StreamState {
    /// Decode the value stored in the lifecycle atomic
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::Idle,
            1 => StreamState::Initialized,
            2 => StreamState::Running,
            3 => StreamState::Paused,
            _ => StreamState::Closed,
        }
    }

    /// Whether a device session is currently established
    pub fn has_session(&self) -> bool {
        matches!(
            self,
            StreamState::Initialized | StreamState::Running | StreamState::Paused
        )
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::Idle => write!(f, "Idle"),
            StreamState::Initialized => write!(f, "Initialized"),
            StreamState::Running => write!(f, "Running"),
            StreamState::Paused => write!(f, "Paused"),
            StreamState::Closed => write!(f, "Closed"),
        }
    }
}

/// A lifecycle transition, as reported to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: StreamState,
    pub to: StreamState,
}

/// Snapshot of pipeline statistics
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Frames handed to the arrival entry point
    pub frames_received: u64,
    /// Frames enqueued for processing
    pub frames_accepted: u64,
    /// Frames discarded because the stream was not running
    pub frames_dropped_inactive: u64,
    /// Frames lost to queue overflow recovery
    pub frames_dropped_overflow: u64,
    /// Number of times the queue overflowed
    pub overflow_events: u64,
    /// Frames delivered to subscribers
    pub frames_emitted: u64,
    pub conversion_failures: u64,
    pub subscriber_failures: u64,
    /// Number of times geometry detection actually ran
    pub geometry_detections: u64,
    /// Records currently waiting in the handoff queue
    pub queue_depth: usize,
    /// Emission rate over the most recent frames (Hz)
    pub emitted_fps: f64,
}

impl StreamStats {
    /// Total frames lost for any reason
    pub fn frames_lost(&self) -> u64 {
        self.frames_dropped_overflow + self.conversion_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_validates_length() {
        let err = PixelBuffer::new(4, 4, 1, vec![0; 15], Spacing::default());
        assert!(matches!(err, Err(StreamError::InvalidFrame(_))));

        let ok = PixelBuffer::new(4, 4, 4, vec![0; 64], Spacing::default()).unwrap();
        assert_eq!(ok.pixel_count(), 16);
        assert_eq!(ok.as_bytes().len(), 64);
    }

    #[test]
    fn test_pixel_buffer_rejects_zero_size() {
        let err = PixelBuffer::new(0, 10, 4, Vec::new(), Spacing::default());
        assert!(matches!(err, Err(StreamError::InvalidFrame(_))));
    }

    #[test]
    fn test_copy_from_truncates_padding() {
        let src = vec![7u8; 20];
        let buf = PixelBuffer::copy_from(2, 2, 4, &src, Spacing::default()).unwrap();
        assert_eq!(buf.as_bytes().len(), 16);

        let short = PixelBuffer::copy_from(4, 4, 4, &src, Spacing::default());
        assert!(short.is_err());
    }

    #[test]
    fn test_spacing_from_microns() {
        let s = Spacing::from_microns(250.0);
        assert!((s.x - 0.25).abs() < 1e-12);
        assert!((s.y - 0.25).abs() < 1e-12);
        assert_eq!(s.z(), 1.0);
    }

    #[test]
    fn test_ultrasound_metadata_from_extent() {
        let image = PixelBuffer::new(10, 200, 1, vec![0; 2000], Spacing::new(0.5, 0.2)).unwrap();
        let meta = UltrasoundMetadata::for_image(&image);
        assert!((meta.end_depth_mm - 40.0).abs() < 1e-9);
        assert!((meta.focal_depth_mm - 20.0).abs() < 1e-9);
        assert!(meta.scan_converted);
        assert_eq!(meta.device, DEVICE_ID);
    }

    #[test]
    fn test_state_roundtrip_through_u8() {
        for state in [
            StreamState::Idle,
            StreamState::Initialized,
            StreamState::Running,
            StreamState::Paused,
            StreamState::Closed,
        ] {
            assert_eq!(StreamState::from_u8(state as u8), state);
        }
        assert!(StreamState::Paused.has_session());
        assert!(!StreamState::Closed.has_session());
    }
}
