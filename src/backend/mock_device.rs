//! Mock Device Implementation for Testing
//!
//! This module provides a mock ultrasound device that can be used for
//! testing the stream without real hardware. It records every command it
//! receives and can inject device callbacks (images, freeze, buttons,
//! measurements) on demand or from a background generator thread.
//!
//! # Image Patterns
//!
//! - [`MockImagePattern::Constant`] - Every B-mode sample has the same value
//! - [`MockImagePattern::Gradient`] - Axial ramp that scrolls with the frame index
//! - [`MockImagePattern::Speckle`] - Pseudo-random speckle
//!
//! Generated frames have four channels. The last one is the validity mask,
//! shaped by [`MockMaskShape`]; it does not change between frames unless the
//! shape is changed, so the stream's geometry cache sees a stable mask.
//!
//! # Example
//!
//! ```ignore
//! use ultrasound_stream::backend::mock_device::MockDevice;
//!
//! let device = MockDevice::new();
//! let handle = device.handle();
//! let stream = UltrasoundStream::new(config, Box::new(device))?;
//! stream.open()?;
//! stream.start()?;
//!
//! handle.push_synthetic(640, 480, 0);
//! ```
//!
//! # Enabling
//!
//! The mock device is only available when the `mock-device` feature is enabled:
//!
//! ```bash
//! cargo run --features mock-device
//! ```

use crate::config::Resolution;
use crate::error::{Result, StreamError};
use crate::types::InertialSample;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::device_trait::{DeviceApi, DeviceEvents, RawImage};

/// Pixel size reported with synthetic frames
pub const MOCK_MICRONS_PER_PIXEL: f64 = 200.0;

/// Channels in a synthetic frame (B, G, R, mask)
pub const MOCK_CHANNELS: u8 = 4;

/// Pattern for the B-mode part of synthetic frames
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MockImagePattern {
    Constant(u8),
    #[default]
    Gradient,
    Speckle,
}

/// Shape of the validity mask in synthetic frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMaskShape {
    /// Every pixel valid
    Full,
    /// Valid rectangle inset by the given number of pixels on each side
    Inset(u32),
    /// No valid pixels (geometry detection fails)
    Empty,
}

impl Default for MockMaskShape {
    fn default() -> Self {
        MockMaskShape::Inset(8)
    }
}

/// A command received by the mock, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    InitializeSession,
    Connect { address: String, port: u16 },
    Disconnect,
    DestroySession,
    StartAcquisition,
    SetGain(f64),
    SetDepth(f64),
    SetResolution(Resolution),
}

#[derive(Default)]
struct MockState {
    events: Option<Arc<dyn DeviceEvents>>,
    connected: bool,
    acquiring: bool,
    calls: Vec<DeviceCall>,
    fail_init: Option<String>,
    fail_connect: Option<String>,
    fail_parameters: bool,
    pattern: MockImagePattern,
    mask: MockMaskShape,
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable stand-in for a networked ultrasound device
pub struct MockDevice {
    state: SharedState,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Make `initialize_session` fail with the given message
    pub fn with_init_failure(self, message: impl Into<String>) -> Self {
        lock(&self.state).fail_init = Some(message.into());
        self
    }

    /// Make `connect` fail with the given message
    pub fn with_connect_failure(self, message: impl Into<String>) -> Self {
        lock(&self.state).fail_connect = Some(message.into());
        self
    }

    /// Make gain/depth/resolution requests fail
    pub fn with_parameter_failures(self) -> Self {
        lock(&self.state).fail_parameters = true;
        self
    }

    pub fn with_pattern(self, pattern: MockImagePattern) -> Self {
        lock(&self.state).pattern = pattern;
        self
    }

    pub fn with_mask(self, mask: MockMaskShape) -> Self {
        lock(&self.state).mask = mask;
        self
    }

    /// Handle for driving callbacks and inspecting calls after the device
    /// has been moved into a stream
    pub fn handle(&self) -> MockDeviceHandle {
        MockDeviceHandle {
            state: self.state.clone(),
        }
    }

    fn record(&self, call: DeviceCall) -> std::sync::MutexGuard<'_, MockState> {
        let mut state = lock(&self.state);
        tracing::debug!("MockDevice: {:?}", call);
        state.calls.push(call);
        state
    }
}

impl DeviceApi for MockDevice {
    fn initialize_session(&mut self, events: Arc<dyn DeviceEvents>) -> Result<()> {
        let mut state = self.record(DeviceCall::InitializeSession);
        if let Some(message) = state.fail_init.clone() {
            return Err(StreamError::SessionInit(message));
        }
        state.events = Some(events);
        Ok(())
    }

    fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        let mut state = self.record(DeviceCall::Connect {
            address: address.to_string(),
            port,
        });
        if let Some(message) = state.fail_connect.clone() {
            return Err(StreamError::Connection {
                address: address.to_string(),
                port,
                message,
            });
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut state = self.record(DeviceCall::Disconnect);
        state.connected = false;
        state.acquiring = false;
        Ok(())
    }

    fn destroy_session(&mut self) {
        let mut state = self.record(DeviceCall::DestroySession);
        state.events = None;
        state.connected = false;
        state.acquiring = false;
    }

    fn start_acquisition(&mut self) -> Result<()> {
        let mut state = self.record(DeviceCall::StartAcquisition);
        if !state.connected {
            return Err(StreamError::Device("not connected".to_string()));
        }
        state.acquiring = true;
        Ok(())
    }

    fn set_gain(&mut self, gain_percent: f64) -> Result<()> {
        self.parameter(DeviceCall::SetGain(gain_percent))
    }

    fn set_depth(&mut self, depth_mm: f64) -> Result<()> {
        self.parameter(DeviceCall::SetDepth(depth_mm))
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<()> {
        self.parameter(DeviceCall::SetResolution(resolution))
    }
}

impl MockDevice {
    fn parameter(&mut self, call: DeviceCall) -> Result<()> {
        let description = format!("{:?}", call);
        let state = self.record(call);
        if state.fail_parameters {
            return Err(StreamError::Device(format!("{} rejected", description)));
        }
        Ok(())
    }
}

/// Cloneable handle onto a [`MockDevice`]
///
/// Callbacks are invoked on the calling thread, the way a device library
/// invokes them on its own threads.
#[derive(Clone)]
pub struct MockDeviceHandle {
    state: SharedState,
}

impl MockDeviceHandle {
    /// Commands received so far
    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn is_acquiring(&self) -> bool {
        lock(&self.state).acquiring
    }

    /// Whether a session (callback sink) is registered
    pub fn has_session(&self) -> bool {
        lock(&self.state).events.is_some()
    }

    pub fn set_mask(&self, mask: MockMaskShape) {
        lock(&self.state).mask = mask;
    }

    // The sink is cloned out so callbacks never run under the mock's lock.
    fn events(&self) -> Option<Arc<dyn DeviceEvents>> {
        lock(&self.state).events.clone()
    }

    /// Deliver an image callback; returns false without a session
    pub fn push_frame(&self, image: RawImage<'_>, timestamp_ns: u64, inertial: &[InertialSample]) -> bool {
        match self.events() {
            Some(events) => {
                events.on_image(image, timestamp_ns, inertial);
                true
            }
            None => false,
        }
    }

    /// Generate and deliver a synthetic frame
    pub fn push_synthetic(&self, width: u32, height: u32, frame_index: u64) -> bool {
        let (pattern, mask) = {
            let state = lock(&self.state);
            (state.pattern, state.mask)
        };
        let data = synthetic_frame(width, height, frame_index, pattern, mask);
        let image = RawImage::new(width, height, MOCK_CHANNELS, &data, MOCK_MICRONS_PER_PIXEL);
        let inertial = [synthetic_inertial(frame_index)];
        self.push_frame(image, frame_index * 33_333_333, &inertial)
    }

    /// Simulate the operator freezing or unfreezing the device
    pub fn freeze(&self, frozen: bool) -> bool {
        self.events().map(|e| e.on_freeze(frozen)).is_some()
    }

    pub fn press_button(&self, button: i32, clicks: i32) -> bool {
        self.events().map(|e| e.on_button(button, clicks)).is_some()
    }

    pub fn report_measurement(&self, depth_mm: f64, width_mm: f64) -> bool {
        self.events()
            .map(|e| e.on_measurement(depth_mm, width_mm))
            .is_some()
    }

    /// Start a thread that delivers synthetic frames at `fps` while the
    /// device is acquiring
    pub fn spawn_generator(&self, fps: f64, resolution: Resolution) -> Result<FrameGenerator> {
        let handle = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let period = Duration::from_secs_f64(1.0 / fps.max(1.0));

        let thread = std::thread::Builder::new()
            .name("mock-device-generator".to_string())
            .spawn(move || {
                let mut frame_index = 0u64;
                while !thread_stop.load(Ordering::Relaxed) {
                    let tick = Instant::now();
                    if handle.is_acquiring() {
                        handle.push_synthetic(resolution.width, resolution.height, frame_index);
                        frame_index += 1;
                    }
                    std::thread::sleep(period.saturating_sub(tick.elapsed()));
                }
                tracing::debug!("Mock generator stopped after {} frames", frame_index);
            })?;

        Ok(FrameGenerator {
            stop,
            thread: Some(thread),
        })
    }
}

/// Background synthetic frame source; stops when dropped
pub struct FrameGenerator {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FrameGenerator {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FrameGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build a four-channel synthetic frame
pub fn synthetic_frame(
    width: u32,
    height: u32,
    frame_index: u64,
    pattern: MockImagePattern,
    mask: MockMaskShape,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(width as usize * height as usize * MOCK_CHANNELS as usize);
    let mut seed = frame_index.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407) | 1;

    for y in 0..height {
        for x in 0..width {
            let valid = match mask {
                MockMaskShape::Full => true,
                MockMaskShape::Empty => false,
                MockMaskShape::Inset(inset) => {
                    x >= inset
                        && y >= inset
                        && x + inset < width
                        && y + inset < height
                }
            };
            let value = if !valid {
                0
            } else {
                match pattern {
                    MockImagePattern::Constant(v) => v,
                    MockImagePattern::Gradient => {
                        ((y as u64 * 255 / height.max(1) as u64 + frame_index) % 256) as u8
                    }
                    MockImagePattern::Speckle => {
                        seed ^= seed << 13;
                        seed ^= seed >> 7;
                        seed ^= seed << 17;
                        (seed >> 56) as u8
                    }
                }
            };
            data.extend_from_slice(&[value, value, value, if valid { 255 } else { 0 }]);
        }
    }
    data
}

fn synthetic_inertial(frame_index: u64) -> InertialSample {
    let t = frame_index as f64 * 0.033;
    InertialSample {
        gyro: [0.01 * t.sin(), 0.0, 0.01 * t.cos()],
        linear_acceleration: [0.0, 0.0, 9.81],
        magnetic: [0.2, 0.0, 0.4],
        timestamp: frame_index * 33_333_333,
    }
}
