//! Mock construction helpers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use ultrasound_stream::stream::ValidityMask;
use ultrasound_stream::{
    DeviceApi, DeviceEvents, ExtentDetector, FrameGeometry, FrameRecord, GeometryDetector,
    Resolution, Result, StreamError, StreamSubscriber,
};

#[cfg(feature = "mock-device")]
use ultrasound_stream::backend::{MockDevice, MockImagePattern, MockMaskShape};

#[derive(Default)]
struct ScriptedState {
    events: Option<Arc<dyn DeviceEvents>>,
    calls: Vec<String>,
    connect_failures: usize,
}

/// Minimal [`DeviceApi`] that logs calls and can fail its next connects
pub struct ScriptedDevice {
    state: Arc<Mutex<ScriptedState>>,
}

/// Test-side view of a [`ScriptedDevice`]
#[derive(Clone)]
pub struct ScriptedHandle {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedDevice {
    pub fn new() -> (Self, ScriptedHandle) {
        let state = Arc::new(Mutex::new(ScriptedState::default()));
        (
            Self {
                state: state.clone(),
            },
            ScriptedHandle { state },
        )
    }

    fn log(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }
}

impl DeviceApi for ScriptedDevice {
    fn initialize_session(&mut self, events: Arc<dyn DeviceEvents>) -> Result<()> {
        self.log("initialize_session");
        self.state.lock().unwrap().events = Some(events);
        Ok(())
    }

    fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        self.log(format!("connect {}:{}", address, port));
        let mut state = self.state.lock().unwrap();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(StreamError::Connection {
                address: address.to_string(),
                port,
                message: "host unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.log("disconnect");
        Ok(())
    }

    fn destroy_session(&mut self) {
        self.log("destroy_session");
        self.state.lock().unwrap().events = None;
    }

    fn start_acquisition(&mut self) -> Result<()> {
        self.log("start_acquisition");
        Ok(())
    }

    fn set_gain(&mut self, gain_percent: f64) -> Result<()> {
        self.log(format!("set_gain {}", gain_percent));
        Ok(())
    }

    fn set_depth(&mut self, depth_mm: f64) -> Result<()> {
        self.log(format!("set_depth {}", depth_mm));
        Ok(())
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<()> {
        self.log(format!("set_resolution {}", resolution));
        Ok(())
    }
}

impl ScriptedHandle {
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().unwrap().connect_failures = count;
    }

    /// Callback sink registered by the stream, if a session is open
    pub fn events(&self) -> Option<Arc<dyn DeviceEvents>> {
        self.state.lock().unwrap().events.clone()
    }
}

/// Subscriber that keeps every frame it receives
#[derive(Default)]
pub struct RecordingSubscriber {
    frames: Mutex<Vec<FrameRecord>>,
}

impl RecordingSubscriber {
    pub fn frames(&self) -> Vec<FrameRecord> {
        self.frames.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl StreamSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_frame(&self, frame: &FrameRecord) -> anyhow::Result<()> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

/// [`ExtentDetector`] wrapper that counts invocations
#[derive(Clone, Default)]
pub struct CountingDetector {
    calls: Arc<AtomicUsize>,
}

impl CountingDetector {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GeometryDetector for CountingDetector {
    fn detect(&self, mask: &ValidityMask) -> Option<FrameGeometry> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ExtentDetector.detect(mask)
    }
}

#[cfg(feature = "mock-device")]
pub fn create_test_mock_device() -> MockDevice {
    MockDevice::new()
        .with_pattern(MockImagePattern::Speckle)
        .with_mask(MockMaskShape::Inset(16))
}
