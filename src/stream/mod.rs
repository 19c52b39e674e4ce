//! Ultrasound frame stream
//!
//! [`UltrasoundStream`] composes the pipeline: the device delivers frames on
//! its own thread through [`DeviceEvents`], the arrival path hashes the
//! validity mask, refreshes the [`GeometryCache`] and enqueues an enriched
//! [`FrameRecord`] onto the [`HandoffQueue`], and the [`ProcessingWorker`]
//! converts and emits each record to the registered subscribers.
//!
//! # Threading
//!
//! - Device callbacks may fire concurrently with any method on the stream.
//!   The arrival path never blocks on the worker: a full queue is drained
//!   and the loss logged.
//! - open/start/stop/close/configure and the imaging setters are serialized
//!   by a control lock.
//! - pause/resume only touch the atomic lifecycle state, so the device's
//!   freeze callback can drive them without taking the control lock.
//! - The configuration is read-locked for the whole of frame construction,
//!   so a concurrent [`UltrasoundStream::configure`] never tears a frame.
//!
//! # Example
//!
//! ```ignore
//! use ultrasound_stream::{ChannelSubscriber, StreamConfig, UltrasoundStream};
//!
//! let config = StreamConfig::with_address("192.168.1.1", 35583);
//! let stream = UltrasoundStream::new(config, Box::new(device))?;
//! let (subscriber, events) = ChannelSubscriber::new("viewer", 64);
//! stream.subscribe(subscriber);
//!
//! stream.open()?;
//! stream.start()?;
//! for frame in events.collect_frames(10, Duration::from_secs(1)) {
//!     println!("{:?}", frame.geometry);
//! }
//! stream.close()?;
//! ```

pub mod convert;
pub mod geometry;
pub mod lease;
pub mod lifecycle;
pub mod queue;
pub mod stats;
pub mod subscriber;
pub mod worker;

pub use convert::{to_grayscale, FrameConversion};
pub use geometry::{
    mask_hash, CacheOutcome, ExtentDetector, FrameGeometry, GeometryCache, GeometryDetector,
    MaskKey, ValidityMask,
};
pub use lease::SessionLease;
pub use lifecycle::Lifecycle;
pub use queue::HandoffQueue;
pub use stats::{FrameRateMeter, StreamCounters};
pub use subscriber::{
    ChannelSubscriber, EventReceiver, StreamEvent, StreamSubscriber, SubscriberRegistry,
    SubscriptionId,
};
pub use worker::{ProcessingWorker, QueuedFrame, WakeSignal};

use crate::backend::{DeviceApi, DeviceEvents, RawImage};
use crate::config::settings::{validate_depth, validate_gain, validate_resolution};
use crate::config::{ImagingSettings, Resolution, StreamConfig};
use crate::error::{Result, ResultExt, StreamError};
use crate::types::{
    FrameRecord, InertialSample, PixelBuffer, Spacing, StateChange, StreamState, StreamStats,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// What the arrival path did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// Enqueued for processing
    Accepted,
    /// Discarded because the stream is not running
    DroppedInactive,
    /// The queue was full; this frame and everything queued were dropped
    Overflow { dropped: usize },
    /// The raw buffer did not match its declared shape
    Rejected,
}

/// Latest imaging extent reported by the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub depth_mm: f64,
    pub width_mm: f64,
}

/// State shared between the facade, the device callbacks and the worker
struct StreamShared {
    lifecycle: Lifecycle,
    config: RwLock<StreamConfig>,
    queue: Arc<HandoffQueue<QueuedFrame>>,
    wake: Arc<WakeSignal>,
    subscribers: Arc<SubscriberRegistry>,
    counters: Arc<StreamCounters>,
    geometry: Mutex<GeometryCache>,
    detector: Box<dyn GeometryDetector>,
    measurement: Mutex<Option<Measurement>>,
}

impl StreamShared {
    fn arrive(
        &self,
        raw: RawImage<'_>,
        timestamp_ns: u64,
        inertial: &[InertialSample],
    ) -> ArrivalOutcome {
        StreamCounters::incr(&self.counters.frames_received);

        if !self.lifecycle.current().has_session() {
            StreamCounters::incr(&self.counters.frames_dropped_inactive);
            return ArrivalOutcome::DroppedInactive;
        }

        // Held until the record is built
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);

        let image = match PixelBuffer::copy_from(
            raw.width,
            raw.height,
            raw.channels,
            raw.data,
            Spacing::from_microns(raw.microns_per_pixel),
        ) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!("Discarding frame from device: {}", e);
                return ArrivalOutcome::Rejected;
            }
        };

        // The cache stays warm while paused so resuming does not re-detect
        let geometry = {
            let mask = ValidityMask::from_image(&image);
            let mut cache = self.geometry.lock().unwrap_or_else(PoisonError::into_inner);
            if cache.update(&mask, self.detector.as_ref()).ran_detection() {
                StreamCounters::incr(&self.counters.geometry_detections);
            }
            cache.geometry().cloned()
        };

        if !self.lifecycle.is_running() {
            StreamCounters::incr(&self.counters.frames_dropped_inactive);
            return ArrivalOutcome::DroppedInactive;
        }

        let mut record =
            FrameRecord::new(image, Duration::from_nanos(timestamp_ns)).with_geometry(geometry);
        if !inertial.is_empty() {
            record = record.with_inertial_samples(inertial.to_vec());
        }
        let queued = QueuedFrame {
            record,
            conversion: FrameConversion::from_config(&config),
        };
        drop(config);

        match self.queue.try_push(queued) {
            // close() may have drained between the running check and the push
            Ok(()) if self.lifecycle.current() == StreamState::Closed => {
                self.queue.drain_all();
                StreamCounters::incr(&self.counters.frames_dropped_inactive);
                ArrivalOutcome::DroppedInactive
            }
            Ok(()) => {
                StreamCounters::incr(&self.counters.frames_accepted);
                self.wake.notify();
                ArrivalOutcome::Accepted
            }
            Err(rejected) => {
                drop(rejected);
                let dropped = self.queue.drain_all() + 1;
                tracing::warn!(
                    "{} (capacity {})",
                    StreamError::QueueOverflow { dropped },
                    self.queue.capacity()
                );
                StreamCounters::incr(&self.counters.overflow_events);
                StreamCounters::add(&self.counters.frames_dropped_overflow, dropped as u64);
                ArrivalOutcome::Overflow { dropped }
            }
        }
    }

    fn set_paused(&self, paused: bool) -> Result<()> {
        let change = if paused {
            self.lifecycle.pause()?
        } else {
            self.lifecycle.resume()?
        };
        match change {
            Some(change) => self.announce(change),
            None => tracing::debug!(
                "Stream already {}, {} ignored",
                self.lifecycle.current(),
                if paused { "pause" } else { "resume" }
            ),
        }
        Ok(())
    }

    fn announce(&self, change: StateChange) {
        tracing::info!("Stream state: {} -> {}", change.from, change.to);
        self.subscribers.notify_state_changed(change);
    }
}

impl DeviceEvents for StreamShared {
    fn on_image(&self, image: RawImage<'_>, timestamp_ns: u64, inertial: &[InertialSample]) {
        let outcome = self.arrive(image, timestamp_ns, inertial);
        tracing::trace!("Frame at {} ns: {:?}", timestamp_ns, outcome);
    }

    fn on_measurement(&self, depth_mm: f64, width_mm: f64) {
        tracing::debug!("Device measurement: depth {} mm, width {} mm", depth_mm, width_mm);
        *self.measurement.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Measurement { depth_mm, width_mm });
    }

    fn on_freeze(&self, frozen: bool) {
        if let Err(e) = self.set_paused(frozen) {
            tracing::debug!("Ignoring device freeze={}: {}", frozen, e);
        }
    }

    fn on_button(&self, button: i32, clicks: i32) {
        tracing::debug!("Device button {} pressed ({} clicks)", button, clicks);
        self.subscribers.notify_button(button);
    }
}

struct Control {
    device: Box<dyn DeviceApi>,
    worker: Option<ProcessingWorker>,
}

/// Frame stream from a networked ultrasound device
///
/// Only one stream may exist per process; constructing a second one while
/// the first is alive fails with [`StreamError::AlreadyActive`]. Dropping the
/// stream closes it.
pub struct UltrasoundStream {
    shared: Arc<StreamShared>,
    control: Mutex<Control>,
    _lease: SessionLease,
}

impl UltrasoundStream {
    /// Create an idle stream using [`ExtentDetector`] for geometry
    pub fn new(config: StreamConfig, device: Box<dyn DeviceApi>) -> Result<Self> {
        Self::with_detector(config, device, ExtentDetector)
    }

    /// Create an idle stream with a custom geometry detector
    pub fn with_detector(
        config: StreamConfig,
        device: Box<dyn DeviceApi>,
        detector: impl GeometryDetector + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let lease = SessionLease::acquire()?;

        let queue = Arc::new(HandoffQueue::new(config.queue_capacity));
        let wake = Arc::new(WakeSignal::new());
        let subscribers = Arc::new(SubscriberRegistry::new());
        let counters = Arc::new(StreamCounters::new());

        let worker = ProcessingWorker::spawn(
            queue.clone(),
            wake.clone(),
            subscribers.clone(),
            counters.clone(),
        )
        .context("Failed to spawn frame processing thread")?;

        tracing::debug!(
            "Created stream (queue capacity {}, grayscale {})",
            queue.capacity(),
            config.convert_to_gray
        );

        Ok(Self {
            shared: Arc::new(StreamShared {
                lifecycle: Lifecycle::new(),
                config: RwLock::new(config),
                queue,
                wake,
                subscribers,
                counters,
                geometry: Mutex::new(GeometryCache::new()),
                detector: Box::new(detector),
                measurement: Mutex::new(None),
            }),
            control: Mutex::new(Control {
                device,
                worker: Some(worker),
            }),
            _lease: lease,
        })
    }

    /// Create a stream and open it if the device address is already known
    ///
    /// Without an address the stream stays [`StreamState::Idle`] until
    /// [`configure`](Self::configure) supplies one and [`open`](Self::open)
    /// is called.
    pub fn connect(config: StreamConfig, device: Box<dyn DeviceApi>) -> Result<Self> {
        let open_now = config.has_address();
        let stream = Self::new(config, device)?;
        if open_now {
            stream.open()?;
        } else {
            tracing::info!("No device address configured, deferring open");
        }
        Ok(stream)
    }

    /// Whether a new stream could be constructed right now
    pub fn can_instantiate() -> bool {
        SessionLease::is_available()
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> StreamState {
        self.shared.lifecycle.current()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lifecycle.is_running()
    }

    /// Whether a device session is open
    pub fn is_initialized(&self) -> bool {
        self.state().has_session()
    }

    /// Establish the device session. Only valid from `Idle`.
    ///
    /// On failure the session is torn down again and the stream stays `Idle`.
    pub fn open(&self) -> Result<()> {
        let mut control = self.lock_control();
        match self.state() {
            StreamState::Idle => {}
            StreamState::Closed => return Err(StreamError::Closed),
            from => {
                return Err(StreamError::InvalidTransition {
                    from,
                    operation: "open",
                })
            }
        }

        let (address, port, imaging) = {
            let config = self.shared.config.read().unwrap_or_else(PoisonError::into_inner);
            (
                config.server_address.clone(),
                config.server_port,
                config.imaging.clone(),
            )
        };
        if address.trim().is_empty() {
            return Err(StreamError::Connection {
                address,
                port,
                message: "no server address configured".to_string(),
            });
        }

        let events: Arc<dyn DeviceEvents> = self.shared.clone();
        control
            .device
            .initialize_session(events)
            .map_err(|e| match e {
                StreamError::SessionInit(_) => e,
                other => StreamError::SessionInit(other.to_string()),
            })?;

        if let Err(e) = control.device.connect(&address, port) {
            control.device.destroy_session();
            tracing::error!("Connection to {}:{} failed: {}", address, port, e);
            return Err(match e {
                StreamError::Connection { .. } => e,
                other => StreamError::Connection {
                    address,
                    port,
                    message: other.to_string(),
                },
            });
        }

        apply_imaging(control.device.as_mut(), &imaging);

        match self
            .shared
            .lifecycle
            .transition(&[StreamState::Idle], StreamState::Initialized, "open")
        {
            Ok(change) => {
                tracing::info!("Connected to {}:{}", address, port);
                self.shared.announce(change);
                Ok(())
            }
            Err(e) => {
                let _ = control.device.disconnect();
                control.device.destroy_session();
                Err(e)
            }
        }
    }

    /// Begin accepting frames. Valid from `Initialized` or `Paused`; a
    /// running stream is left as is.
    pub fn start(&self) -> Result<()> {
        let mut control = self.lock_control();
        match self.state() {
            StreamState::Running => return Ok(()),
            StreamState::Idle => return Err(StreamError::NotInitialized),
            StreamState::Closed => return Err(StreamError::Closed),
            StreamState::Initialized => control
                .device
                .start_acquisition()
                .context("Failed to start acquisition")?,
            StreamState::Paused => {}
        }

        match self.shared.lifecycle.transition(
            &[StreamState::Initialized, StreamState::Paused],
            StreamState::Running,
            "start",
        ) {
            Ok(change) => self.shared.announce(change),
            // A freeze release may have resumed the stream in the meantime
            Err(_) if self.is_running() => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Stop accepting frames and return to `Initialized`
    pub fn stop(&self) -> Result<()> {
        let _control = self.lock_control();
        match self.state() {
            StreamState::Initialized => return Ok(()),
            StreamState::Idle => return Err(StreamError::NotInitialized),
            StreamState::Closed => return Err(StreamError::Closed),
            StreamState::Running | StreamState::Paused => {}
        }
        let change = self.shared.lifecycle.transition(
            &[StreamState::Running, StreamState::Paused],
            StreamState::Initialized,
            "stop",
        )?;
        self.shared.announce(change);
        Ok(())
    }

    /// Running -> Paused; a no-op when already paused
    pub fn pause(&self) -> Result<()> {
        self.shared.set_paused(true)
    }

    /// Paused -> Running; a no-op when already running
    pub fn resume(&self) -> Result<()> {
        self.shared.set_paused(false)
    }

    /// Tear down the session, stop the processing thread and drop queued
    /// frames. Idempotent once the thread has exited.
    ///
    /// If the processing thread does not stop in time the stream is still
    /// closed, but this and every later call report
    /// [`StreamError::ShutdownTimeout`] until the thread has been joined.
    ///
    /// Must not be called from a subscriber callback, since it waits for the
    /// processing thread to exit.
    pub fn close(&self) -> Result<()> {
        let mut control = self.lock_control();
        let Some(change) = self.shared.lifecycle.close() else {
            return self.stop_worker(&mut control);
        };

        if change.from.has_session() {
            if let Err(e) = control.device.disconnect() {
                tracing::warn!("Device disconnect failed: {}", e);
            }
            control.device.destroy_session();
        }

        let shutdown = self.stop_worker(&mut control);
        self.shared.announce(change);
        shutdown
    }

    /// Join the processing thread if it is still attached, then discard
    /// anything left in the queue
    fn stop_worker(&self, control: &mut Control) -> Result<()> {
        let Some(worker) = control.worker.as_mut() else {
            return Ok(());
        };
        let policy = self
            .shared
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown;

        let shutdown = worker.shutdown(policy);
        if shutdown.is_ok() {
            control.worker = None;
        }

        let drained = self.shared.queue.drain_all();
        if drained > 0 {
            tracing::debug!("Discarded {} queued frames on close", drained);
        }
        self.shared.wake.notify();
        shutdown
    }

    /// Replace the configuration
    ///
    /// Imaging parameters are pushed to the device if a session is open.
    /// Queue capacity only applies to streams constructed afterwards.
    pub fn configure(&self, config: StreamConfig) -> Result<()> {
        config.validate()?;
        let mut control = self.lock_control();

        let imaging = config.imaging.clone();
        {
            let mut current = self.shared.config.write().unwrap_or_else(PoisonError::into_inner);
            if current.queue_capacity != config.queue_capacity {
                tracing::debug!(
                    "Queue capacity {} takes effect on the next stream",
                    config.queue_capacity
                );
            }
            *current = config;
        }

        if self.is_initialized() {
            apply_imaging(control.device.as_mut(), &imaging);
        }
        tracing::info!("Stream configuration updated");
        Ok(())
    }

    /// Current configuration
    pub fn config(&self) -> StreamConfig {
        self.shared
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn StreamSubscriber>) -> SubscriptionId {
        self.shared.subscribers.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.unsubscribe(id)
    }

    /// Frame arrival entry point for device bindings
    ///
    /// May be called from any thread, concurrently with every other method.
    /// Never blocks on frame processing.
    pub fn on_frame_arrived(
        &self,
        image: RawImage<'_>,
        timestamp_ns: u64,
        inertial: &[InertialSample],
    ) -> ArrivalOutcome {
        self.shared.arrive(image, timestamp_ns, inertial)
    }

    /// Callback sink to hand to a device binding
    pub fn events(&self) -> Arc<dyn DeviceEvents> {
        self.shared.clone()
    }

    /// Set device gain in percent (0-100)
    pub fn set_gain(&self, gain_percent: f64) -> Result<()> {
        validate_gain(gain_percent)?;
        self.with_session(|device| device.set_gain(gain_percent).context("Failed to set gain"))?;
        self.update_imaging(|imaging| imaging.gain_percent = Some(gain_percent));
        Ok(())
    }

    /// Set imaging depth in millimetres
    pub fn set_depth(&self, depth_mm: f64) -> Result<()> {
        validate_depth(depth_mm)?;
        self.with_session(|device| device.set_depth(depth_mm).context("Failed to set depth"))?;
        self.update_imaging(|imaging| imaging.depth_mm = Some(depth_mm));
        Ok(())
    }

    /// Set the output image size
    pub fn set_resolution(&self, resolution: Resolution) -> Result<()> {
        validate_resolution(resolution)?;
        self.with_session(|device| device.set_resolution(resolution).context("Failed to set resolution"))?;
        self.update_imaging(|imaging| imaging.resolution = Some(resolution));
        Ok(())
    }

    /// Run `f` against the device, or fail with `NotInitialized` without a
    /// session
    fn with_session(&self, f: impl FnOnce(&mut dyn DeviceApi) -> Result<()>) -> Result<()> {
        let mut control = self.lock_control();
        if !self.is_initialized() {
            return Err(StreamError::NotInitialized);
        }
        f(control.device.as_mut())
    }

    fn update_imaging(&self, f: impl FnOnce(&mut ImagingSettings)) {
        let mut config = self.shared.config.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut config.imaging);
    }

    /// Latest imaging extent reported by the device
    pub fn measurement(&self) -> Option<Measurement> {
        *self
            .shared
            .measurement
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest imaging depth reported by the device (mm)
    pub fn measured_depth(&self) -> Option<f64> {
        self.measurement().map(|m| m.depth_mm)
    }

    /// Geometry currently attached to emitted frames
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.shared
            .geometry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .geometry()
            .cloned()
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.counters.snapshot(self.shared.queue.len())
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }
}

impl Drop for UltrasoundStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Failed to close stream cleanly: {}", e);
        }
    }
}

/// Push configured imaging parameters to the device; failures are logged
fn apply_imaging(device: &mut dyn DeviceApi, imaging: &ImagingSettings) {
    if let Some(gain) = imaging.gain_percent {
        if let Err(e) = device.set_gain(gain) {
            tracing::warn!("Device rejected gain {}%: {}", gain, e);
        }
    }
    if let Some(depth) = imaging.depth_mm {
        if let Err(e) = device.set_depth(depth) {
            tracing::warn!("Device rejected depth {} mm: {}", depth, e);
        }
    }
    if let Some(resolution) = imaging.resolution {
        if let Err(e) = device.set_resolution(resolution) {
            tracing::warn!("Device rejected resolution {}: {}", resolution, e);
        }
    }
}
