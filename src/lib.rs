//! # ultrasound-stream: Frame ingestion for networked ultrasound devices
//!
//! Ingests image frames delivered asynchronously by an imaging device and
//! republishes them as enriched [`FrameRecord`]s at a controlled pace. The
//! device's callback thread only copies the frame, refreshes the cached
//! frame geometry and enqueues; a dedicated processing thread converts and
//! emits frames to subscribers.
//!
//! ## Architecture
//!
//! - **Backend**: [`DeviceApi`] commands the device library, [`DeviceEvents`]
//!   receives its callbacks
//! - **Stream**: [`UltrasoundStream`] owns the handoff queue, the processing
//!   thread, the geometry cache and the lifecycle state machine
//! - **Subscribers**: [`StreamSubscriber`] implementations receive frames,
//!   button presses and state changes
//! - **Communication**: Crossbeam channels for the handoff queue and
//!   subscriber fan-out
//!
//! ## Configuration
//!
//! [`StreamConfig`] is loaded from JSON or TOML. The default file lives in
//! the platform-appropriate config directory under
//! `dev.hxyulin.ultrasound-stream`.
//!
//! ## Example
//!
//! ```ignore
//! use ultrasound_stream::{ChannelSubscriber, StreamConfig, UltrasoundStream};
//!
//! let config = StreamConfig::load_or_default();
//! let stream = UltrasoundStream::connect(config, Box::new(device))?;
//!
//! let (subscriber, events) = ChannelSubscriber::new("recorder", 64);
//! stream.subscribe(subscriber);
//! stream.start()?;
//!
//! while let Some(event) = events.recv_timeout(Duration::from_secs(1)) {
//!     // ...
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use backend::{DeviceApi, DeviceEvents, RawImage};
pub use config::{ImagingSettings, Resolution, ShutdownPolicy, StreamConfig};
pub use error::{Result, StreamError};
pub use stream::{
    ArrivalOutcome, ChannelSubscriber, EventReceiver, ExtentDetector, FrameGeometry,
    GeometryDetector, Measurement, StreamEvent, StreamSubscriber, SubscriptionId,
    UltrasoundStream,
};
pub use types::{
    FrameRecord, InertialSample, PixelBuffer, Spacing, StateChange, StreamState, StreamStats,
};
