//! Device interface for ultrasound imaging hardware
//!
//! The stream talks to hardware through two ports:
//!
//! - [`DeviceApi`] - Commands the stream issues to the device library
//!   (session setup, connection, imaging parameters)
//! - [`DeviceEvents`] - Callbacks the device library invokes on its own
//!   threads (new images, freeze, buttons, measurements)
//!
//! A real vendor binding and [`MockDevice`](super::mock_device::MockDevice)
//! both implement [`DeviceApi`]; the stream implements [`DeviceEvents`].

use crate::config::Resolution;
use crate::error::Result;
use crate::types::InertialSample;
use std::sync::Arc;

/// Image data as lent by the device for the duration of a callback
#[derive(Debug, Clone, Copy)]
pub struct RawImage<'a> {
    pub width: u32,
    pub height: u32,
    /// Interleaved 8-bit channels per pixel; the last one is the validity mask
    pub channels: u8,
    pub data: &'a [u8],
    /// Pixel size reported by the device
    pub microns_per_pixel: f64,
}

impl<'a> RawImage<'a> {
    pub fn new(width: u32, height: u32, channels: u8, data: &'a [u8], microns_per_pixel: f64) -> Self {
        Self {
            width,
            height,
            channels,
            data,
            microns_per_pixel,
        }
    }
}

/// Callbacks delivered by the device library
///
/// Every method may be called from a thread owned by the device library and
/// must return quickly.
pub trait DeviceEvents: Send + Sync {
    /// A processed image is ready. `data` is only valid during the call.
    fn on_image(&self, image: RawImage<'_>, timestamp_ns: u64, inertial: &[InertialSample]);

    /// The device reported a new imaging extent
    fn on_measurement(&self, depth_mm: f64, width_mm: f64);

    /// The device was frozen (`true`) or unfrozen (`false`) from its own controls
    fn on_freeze(&self, frozen: bool);

    /// A hardware button was pressed
    fn on_button(&self, button: i32, clicks: i32);
}

/// Commands issued to the device library
///
/// Implementations must be `Send` so the stream can own them behind a mutex.
///
/// # Example
///
/// ```ignore
/// fn bring_up(device: &mut dyn DeviceApi, events: Arc<dyn DeviceEvents>) -> Result<()> {
///     device.initialize_session(events)?;
///     device.connect("192.168.1.1", 35583)
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait DeviceApi: Send {
    /// Initialize the device library and register the callback sink
    fn initialize_session(&mut self, events: Arc<dyn DeviceEvents>) -> Result<()>;

    /// Connect to the device's cast server
    fn connect(&mut self, address: &str, port: u16) -> Result<()>;

    /// Drop the network connection
    fn disconnect(&mut self) -> Result<()>;

    /// Release the device library session
    fn destroy_session(&mut self);

    /// Ask the device to begin streaming images
    ///
    /// Devices that stream as soon as they are connected need not override this.
    fn start_acquisition(&mut self) -> Result<()> {
        Ok(())
    }

    /// Set gain in percent
    fn set_gain(&mut self, gain_percent: f64) -> Result<()>;

    /// Set imaging depth in millimetres
    fn set_depth(&mut self, depth_mm: f64) -> Result<()>;

    /// Set the output image size
    fn set_resolution(&mut self, resolution: Resolution) -> Result<()>;
}
