//! Device backends
//!
//! The stream never talks to a device library directly. It drives a
//! [`DeviceApi`] and receives the library's callbacks through
//! [`DeviceEvents`].
//!
//! # Components
//!
//! - [`DeviceApi`] / [`DeviceEvents`] / [`RawImage`] - The device port
//! - [`MockDevice`] - Scriptable device for tests and the demo (feature-gated)

pub mod device_trait;
#[cfg(any(test, feature = "mock-device"))]
pub mod mock_device;

pub use device_trait::{DeviceApi, DeviceEvents, RawImage};

#[cfg(test)]
pub use device_trait::MockDeviceApi;
#[cfg(any(test, feature = "mock-device"))]
pub use mock_device::{
    DeviceCall, FrameGenerator, MockDevice, MockDeviceHandle, MockImagePattern, MockMaskShape,
};
