//! Imaging parameters and runtime policies
//!
//! - [`ImagingSettings`] - Gain, depth and output resolution requested from the device
//! - [`Resolution`] - Output image size in pixels
//! - [`ShutdownPolicy`] - How long `close()` waits for the processing thread

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output image size requested from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Imaging parameters; unset values leave the device default untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingSettings {
    /// Gain in percent (0-100)
    pub gain_percent: Option<f64>,
    /// Imaging depth in millimetres
    pub depth_mm: Option<f64>,
    /// Output resolution
    pub resolution: Option<Resolution>,
}

impl ImagingSettings {
    pub fn validate(&self) -> Result<()> {
        if let Some(gain) = self.gain_percent {
            validate_gain(gain)?;
        }
        if let Some(depth) = self.depth_mm {
            validate_depth(depth)?;
        }
        if let Some(resolution) = self.resolution {
            validate_resolution(resolution)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.gain_percent.is_none() && self.depth_mm.is_none() && self.resolution.is_none()
    }
}

pub(crate) fn validate_gain(gain: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&gain) {
        return Err(StreamError::InvalidParameter(format!(
            "gain {} outside 0-100%",
            gain
        )));
    }
    Ok(())
}

pub(crate) fn validate_depth(depth: f64) -> Result<()> {
    if !depth.is_finite() || depth <= 0.0 {
        return Err(StreamError::InvalidParameter(format!(
            "depth {} mm must be positive",
            depth
        )));
    }
    Ok(())
}

pub(crate) fn validate_resolution(resolution: Resolution) -> Result<()> {
    if resolution.width == 0 || resolution.height == 0 {
        return Err(StreamError::InvalidParameter(format!(
            "resolution {} must be non-zero",
            resolution
        )));
    }
    Ok(())
}

/// Bounded wait used when shutting down the processing thread
///
/// Each attempt re-signals the worker and waits up to one poll interval for
/// it to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownPolicy {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_attempts: 50,
        }
    }
}

impl ShutdownPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on the total shutdown wait
    pub fn budget(&self) -> Duration {
        self.poll_interval() * self.max_attempts
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 || self.max_attempts == 0 {
            return Err(StreamError::Config(
                "shutdown poll interval and attempts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
