//! Configuration module for the ultrasound stream
//!
//! This module handles stream configuration including:
//! - Connection parameters for the imaging device
//! - Per-frame processing options (grayscale conversion)
//! - Imaging parameters pushed to the device after a session opens
//! - Queue sizing and shutdown policy
//!
//! # Config Location
//!
//! The default configuration file is stored in the platform-appropriate
//! config directory under `dev.hxyulin.ultrasound-stream`:
//! - **Linux**: `~/.config/dev.hxyulin.ultrasound-stream/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.ultrasound-stream/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.ultrasound-stream\`
//!
//! # Formats
//!
//! Files are read and written as JSON, or as TOML when the path ends in
//! `.toml`.
//!
//! # Example
//!
//! ```ignore
//! use ultrasound_stream::config::StreamConfig;
//!
//! let mut config = StreamConfig::load_or_default();
//! config.server_address = "192.168.1.1".to_string();
//! config.save(StreamConfig::default_path().unwrap())?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.ultrasound-stream";

/// Config filename
pub const CONFIG_FILE: &str = "stream.json";

/// Default port the device casts to
pub const DEFAULT_SERVER_PORT: u16 = 35583;

/// Default handoff queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Host name or IP address of the device
    pub server_address: String,

    /// Port for the listener connection
    pub server_port: u16,

    /// Convert emitted frames to single-channel grayscale
    pub convert_to_gray: bool,

    /// Flip the displayed view (only used by display front-ends)
    pub flip_view: bool,

    /// Capacity of the handoff queue between arrival and processing
    pub queue_capacity: usize,

    /// Imaging parameters applied after the session opens
    pub imaging: ImagingSettings,

    /// Processing thread shutdown policy
    pub shutdown: ShutdownPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            server_port: DEFAULT_SERVER_PORT,
            convert_to_gray: false,
            flip_view: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            imaging: ImagingSettings::default(),
            shutdown: ShutdownPolicy::default(),
        }
    }
}

impl StreamConfig {
    /// Create a config pointing at the given device address
    pub fn with_address(address: impl Into<String>, port: u16) -> Self {
        Self {
            server_address: address.into(),
            server_port: port,
            ..Default::default()
        }
    }

    /// Whether the device address is known yet
    pub fn has_address(&self) -> bool {
        !self.server_address.trim().is_empty()
    }

    /// Check all values are usable
    pub fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            return Err(StreamError::Config("server_port must be non-zero".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(StreamError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        self.shutdown.validate()?;
        self.imaging.validate()
    }

    /// Path of the default config file
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = if is_toml(path) {
            toml::from_str(&content).map_err(|e| {
                StreamError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                StreamError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load the default config, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load stream config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StreamError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| StreamError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| StreamError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            StreamError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}
