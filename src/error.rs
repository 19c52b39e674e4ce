//! Error handling for the ultrasound stream
//!
//! This module defines the stream's error type and a Result alias for use
//! throughout the crate. Failures during session setup and teardown are
//! returned to the caller; failures during steady-state frame processing are
//! recovered locally and only logged, so most of the per-frame variants are
//! never seen by a caller of the public API.

use crate::types::StreamState;
use thiserror::Error;

/// Main error type for stream operations
#[derive(Error, Debug)]
pub enum StreamError {
    /// The device library failed to initialize a session
    #[error("Session initialization failed: {0}")]
    SessionInit(String),

    /// Network connection or session handshake with the device failed
    #[error("Connection to {address}:{port} failed: {message}")]
    Connection {
        address: String,
        port: u16,
        message: String,
    },

    /// Operation requires an open device session
    #[error("Device session is not initialized")]
    NotInitialized,

    /// Operation is not valid from the current lifecycle state
    #[error("Cannot {operation} while stream is {from}")]
    InvalidTransition {
        from: StreamState,
        operation: &'static str,
    },

    /// The handoff queue was full and had to be drained
    #[error("Handoff queue overflow, {dropped} frames dropped")]
    QueueOverflow { dropped: usize },

    /// Per-frame conversion step failed
    #[error("Frame conversion failed: {0}")]
    Conversion(String),

    /// A downstream subscriber failed while handling a frame
    #[error("Subscriber failed: {0}")]
    Subscriber(String),

    /// The processing thread did not exit within the retry budget
    #[error("Processing thread did not shut down after {attempts} wake attempts")]
    ShutdownTimeout { attempts: u32 },

    /// Another stream already holds the device session lease
    #[error("Another stream instance is already active")]
    AlreadyActive,

    /// The stream has been closed and cannot be reused
    #[error("Stream is closed")]
    Closed,

    /// Raw frame data did not match its declared shape
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Imaging parameter out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The device rejected a request
    #[error("Device error: {0}")]
    Device(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        StreamError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error is reported to callers of the lifecycle API.
    ///
    /// Overflow, conversion and subscriber failures are recovered inside the
    /// pipeline and never leave it.
    pub fn is_recoverable_locally(&self) -> bool {
        match self {
            StreamError::QueueOverflow { .. }
            | StreamError::Conversion(_)
            | StreamError::Subscriber(_) => true,
            StreamError::WithContext { source, .. } => source.is_recoverable_locally(),
            _ => false,
        }
    }
}

/// Result type alias for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
