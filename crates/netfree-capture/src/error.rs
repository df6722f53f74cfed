//! Error types for netfree-capture

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Main error type for capture operations
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Interface not found or invalid
    #[error("Interface error: {0}")]
    Interface(String),

    /// Socket operation failed
    #[error("Socket error: {0}")]
    Socket(String),

    /// Receiving from the capture socket failed
    #[error("Capture error: {0}")]
    Capture(String),

    /// Link is down while the interface is reconfigured
    #[error("Link down: {0}")]
    LinkDown(String),

    /// Insufficient privileges
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Truncated or malformed header
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Whether the capture session can keep reading after this error
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::InvalidFrame(_) | CaptureError::LinkDown(_))
    }

    /// Whether reads fail only until the link comes back up
    #[must_use]
    pub fn is_link_down(&self) -> bool {
        matches!(self, CaptureError::LinkDown(_))
    }
}
