//! Error types for the evasion library
//!
//! This module defines the error types used throughout the library,
//! using `thiserror` for the derive macros.

use thiserror::Error;

/// Result type alias using [`EvasionError`]
pub type Result<T> = std::result::Result<T, EvasionError>;

/// Errors that can occur while reading or changing interface addresses
#[derive(Error, Debug)]
pub enum EvasionError {
    /// Interface does not exist
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Invalid MAC address format
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    /// Permission denied (need root or CAP_NET_ADMIN)
    #[error("Permission denied: {0}. Run as root or with CAP_NET_ADMIN")]
    PermissionDenied(String),

    /// Interface operation failed
    #[error("Interface operation failed: {0}")]
    InterfaceError(String),

    /// State restoration failed
    #[error("State restoration failed: {0}")]
    RestoreError(String),

    /// System call or system file access failed
    #[error("System error: {0}")]
    System(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feature not supported on this system/driver
    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl EvasionError {
    /// Check if this error is recoverable
    ///
    /// Permission problems need user intervention; interface and system
    /// failures may succeed on the next candidate or retry.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EvasionError::InterfaceError(_) | EvasionError::System(_)
        )
    }

    /// Check if this error is a permission error
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, EvasionError::PermissionDenied(_))
    }

    /// Create a permission denied error
    #[must_use]
    pub fn permission_denied(operation: impl Into<String>) -> Self {
        EvasionError::PermissionDenied(operation.into())
    }

    /// Create an interface not found error
    #[must_use]
    pub fn interface_not_found(name: impl Into<String>) -> Self {
        EvasionError::InterfaceNotFound(name.into())
    }

    /// Map an OS error from an interface operation, singling out EPERM/EACCES
    pub(crate) fn from_os(operation: &str, interface: &str, err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => {
                EvasionError::PermissionDenied(operation.to_string())
            }
            Some(libc::ENODEV) => EvasionError::InterfaceNotFound(interface.to_string()),
            _ => EvasionError::InterfaceError(format!("{} on {}: {}", operation, interface, err)),
        }
    }
}
