//! Common error types

use thiserror::Error;

/// Errors reported by the USB transport
///
/// Mirrors the libusb error and transfer-status taxonomy so both submission
/// failures and completion statuses surface through one type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    #[error("Transfer timed out")]
    Timeout,

    #[error("Endpoint stalled")]
    Pipe,

    #[error("Device disconnected")]
    NoDevice,

    #[error("Entity not found")]
    NotFound,

    #[error("Resource busy")]
    Busy,

    #[error("Device sent more data than requested")]
    Overflow,

    #[error("Input/output error")]
    Io,

    #[error("Invalid parameter")]
    InvalidParam,

    #[error("Access denied")]
    Access,

    #[error("System call interrupted")]
    Interrupted,

    #[error("Insufficient memory")]
    NoMemory,

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Operation not supported")]
    NotSupported,

    #[error("USB error: {0}")]
    Other(String),
}

impl UsbError {
    /// Device asked us to retry later; not worth an error-level log
    pub fn is_busy(&self) -> bool {
        matches!(self, UsbError::Busy)
    }

    /// Event processing may simply be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, UsbError::Interrupted)
    }
}

/// Result type for transport operations
pub type UsbResult<T> = std::result::Result<T, UsbError>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
