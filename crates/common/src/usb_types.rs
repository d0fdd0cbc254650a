//! Transfer descriptions shared by transports and their users

use crate::error::{UsbError, UsbResult};
use std::time::Duration;

/// Final status of a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
}

impl TransferStatus {
    /// `Ok` only for a transfer that completed normally
    pub fn into_result(self) -> UsbResult<()> {
        match self {
            TransferStatus::Completed => Ok(()),
            TransferStatus::Error => Err(UsbError::Io),
            TransferStatus::TimedOut => Err(UsbError::Timeout),
            TransferStatus::Cancelled => Err(UsbError::Cancelled),
            TransferStatus::Stall => Err(UsbError::Pipe),
            TransferStatus::NoDevice => Err(UsbError::NoDevice),
            TransferStatus::Overflow => Err(UsbError::Overflow),
        }
    }

    /// Whether a transport honours [`Rearm::Resubmit`] after this status
    ///
    /// Cancelled and failed transfers always end idle.
    pub fn allows_resubmit(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::TimedOut)
    }
}

/// Kind of transfer being submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Control transfer on endpoint 0; the buffer starts with the setup header
    Control,
    /// Bulk transfer reading from an IN endpoint
    BulkIn { endpoint: u8 },
}

/// Everything a transport needs to arm a transfer
#[derive(Debug)]
pub struct TransferRequest {
    pub kind: TransferKind,
    /// Owned by the transfer until its completion callback has run
    pub buffer: Vec<u8>,
    /// `Duration::ZERO` waits forever
    pub timeout: Duration,
}

/// View of a finished transfer handed to its completion callback
#[derive(Debug)]
pub struct Completion<'a> {
    pub status: TransferStatus,
    /// Data stage bytes actually transferred (setup header excluded)
    pub data: &'a [u8],
}

/// What a completion callback wants done with its transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Submit the same transfer and buffer again
    Resubmit,
    /// Leave the transfer idle
    Release,
}

/// Callback invoked from inside [`crate::UsbTransport::handle_events`]
///
/// If rearming fails the transport calls it once more with
/// [`TransferStatus::Error`] and leaves the transfer idle.
pub type CompletionCallback = Box<dyn FnMut(&Completion<'_>) -> Rearm + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(TransferStatus::Completed.into_result().is_ok());
        assert_eq!(
            TransferStatus::Stall.into_result(),
            Err(UsbError::Pipe)
        );
        assert_eq!(
            TransferStatus::NoDevice.into_result(),
            Err(UsbError::NoDevice)
        );
        assert_eq!(
            TransferStatus::TimedOut.into_result(),
            Err(UsbError::Timeout)
        );
    }

    #[test]
    fn test_only_successful_statuses_rearm() {
        assert!(TransferStatus::Completed.allows_resubmit());
        assert!(TransferStatus::TimedOut.allows_resubmit());
        assert!(!TransferStatus::Cancelled.allows_resubmit());
        assert!(!TransferStatus::Error.allows_resubmit());
        assert!(!TransferStatus::NoDevice.allows_resubmit());
    }
}
