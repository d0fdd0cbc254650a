//! Error types for the acquisition core

use crate::acquisition::AcquisitionState;
use common::UsbError;
use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{command} command failed: {source}")]
    Command {
        command: &'static str,
        #[source]
        source: UsbError,
    },

    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: AcquisitionState,
    },

    #[error("{armed} streaming transfers are still armed")]
    TransfersPending { armed: usize },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Underlying USB error, if any
    pub fn usb_error(&self) -> Option<&UsbError> {
        match self {
            Error::Command { source, .. } => Some(source),
            Error::Usb(e) => Some(e),
            _ => None,
        }
    }

    /// Device asked for the command to be retried
    pub fn is_busy(&self) -> bool {
        self.usb_error().is_some_and(UsbError::is_busy)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
