//! Asynchronous USB transport seam
//!
//! The analyzer never talks to libusb directly. Everything it needs from
//! the USB stack (allocating transfers, submitting them with a completion
//! callback, cancelling, and running the event loop that delivers those
//! callbacks) goes through [`UsbTransport`].
//!
//! Completion callbacks run on whichever thread calls
//! [`UsbTransport::handle_events`], never on a thread of their own.

use crate::error::UsbResult;
use crate::usb_types::{CompletionCallback, TransferRequest};
use std::time::Duration;

pub trait UsbTransport: Send + Sync {
    /// Opaque transfer handle
    type Transfer: Send;

    /// Allocate a transfer object
    fn alloc_transfer(&self) -> UsbResult<Self::Transfer>;

    /// Arm `transfer` with `request`; `callback` runs once it completes
    fn submit(
        &self,
        transfer: &mut Self::Transfer,
        request: TransferRequest,
        callback: CompletionCallback,
    ) -> UsbResult<()>;

    /// Request cancellation; the callback later runs with `Cancelled`
    fn cancel(&self, transfer: &Self::Transfer) -> UsbResult<()>;

    /// Give a transfer object back to the transport
    fn free_transfer(&self, transfer: Self::Transfer);

    /// Process pending events for at most `timeout`, running callbacks
    fn handle_events(&self, timeout: Duration) -> UsbResult<()>;

    /// False once the device has gone away
    fn is_attached(&self) -> bool;

    fn claim_interface(&self, interface: u8) -> UsbResult<()>;

    fn release_interface(&self, interface: u8) -> UsbResult<()>;
}
