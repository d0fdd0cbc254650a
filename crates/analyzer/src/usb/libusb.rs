//! libusb-backed transport
//!
//! rusb covers device discovery, interface claiming and the event loop, but
//! only exposes synchronous transfers. Asynchronous control and bulk
//! transfers go through libusb1-sys directly against the same context and
//! device handle.

use common::{
    Completion, CompletionCallback, Rearm, TransferKind, TransferRequest, TransferStatus, UsbError,
    UsbResult, UsbTransport,
};
use libusb1_sys as ffi;
use libusb1_sys::constants::*;
use protocol::SETUP_PACKET_LEN;
use rusb::{Context, DeviceHandle, UsbContext};
use std::ffi::{c_int, c_uint, c_void};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// An open GreatFET and the libusb context that owns it
pub struct LibusbTransport {
    context: Context,
    handle: Mutex<DeviceHandle<Context>>,
    raw_handle: NonNull<ffi::libusb_device_handle>,
    attached: Arc<AtomicBool>,
}

// The raw handle is owned by `handle` and only ever passed to libusb,
// which serializes access internally
unsafe impl Send for LibusbTransport {}
unsafe impl Sync for LibusbTransport {}

impl LibusbTransport {
    /// Open the first device matching `vendor_id:product_id`
    pub fn open(vendor_id: u16, product_id: u16) -> UsbResult<Self> {
        let context = Context::new().map_err(map_rusb_error)?;
        let handle = context
            .open_device_with_vid_pid(vendor_id, product_id)
            .ok_or(UsbError::NotFound)?;
        info!("Opened device {:04x}:{:04x}", vendor_id, product_id);
        Self::from_handle(context, handle)
    }

    /// Wrap a handle opened elsewhere on `context`
    pub fn from_handle(context: Context, mut handle: DeviceHandle<Context>) -> UsbResult<Self> {
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        let raw_handle = NonNull::new(handle.as_raw()).ok_or(UsbError::InvalidParam)?;
        Ok(Self {
            context,
            handle: Mutex::new(handle),
            raw_handle,
            attached: Arc::new(AtomicBool::new(true)),
        })
    }

    fn handle(&self) -> MutexGuard<'_, DeviceHandle<Context>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn note_error(&self, error: &UsbError) {
        if *error == UsbError::NoDevice {
            self.attached.store(false, Ordering::Release);
        }
    }
}

/// Per-submission state reachable from libusb through `user_data`
struct TransferState {
    kind: TransferKind,
    buffer: Vec<u8>,
    callback: CompletionCallback,
    in_flight: AtomicBool,
    attached: Arc<AtomicBool>,
}

/// A libusb transfer and the state of its current submission
pub struct LibusbTransfer {
    raw: NonNull<ffi::libusb_transfer>,
    state: Option<Box<TransferState>>,
}

// The transfer is only touched by its owner and, while in flight, by the
// event loop thread through the completion callback
unsafe impl Send for LibusbTransfer {}

impl LibusbTransfer {
    fn is_in_flight(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.in_flight.load(Ordering::Acquire))
    }
}

impl Drop for LibusbTransfer {
    fn drop(&mut self) {
        if self.is_in_flight() {
            // libusb still holds pointers into the transfer and its state
            warn!("Releasing a transfer that is still in flight; leaking it");
            if let Some(state) = self.state.take() {
                std::mem::forget(state);
            }
            return;
        }
        // SAFETY: allocated by libusb_alloc_transfer and not submitted
        unsafe { ffi::libusb_free_transfer(self.raw.as_ptr()) };
    }
}

extern "system" fn transfer_complete(transfer: *mut ffi::libusb_transfer) {
    // SAFETY: libusb passes back a transfer we filled in `submit`. Its
    // user_data is the boxed TransferState, which stays alive while
    // in_flight is set.
    let (state, status, actual_length) = unsafe {
        let transfer = &*transfer;
        (
            &mut *transfer.user_data.cast::<TransferState>(),
            transfer.status,
            transfer.actual_length,
        )
    };

    let status = map_transfer_status(status);
    if status == TransferStatus::NoDevice {
        state.attached.store(false, Ordering::Release);
    }

    let offset = match state.kind {
        TransferKind::Control => SETUP_PACKET_LEN,
        TransferKind::BulkIn { .. } => 0,
    };
    let available = state.buffer.len().saturating_sub(offset);
    let len = usize::try_from(actual_length).unwrap_or(0).min(available);

    let rearm = {
        let TransferState {
            buffer, callback, ..
        } = &mut *state;
        let completion = Completion {
            status,
            data: &buffer[offset..offset + len],
        };
        (*callback)(&completion)
    };

    if rearm == Rearm::Resubmit && status.allows_resubmit() {
        // SAFETY: transfer, buffer and user_data are unchanged since the
        // previous submission
        let rc = unsafe { ffi::libusb_submit_transfer(transfer) };
        if rc == 0 {
            trace!("Transfer resubmitted");
            return;
        }
        let error = map_libusb_error(rc);
        warn!("Failed to resubmit transfer: {}", error);
        if error == UsbError::NoDevice {
            state.attached.store(false, Ordering::Release);
        }
        (state.callback)(&Completion {
            status: TransferStatus::Error,
            data: &[],
        });
    }

    state.in_flight.store(false, Ordering::Release);
}

impl UsbTransport for LibusbTransport {
    type Transfer = LibusbTransfer;

    fn alloc_transfer(&self) -> UsbResult<LibusbTransfer> {
        // SAFETY: no isochronous packets; the result is checked for null
        let raw = unsafe { ffi::libusb_alloc_transfer(0) };
        let raw = NonNull::new(raw).ok_or(UsbError::NoMemory)?;
        Ok(LibusbTransfer { raw, state: None })
    }

    fn submit(
        &self,
        transfer: &mut LibusbTransfer,
        request: TransferRequest,
        callback: CompletionCallback,
    ) -> UsbResult<()> {
        if transfer.is_in_flight() {
            return Err(UsbError::Busy);
        }

        let length = c_int::try_from(request.buffer.len()).map_err(|_| UsbError::InvalidParam)?;
        let timeout = c_uint::try_from(request.timeout.as_millis()).unwrap_or(c_uint::MAX);
        let kind = request.kind;

        let mut state = Box::new(TransferState {
            kind,
            buffer: request.buffer,
            callback,
            in_flight: AtomicBool::new(true),
            attached: self.attached.clone(),
        });
        let user_data = std::ptr::from_mut::<TransferState>(&mut *state).cast::<c_void>();
        let buffer = state.buffer.as_mut_ptr();
        let raw = transfer.raw.as_ptr();

        // SAFETY: `raw` came from libusb_alloc_transfer and is idle. The
        // buffer and user_data live in `state`, which the transfer owns
        // until its callback clears in_flight.
        unsafe {
            match kind {
                TransferKind::Control => ffi::libusb_fill_control_transfer(
                    raw,
                    self.raw_handle.as_ptr(),
                    buffer,
                    transfer_complete,
                    user_data,
                    timeout,
                ),
                TransferKind::BulkIn { endpoint } => ffi::libusb_fill_bulk_transfer(
                    raw,
                    self.raw_handle.as_ptr(),
                    endpoint,
                    buffer,
                    length,
                    transfer_complete,
                    user_data,
                    timeout,
                ),
            }
        }
        transfer.state = Some(state);

        // SAFETY: filled in above
        let rc = unsafe { ffi::libusb_submit_transfer(raw) };
        if rc < 0 {
            if let Some(state) = &transfer.state {
                state.in_flight.store(false, Ordering::Release);
            }
            let error = map_libusb_error(rc);
            self.note_error(&error);
            return Err(error);
        }

        trace!("Submitted {:?} transfer of {} bytes", kind, length);
        Ok(())
    }

    fn cancel(&self, transfer: &LibusbTransfer) -> UsbResult<()> {
        if !transfer.is_in_flight() {
            return Err(UsbError::NotFound);
        }
        // SAFETY: the transfer is submitted and owned by `transfer`
        let rc = unsafe { ffi::libusb_cancel_transfer(transfer.raw.as_ptr()) };
        if rc < 0 {
            return Err(map_libusb_error(rc));
        }
        Ok(())
    }

    fn free_transfer(&self, transfer: LibusbTransfer) {
        drop(transfer);
    }

    fn handle_events(&self, timeout: Duration) -> UsbResult<()> {
        self.context.handle_events(Some(timeout)).map_err(|e| {
            let error = map_rusb_error(e);
            self.note_error(&error);
            error
        })
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn claim_interface(&self, interface: u8) -> UsbResult<()> {
        self.handle().claim_interface(interface).map_err(|e| {
            let error = map_rusb_error(e);
            self.note_error(&error);
            error
        })?;
        debug!("Claimed interface {}", interface);
        Ok(())
    }

    fn release_interface(&self, interface: u8) -> UsbResult<()> {
        self.handle()
            .release_interface(interface)
            .map_err(map_rusb_error)?;
        debug!("Released interface {}", interface);
        Ok(())
    }
}

/// Map rusb errors to transport errors
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::Interrupted => UsbError::Interrupted,
        rusb::Error::NoMem => UsbError::NoMemory,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other(err.to_string()),
    }
}

/// Map a negative libusb return code to a transport error
pub fn map_libusb_error(code: c_int) -> UsbError {
    match code {
        LIBUSB_ERROR_IO => UsbError::Io,
        LIBUSB_ERROR_INVALID_PARAM => UsbError::InvalidParam,
        LIBUSB_ERROR_ACCESS => UsbError::Access,
        LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
        LIBUSB_ERROR_BUSY => UsbError::Busy,
        LIBUSB_ERROR_TIMEOUT => UsbError::Timeout,
        LIBUSB_ERROR_OVERFLOW => UsbError::Overflow,
        LIBUSB_ERROR_PIPE => UsbError::Pipe,
        LIBUSB_ERROR_INTERRUPTED => UsbError::Interrupted,
        LIBUSB_ERROR_NO_MEM => UsbError::NoMemory,
        LIBUSB_ERROR_NOT_SUPPORTED => UsbError::NotSupported,
        other => UsbError::Other(format!("libusb error {}", other)),
    }
}

/// Map a libusb transfer status to [`TransferStatus`]
pub fn map_transfer_status(status: c_int) -> TransferStatus {
    match status {
        LIBUSB_TRANSFER_COMPLETED => TransferStatus::Completed,
        LIBUSB_TRANSFER_TIMED_OUT => TransferStatus::TimedOut,
        LIBUSB_TRANSFER_CANCELLED => TransferStatus::Cancelled,
        LIBUSB_TRANSFER_STALL => TransferStatus::Stall,
        LIBUSB_TRANSFER_NO_DEVICE => TransferStatus::NoDevice,
        LIBUSB_TRANSFER_OVERFLOW => TransferStatus::Overflow,
        _ => TransferStatus::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(
            map_rusb_error(rusb::Error::Interrupted),
            UsbError::Interrupted
        );
        assert_eq!(map_rusb_error(rusb::Error::NoMem), UsbError::NoMemory);
        assert!(matches!(
            map_rusb_error(rusb::Error::Other),
            UsbError::Other(_)
        ));
    }

    #[test]
    fn test_map_libusb_error() {
        assert_eq!(map_libusb_error(LIBUSB_ERROR_BUSY), UsbError::Busy);
        assert_eq!(map_libusb_error(LIBUSB_ERROR_NO_DEVICE), UsbError::NoDevice);
        assert_eq!(map_libusb_error(LIBUSB_ERROR_NO_MEM), UsbError::NoMemory);
        assert!(matches!(map_libusb_error(-1000), UsbError::Other(_)));
    }

    #[test]
    fn test_map_transfer_status() {
        assert_eq!(
            map_transfer_status(LIBUSB_TRANSFER_COMPLETED),
            TransferStatus::Completed
        );
        assert_eq!(
            map_transfer_status(LIBUSB_TRANSFER_CANCELLED),
            TransferStatus::Cancelled
        );
        assert_eq!(
            map_transfer_status(LIBUSB_TRANSFER_NO_DEVICE),
            TransferStatus::NoDevice
        );
        assert_eq!(
            map_transfer_status(LIBUSB_TRANSFER_ERROR),
            TransferStatus::Error
        );
    }
}
