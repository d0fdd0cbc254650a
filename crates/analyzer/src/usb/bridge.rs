//! Blocking control transfers on top of the asynchronous transport
//!
//! libgreat commands are strictly request/response, so callers want a
//! plain blocking call. The bridge submits an asynchronous control
//! transfer, then drives the transport's event loop until the completion
//! callback has fired, the device disappears, or event handling fails.

use common::{
    Completion, Rearm, TransferKind, TransferRequest, TransferStatus, UsbError, UsbResult,
    UsbTransport,
};
use protocol::{Direction, SETUP_PACKET_LEN, SetupPacket};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error, trace};

/// Upper bound on a single pass of the event loop while waiting
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Data stage of a vendor control transfer
#[derive(Debug)]
pub enum ControlData<'a> {
    /// Host to device
    Out(&'a [u8]),
    /// Device to host; received bytes are copied into the slice
    In(&'a mut [u8]),
}

impl ControlData<'_> {
    pub fn direction(&self) -> Direction {
        match self {
            ControlData::Out(_) => Direction::Out,
            ControlData::In(_) => Direction::In,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ControlData::Out(bytes) => bytes.len(),
            ControlData::In(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Synchronous vendor control transfers addressed to an endpoint
pub trait ControlTransfer {
    /// Perform one control transfer and block until it has finished
    ///
    /// Returns the number of data stage bytes transferred.
    fn control_transfer(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: ControlData<'_>,
        timeout: Duration,
    ) -> UsbResult<usize>;
}

/// What the completion callback hands back to the waiting caller
#[derive(Debug)]
struct ControlOutcome {
    status: TransferStatus,
    data: Vec<u8>,
}

/// Turns the transport's callback-driven control transfers into blocking calls
pub struct ControlBridge<T: UsbTransport> {
    transport: Arc<T>,
}

impl<T: UsbTransport> ControlBridge<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Drive the event loop until the transfer's callback has reported back
    ///
    /// A detached device yields a synthesized `NoDevice` status. Any event
    /// error other than an interruption cancels the transfer.
    fn wait_for_completion(
        &self,
        transfer: &T::Transfer,
        signal: &mut oneshot::Receiver<ControlOutcome>,
    ) -> UsbResult<ControlOutcome> {
        loop {
            match signal.try_recv() {
                Ok(outcome) => return Ok(outcome),
                Err(TryRecvError::Closed) => {
                    return Err(UsbError::Other(
                        "control transfer dropped without completing".to_string(),
                    ));
                }
                Err(TryRecvError::Empty) => {}
            }

            if !self.transport.is_attached() {
                debug!("Device went away while waiting for a control transfer");
                return Ok(ControlOutcome {
                    status: TransferStatus::NoDevice,
                    data: Vec::new(),
                });
            }

            match self.transport.handle_events(EVENT_POLL_INTERVAL) {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    trace!("Event handling interrupted, retrying");
                }
                Err(e) => {
                    error!("Failed to wait for control transfer to complete: {}", e);
                    if let Err(cancel_err) = self.transport.cancel(transfer) {
                        debug!("Cancelling stalled control transfer: {}", cancel_err);
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Setup header followed by the data stage, or room for it on IN transfers
fn build_control_buffer(setup: &SetupPacket, data: &ControlData<'_>) -> UsbResult<Vec<u8>> {
    let total = SETUP_PACKET_LEN + usize::from(setup.length);
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(total)
        .map_err(|_| UsbError::NoMemory)?;

    setup.write_to(&mut buffer);
    match data {
        ControlData::Out(bytes) => buffer.extend_from_slice(bytes),
        ControlData::In(_) => buffer.resize(total, 0),
    }
    Ok(buffer)
}

impl<T: UsbTransport> ControlTransfer for ControlBridge<T> {
    fn control_transfer(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: ControlData<'_>,
        timeout: Duration,
    ) -> UsbResult<usize> {
        if !self.transport.is_attached() {
            error!("Control transfer requested without an open device");
            return Err(UsbError::InvalidParam);
        }

        let direction = data.direction();
        let length = u16::try_from(data.len()).map_err(|_| {
            error!("Control data stage of {} bytes is too long", data.len());
            UsbError::InvalidParam
        })?;
        if direction == Direction::In && length == 0 {
            error!("IN control transfer requested without a receive buffer");
            return Err(UsbError::InvalidParam);
        }

        let setup = SetupPacket {
            request_type: direction.vendor_request_type(),
            request,
            value,
            index,
            length,
        };
        let buffer = build_control_buffer(&setup, &data)?;

        let mut transfer = self.transport.alloc_transfer().map_err(|e| {
            error!("Failed to allocate control transfer: {}", e);
            e
        })?;

        let (tx, mut rx) = oneshot::channel();
        let mut tx = Some(tx);
        let callback = Box::new(move |completion: &Completion<'_>| {
            trace!("Control transfer completed: {:?}", completion.status);
            if let Some(tx) = tx.take() {
                let _ = tx.send(ControlOutcome {
                    status: completion.status,
                    data: completion.data.to_vec(),
                });
            }
            Rearm::Release
        });

        let transfer_request = TransferRequest {
            kind: TransferKind::Control,
            buffer,
            timeout,
        };
        if let Err(e) = self
            .transport
            .submit(&mut transfer, transfer_request, callback)
        {
            debug!("Control transfer submission failed: {}", e);
            self.transport.free_transfer(transfer);
            return Err(e);
        }

        trace!(
            "Submitted {:?} control transfer: request {:#04x}, {} bytes",
            direction, request, length
        );

        let outcome = self.wait_for_completion(&transfer, &mut rx);
        self.transport.free_transfer(transfer);
        let outcome = outcome?;
        outcome.status.into_result()?;

        match data {
            ControlData::In(buffer) => {
                let len = outcome.data.len().min(buffer.len());
                buffer[..len].copy_from_slice(&outcome.data[..len]);
                Ok(len)
            }
            ControlData::Out(_) => Ok(outcome.data.len()),
        }
    }
}
