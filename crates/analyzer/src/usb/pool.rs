//! Pool of bulk IN transfers kept in flight while streaming
//!
//! Slots are allocated once and reused across acquisitions. Arming is all
//! or nothing: if any slot cannot be submitted, the slots armed so far are
//! cancelled before the error is returned. Once armed, slots are rearmed
//! by the transport according to the completion callback's verdict; the
//! pool never resubmits on its own. A slot counts as armed until the
//! transport leaves it idle, which the pool learns from the completion.

use common::{Completion, Rearm, TransferKind, TransferRequest, UsbError, UsbResult, UsbTransport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

struct TransferSlot<X> {
    transfer: X,
    armed: Arc<AtomicBool>,
}

impl<X> TransferSlot<X> {
    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

/// Fixed set of reusable bulk transfers
pub struct TransferPool<T: UsbTransport> {
    transport: Arc<T>,
    slots: Vec<TransferSlot<T::Transfer>>,
    buffer_size: usize,
}

impl<T: UsbTransport> TransferPool<T> {
    pub fn new(transport: Arc<T>, buffer_size: usize) -> Self {
        Self {
            transport,
            slots: Vec::new(),
            buffer_size,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots the transport still owns
    pub fn armed(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_armed()).count()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Allocate `pool_size` transfer handles
    ///
    /// On failure every handle allocated by this call is released again and
    /// `NoMemory` is returned.
    pub fn allocate(&mut self, pool_size: usize) -> UsbResult<()> {
        if pool_size == 0 {
            return Err(UsbError::InvalidParam);
        }
        if !self.slots.is_empty() {
            warn!("Transfer pool already holds {} slots", self.slots.len());
            return Err(UsbError::Busy);
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(pool_size)
            .map_err(|_| UsbError::NoMemory)?;

        for index in 0..pool_size {
            match self.transport.alloc_transfer() {
                Ok(transfer) => slots.push(TransferSlot {
                    transfer,
                    armed: Arc::new(AtomicBool::new(false)),
                }),
                Err(e) => {
                    error!(
                        "Failed to allocate transfer {} of {}: {}",
                        index + 1,
                        pool_size,
                        e
                    );
                    for slot in slots {
                        self.transport.free_transfer(slot.transfer);
                    }
                    return Err(UsbError::NoMemory);
                }
            }
        }

        self.slots = slots;
        debug!("Allocated {} streaming transfers", pool_size);
        Ok(())
    }

    /// Give every slot a fresh buffer and submit it against `endpoint`
    ///
    /// Each slot gets its own copy of `callback`. Returns `Busy` while any
    /// slot is still armed, `NoMemory` if a buffer cannot be allocated and
    /// `Io` if the transport refuses a submission; on failure every slot
    /// armed by this call is cancelled.
    pub fn prepare_and_submit<F>(&mut self, endpoint: u8, callback: F) -> UsbResult<()>
    where
        F: FnMut(&Completion<'_>) -> Rearm + Clone + Send + 'static,
    {
        if self.slots.is_empty() {
            error!("No transfers allocated for streaming");
            return Err(UsbError::InvalidParam);
        }
        let armed = self.armed();
        if armed > 0 {
            warn!("{} transfers are still outstanding", armed);
            return Err(UsbError::Busy);
        }

        for index in 0..self.slots.len() {
            let buffer = match allocate_buffer(self.buffer_size) {
                Ok(buffer) => buffer,
                Err(e) => {
                    error!(
                        "Failed to allocate {} byte buffer for transfer {}",
                        self.buffer_size, index
                    );
                    self.abort_arming();
                    return Err(e);
                }
            };

            let request = TransferRequest {
                kind: TransferKind::BulkIn { endpoint },
                buffer,
                timeout: Duration::ZERO,
            };

            let slot = &mut self.slots[index];
            let tracked = track_armed(slot.armed.clone(), callback.clone());
            slot.armed.store(true, Ordering::Release);
            if let Err(e) = self
                .transport
                .submit(&mut slot.transfer, request, Box::new(tracked))
            {
                slot.armed.store(false, Ordering::Release);
                error!("Failed to submit transfer {}: {}", index, e);
                self.abort_arming();
                return Err(UsbError::Io);
            }
        }

        debug!(
            "Armed {} transfers of {} bytes on endpoint {:#04x}",
            self.slots.len(),
            self.buffer_size,
            endpoint
        );
        Ok(())
    }

    fn abort_arming(&mut self) {
        let armed = self.armed();
        if armed == 0 {
            return;
        }
        debug!("Cancelling {} partially armed transfers", armed);
        if let Err(e) = self.cancel_all() {
            debug!("Cancelling partially armed transfers: {}", e);
        }
    }

    /// Request cancellation of every armed slot
    ///
    /// Cancellations complete asynchronously through the event loop, and a
    /// slot stays armed until its cancelled completion lands. Every slot is
    /// attempted; the last failure is returned.
    pub fn cancel_all(&mut self) -> UsbResult<()> {
        let mut result = Ok(());
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.is_armed() {
                continue;
            }
            if let Err(e) = self.transport.cancel(&slot.transfer) {
                trace!("Cancel of transfer {} failed: {}", index, e);
                result = Err(e);
            }
        }
        result
    }

    /// Release every handle and its buffer
    pub fn free_all(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        let count = self.slots.len();
        for slot in self.slots.drain(..) {
            self.transport.free_transfer(slot.transfer);
        }
        debug!("Released {} streaming transfers", count);
    }
}

impl<T: UsbTransport> Drop for TransferPool<T> {
    fn drop(&mut self) {
        self.free_all();
    }
}

/// Clear `armed` once the transport is done with the slot
fn track_armed<F>(
    armed: Arc<AtomicBool>,
    mut callback: F,
) -> impl FnMut(&Completion<'_>) -> Rearm + Send + 'static
where
    F: FnMut(&Completion<'_>) -> Rearm + Send + 'static,
{
    move |completion: &Completion<'_>| {
        let rearm = callback(completion);
        if rearm == Rearm::Release || !completion.status.allows_resubmit() {
            armed.store(false, Ordering::Release);
        }
        rearm
    }
}

fn allocate_buffer(size: usize) -> UsbResult<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| UsbError::NoMemory)?;
    buffer.resize(size, 0);
    Ok(buffer)
}
