//! Test utilities for greatfet-logic
//!
//! [`MockTransport`] stands in for libusb. Tests script how the "device"
//! answers control transfers, what each pass of the event loop does, and
//! which bulk chunks arrive, then inspect what the code under test did.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{EventStep, MockTransport};
//! use common::{UsbError, UsbTransport};
//! use std::time::Duration;
//!
//! let transport = MockTransport::new();
//! transport.push_event(EventStep::Fail(UsbError::Interrupted));
//!
//! let result = transport.handle_events(Duration::from_millis(10));
//! assert_eq!(result, Err(UsbError::Interrupted));
//! assert_eq!(transport.events_handled(), 1);
//! ```

use crate::error::{UsbError, UsbResult};
use crate::transport::UsbTransport;
use crate::usb_types::{
    Completion, CompletionCallback, Rearm, TransferKind, TransferRequest, TransferStatus,
};
use protocol::{CommandPacket, Direction, SETUP_PACKET_LEN, SetupPacket};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Default timeout handed to code under test
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// A control transfer as the device saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub setup: SetupPacket,
    /// Data stage for OUT transfers, empty for IN
    pub data: Vec<u8>,
    pub timeout: Duration,
}

/// How the mock device answers the next control transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// Complete normally; IN transfers receive these bytes
    Respond(Vec<u8>),
    /// Complete with a failure status
    Status(TransferStatus),
    /// Refuse at submission time
    Reject(UsbError),
    /// Stay pending until cancelled
    Hang,
}

/// What one call to `handle_events` does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStep {
    /// Complete every transfer that can complete
    Dispatch,
    /// Return this error without dispatching anything
    Fail(UsbError),
    /// Unplug the device
    Detach,
}

/// Transfer handle issued by [`MockTransport`]
#[derive(Debug)]
pub struct MockTransfer {
    id: usize,
}

impl MockTransfer {
    pub fn id(&self) -> usize {
        self.id
    }
}

struct InFlight {
    id: usize,
    kind: TransferKind,
    buffer: Vec<u8>,
    callback: CompletionCallback,
    reply: Option<ControlReply>,
    cancelled: bool,
}

#[derive(Default)]
struct MockState {
    detached: bool,
    next_id: usize,
    allocated: usize,
    freed: Vec<usize>,
    fail_alloc_at: Option<usize>,
    fail_submit_at: Option<(usize, UsbError)>,
    submissions: usize,
    in_flight: Vec<InFlight>,
    control_log: Vec<ControlRecord>,
    control_replies: VecDeque<ControlReply>,
    event_script: VecDeque<EventStep>,
    bulk_chunks: VecDeque<Vec<u8>>,
    events_handled: usize,
    cancel_requests: usize,
    claimed: Vec<u8>,
    release_attempts: Vec<u8>,
    claim_error: Option<UsbError>,
    release_error: Option<UsbError>,
}

/// Scripted in-memory transport
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the reply for the next control transfer
    ///
    /// Without a queued reply, control transfers complete normally with
    /// no data.
    pub fn push_control_reply(&self, reply: ControlReply) {
        self.state().control_replies.push_back(reply);
    }

    /// Queue an acknowledged command followed by `response` on the read-back
    pub fn queue_command_response(&self, response: &[u8]) {
        let mut state = self.state();
        state.control_replies.push_back(ControlReply::Respond(Vec::new()));
        state
            .control_replies
            .push_back(ControlReply::Respond(response.to_vec()));
    }

    /// Queue what the next `handle_events` call does
    pub fn push_event(&self, step: EventStep) {
        self.state().event_script.push_back(step);
    }

    /// Queue data for the next bulk transfer to complete
    pub fn push_bulk_chunk(&self, data: Vec<u8>) {
        self.state().bulk_chunks.push_back(data);
    }

    /// Fail every allocation once `count` transfers have been handed out
    pub fn fail_allocation_at(&self, count: usize) {
        self.state().fail_alloc_at = Some(count);
    }

    /// Fail the submission with this zero-based sequence number
    ///
    /// Every submission counts, control transfers and rearms included.
    pub fn fail_submission_at(&self, submission: usize, error: UsbError) {
        self.state().fail_submit_at = Some((submission, error));
    }

    pub fn set_claim_error(&self, error: UsbError) {
        self.state().claim_error = Some(error);
    }

    pub fn set_release_error(&self, error: UsbError) {
        self.state().release_error = Some(error);
    }

    /// Unplug the device immediately
    pub fn detach(&self) {
        self.state().detached = true;
    }

    /// Every control transfer submitted so far
    pub fn control_log(&self) -> Vec<ControlRecord> {
        self.state().control_log.clone()
    }

    /// libgreat commands carried by OUT control transfers, in order
    pub fn commands(&self) -> Vec<CommandPacket> {
        self.state()
            .control_log
            .iter()
            .filter(|record| record.setup.direction() == Direction::Out)
            .filter_map(|record| CommandPacket::decode(&record.data).ok())
            .collect()
    }

    /// Transfers submitted and not yet completed
    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Bulk transfers submitted and not yet completed
    pub fn bulk_in_flight(&self) -> usize {
        self.state()
            .in_flight
            .iter()
            .filter(|t| matches!(t.kind, TransferKind::BulkIn { .. }))
            .count()
    }

    pub fn allocated(&self) -> usize {
        self.state().allocated
    }

    pub fn freed(&self) -> usize {
        self.state().freed.len()
    }

    /// Transfer ids released more than once
    pub fn double_frees(&self) -> usize {
        let state = self.state();
        let mut ids = state.freed.clone();
        ids.sort_unstable();
        ids.windows(2).filter(|pair| pair[0] == pair[1]).count()
    }

    pub fn submissions(&self) -> usize {
        self.state().submissions
    }

    pub fn events_handled(&self) -> usize {
        self.state().events_handled
    }

    pub fn cancel_requests(&self) -> usize {
        self.state().cancel_requests
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.state().claimed.clone()
    }

    pub fn release_attempts(&self) -> Vec<u8> {
        self.state().release_attempts.clone()
    }
}

/// Decide whether an in-flight transfer completes on this pass
///
/// Returns the completion status and the number of data bytes written into
/// the transfer buffer.
fn settle(
    transfer: &mut InFlight,
    bulk_chunks: &mut VecDeque<Vec<u8>>,
) -> Option<(TransferStatus, usize)> {
    if transfer.cancelled {
        return Some((TransferStatus::Cancelled, 0));
    }

    match transfer.kind {
        TransferKind::Control => {
            let direction = Direction::from_request_type(transfer.buffer[0]);
            let stage_len = transfer.buffer.len() - SETUP_PACKET_LEN;
            match transfer.reply.as_ref()? {
                ControlReply::Respond(bytes) => match direction {
                    Direction::In => {
                        let len = bytes.len().min(stage_len);
                        transfer.buffer[SETUP_PACKET_LEN..SETUP_PACKET_LEN + len]
                            .copy_from_slice(&bytes[..len]);
                        Some((TransferStatus::Completed, len))
                    }
                    Direction::Out => Some((TransferStatus::Completed, stage_len)),
                },
                ControlReply::Status(status) => Some((*status, 0)),
                ControlReply::Reject(_) | ControlReply::Hang => None,
            }
        }
        TransferKind::BulkIn { .. } => {
            let chunk = bulk_chunks.pop_front()?;
            let len = chunk.len().min(transfer.buffer.len());
            transfer.buffer[..len].copy_from_slice(&chunk[..len]);
            Some((TransferStatus::Completed, len))
        }
    }
}

impl UsbTransport for MockTransport {
    type Transfer = MockTransfer;

    fn alloc_transfer(&self) -> UsbResult<MockTransfer> {
        let mut state = self.state();
        if state.fail_alloc_at == Some(state.allocated) {
            return Err(UsbError::NoMemory);
        }
        state.allocated += 1;
        let id = state.next_id;
        state.next_id += 1;
        Ok(MockTransfer { id })
    }

    fn submit(
        &self,
        transfer: &mut MockTransfer,
        request: TransferRequest,
        callback: CompletionCallback,
    ) -> UsbResult<()> {
        let mut state = self.state();
        let sequence = state.submissions;
        state.submissions += 1;

        if let Some((at, error)) = &state.fail_submit_at {
            if *at == sequence {
                return Err(error.clone());
            }
        }
        if state.in_flight.iter().any(|t| t.id == transfer.id) {
            return Err(UsbError::Busy);
        }

        let reply = match request.kind {
            TransferKind::Control => {
                let setup =
                    SetupPacket::parse(&request.buffer).map_err(|_| UsbError::InvalidParam)?;
                let data = match setup.direction() {
                    Direction::Out => request.buffer[SETUP_PACKET_LEN..].to_vec(),
                    Direction::In => Vec::new(),
                };
                state.control_log.push(ControlRecord {
                    setup,
                    data,
                    timeout: request.timeout,
                });

                match state
                    .control_replies
                    .pop_front()
                    .unwrap_or(ControlReply::Respond(Vec::new()))
                {
                    ControlReply::Reject(error) => return Err(error),
                    reply => Some(reply),
                }
            }
            TransferKind::BulkIn { .. } => None,
        };

        state.in_flight.push(InFlight {
            id: transfer.id,
            kind: request.kind,
            buffer: request.buffer,
            callback,
            reply,
            cancelled: false,
        });
        Ok(())
    }

    fn cancel(&self, transfer: &MockTransfer) -> UsbResult<()> {
        let mut state = self.state();
        state.cancel_requests += 1;
        match state
            .in_flight
            .iter_mut()
            .find(|t| t.id == transfer.id && !t.cancelled)
        {
            Some(entry) => {
                entry.cancelled = true;
                Ok(())
            }
            None => Err(UsbError::NotFound),
        }
    }

    fn free_transfer(&self, transfer: MockTransfer) {
        let mut state = self.state();
        state.in_flight.retain(|t| t.id != transfer.id);
        state.freed.push(transfer.id);
    }

    fn handle_events(&self, _timeout: Duration) -> UsbResult<()> {
        let ready = {
            let mut state = self.state();
            state.events_handled += 1;

            let step = state.event_script.pop_front().unwrap_or(EventStep::Dispatch);
            match step {
                EventStep::Fail(error) => return Err(error),
                EventStep::Detach => {
                    state.detached = true;
                    return Ok(());
                }
                EventStep::Dispatch => {}
            }

            let pending = std::mem::take(&mut state.in_flight);
            let mut ready = Vec::new();
            for mut transfer in pending {
                match settle(&mut transfer, &mut state.bulk_chunks) {
                    Some((status, len)) => ready.push((transfer, status, len)),
                    None => state.in_flight.push(transfer),
                }
            }
            ready
        };

        // Callbacks run without the state lock held
        for (mut transfer, status, len) in ready {
            let offset = match transfer.kind {
                TransferKind::Control => SETUP_PACKET_LEN,
                TransferKind::BulkIn { .. } => 0,
            };
            let rearm = {
                let InFlight {
                    buffer, callback, ..
                } = &mut transfer;
                let completion = Completion {
                    status,
                    data: &buffer[offset..offset + len],
                };
                (*callback)(&completion)
            };

            if rearm != Rearm::Resubmit || !status.allows_resubmit() {
                continue;
            }
            let mut state = self.state();
            let sequence = state.submissions;
            state.submissions += 1;
            if matches!(&state.fail_submit_at, Some((at, _)) if *at == sequence) {
                drop(state);
                (transfer.callback)(&Completion {
                    status: TransferStatus::Error,
                    data: &[],
                });
            } else {
                transfer.reply = None;
                transfer.cancelled = false;
                state.in_flight.push(transfer);
            }
        }

        Ok(())
    }

    fn is_attached(&self) -> bool {
        !self.state().detached
    }

    fn claim_interface(&self, interface: u8) -> UsbResult<()> {
        let mut state = self.state();
        if let Some(error) = state.claim_error.clone() {
            return Err(error);
        }
        if !state.claimed.contains(&interface) {
            state.claimed.push(interface);
        }
        Ok(())
    }

    fn release_interface(&self, interface: u8) -> UsbResult<()> {
        let mut state = self.state();
        state.release_attempts.push(interface);
        if let Some(error) = state.release_error.clone() {
            return Err(error);
        }
        match state.claimed.iter().position(|&i| i == interface) {
            Some(position) => {
                state.claimed.remove(position);
                Ok(())
            }
            None => Err(UsbError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bulk_request(size: usize) -> TransferRequest {
        TransferRequest {
            kind: TransferKind::BulkIn { endpoint: 0x81 },
            buffer: vec![0; size],
            timeout: Duration::ZERO,
        }
    }

    #[test]
    fn test_bulk_completion_and_resubmit() {
        let transport = MockTransport::new();
        let mut transfer = transport.alloc_transfer().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        transport
            .submit(
                &mut transfer,
                bulk_request(4),
                Box::new(move |completion| {
                    if completion.status != TransferStatus::Completed {
                        return Rearm::Release;
                    }
                    counter.fetch_add(completion.data.len(), Ordering::SeqCst);
                    Rearm::Resubmit
                }),
            )
            .unwrap();

        transport.push_bulk_chunk(vec![1, 2, 3]);
        transport.handle_events(DEFAULT_TEST_TIMEOUT).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(transport.bulk_in_flight(), 1);

        transport.cancel(&transfer).unwrap();
        assert_eq!(transport.cancel(&transfer), Err(UsbError::NotFound));
        transport.handle_events(DEFAULT_TEST_TIMEOUT).unwrap();
        assert_eq!(transport.in_flight(), 0);

        transport.free_transfer(transfer);
        assert_eq!(transport.freed(), 1);
        assert_eq!(transport.double_frees(), 0);
    }

    #[test]
    fn test_allocation_failure_is_sticky() {
        let transport = MockTransport::new();
        transport.fail_allocation_at(1);
        assert!(transport.alloc_transfer().is_ok());
        assert_eq!(transport.alloc_transfer().unwrap_err(), UsbError::NoMemory);
        assert_eq!(transport.alloc_transfer().unwrap_err(), UsbError::NoMemory);
        assert_eq!(transport.allocated(), 1);
    }

    #[test]
    fn test_release_of_unclaimed_interface_fails() {
        let transport = MockTransport::new();
        assert_eq!(transport.release_interface(1), Err(UsbError::NotFound));
        transport.claim_interface(1).unwrap();
        assert_eq!(transport.release_interface(1), Ok(()));
        assert_eq!(transport.release_attempts(), vec![1, 1]);
    }

    #[test]
    fn test_detach_step() {
        let transport = MockTransport::new();
        transport.push_event(EventStep::Detach);
        assert!(transport.is_attached());
        transport.handle_events(DEFAULT_TEST_TIMEOUT).unwrap();
        assert!(!transport.is_attached());
    }
}
