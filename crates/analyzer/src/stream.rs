//! Sample stream description, counters and the bulk completion handler

use crate::sink::SharedSink;
use common::{Completion, Rearm, TransferStatus};
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{trace, warn};

/// Layout of the samples arriving on the streaming endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Negotiated sample rate
    pub sample_rate_hz: u32,
    pub num_channels: u8,
    pub endpoint: u8,
}

impl StreamFormat {
    /// Bytes per sample: one bit per channel, rounded up
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.num_channels).div_ceil(8).max(1)
    }
}

/// Counters for the current acquisition
#[derive(Debug, Default)]
pub struct StreamStats {
    transfers: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Bulk transfers completed
    pub transfers: u64,
    /// Sample bytes handed to the sink
    pub bytes: u64,
    /// Completions that ended the slot with an error
    pub errors: u64,
}

impl StreamStats {
    pub fn record_transfer(&self, len: usize) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.transfers.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transfers: self.transfers.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Build the completion handler shared by every streaming slot
///
/// Completed transfers go to the sink and are rearmed while `running` is
/// set. Once it is cleared, late data is dropped so the sink sees nothing
/// after its stop notification. Timeouts are rearmed too. Cancellation,
/// disconnection and errors release the slot.
pub fn streaming_callback(
    sink: SharedSink,
    format: StreamFormat,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
) -> impl FnMut(&Completion<'_>) -> Rearm + Clone + Send + 'static {
    move |completion: &Completion<'_>| {
        let active = running.load(Ordering::Acquire);
        let rearm = if active {
            Rearm::Resubmit
        } else {
            Rearm::Release
        };

        match completion.status {
            TransferStatus::Completed if !active => {
                trace!(
                    "Dropping {} sample bytes received after stop",
                    completion.data.len()
                );
                rearm
            }
            TransferStatus::Completed => {
                stats.record_transfer(completion.data.len());
                if !completion.data.is_empty() {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .deliver(completion.data, &format);
                }
                trace!("Delivered {} sample bytes", completion.data.len());
                rearm
            }
            TransferStatus::TimedOut => {
                trace!("Bulk transfer timed out");
                rearm
            }
            TransferStatus::Cancelled => {
                trace!("Bulk transfer cancelled");
                Rearm::Release
            }
            TransferStatus::NoDevice => {
                warn!("Device disconnected while streaming");
                stats.record_error();
                running.store(false, Ordering::Release);
                Rearm::Release
            }
            status => {
                warn!("Bulk transfer failed: {:?}", status);
                stats.record_error();
                Rearm::Release
            }
        }
    }
}
