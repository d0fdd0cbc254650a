//! Per-device acquisition parameters

use crate::stream::StreamFormat;
use protocol::ConfigureResponse;

/// Requested and negotiated acquisition parameters for one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceContext {
    /// Rate requested by the host
    pub sample_rate_hz: u64,
    /// Channels requested by the host
    pub num_channels: u8,
    /// Rate the firmware actually configured
    pub achieved_rate_hz: Option<u32>,
    /// Firmware-side sample buffer size in bytes
    pub buffer_size: Option<u32>,
    /// Bulk IN endpoint carrying samples
    pub endpoint: Option<u8>,
}

impl DeviceContext {
    pub fn new(sample_rate_hz: u64, num_channels: u8) -> Self {
        Self {
            sample_rate_hz,
            num_channels,
            ..Self::default()
        }
    }

    /// Record what the firmware agreed to
    pub fn apply(&mut self, response: &ConfigureResponse) {
        self.achieved_rate_hz = Some(response.achieved_rate_hz);
        self.buffer_size = Some(response.buffer_size);
        self.endpoint = Some(response.endpoint);
    }

    /// Forget any negotiated parameters
    pub fn clear_negotiated(&mut self) {
        self.achieved_rate_hz = None;
        self.buffer_size = None;
        self.endpoint = None;
    }

    /// Format of the sample stream, once configuration has succeeded
    pub fn stream_format(&self) -> Option<StreamFormat> {
        Some(StreamFormat {
            sample_rate_hz: self.achieved_rate_hz?,
            num_channels: self.num_channels,
            endpoint: self.endpoint?,
        })
    }
}
