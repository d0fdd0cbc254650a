//! Logic analyzer command payloads and responses

use crate::codec::CommandPacket;
use crate::error::{ProtocolError, Result};
use crate::types::{
    CLASS_LOGIC_ANALYZER, LA_VERB_CONFIGURE, LA_VERB_START, LA_VERB_STOP, is_in_endpoint,
};
use bytes::{Buf, BufMut};

/// Payload of the configure verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurePayload {
    pub sample_rate_hz: u32,
    pub num_channels: u8,
}

impl ConfigurePayload {
    pub const LEN: usize = 5;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        let mut cursor = &mut bytes[..];
        cursor.put_u32_le(self.sample_rate_hz);
        cursor.put_u8(self.num_channels);
        bytes
    }

    /// Wrap the payload in a logic analyzer configure command
    pub fn into_packet(self) -> Result<CommandPacket> {
        CommandPacket::new(CLASS_LOGIC_ANALYZER, LA_VERB_CONFIGURE, &self.encode())
    }
}

/// Start verb payload layout
///
/// Not sent: [`start_packet`] issues the verb empty and the firmware uses
/// the rate from the preceding configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPayload {
    pub sample_rate_hz: u32,
}

impl StartPayload {
    pub const LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::LEN] {
        self.sample_rate_hz.to_le_bytes()
    }
}

/// Response to the configure verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureResponse {
    pub achieved_rate_hz: u32,
    pub buffer_size: u32,
    pub endpoint: u8,
}

impl ConfigureResponse {
    /// Bytes occupied on the wire; firmware may append padding after this
    pub const LEN: usize = 9;

    /// Parse the fixed-offset layout `u32 | u32 | u8`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::LEN {
            return Err(ProtocolError::ResponseTooShort {
                expected: Self::LEN,
                actual: bytes.len(),
            });
        }

        let mut cursor = bytes;
        Ok(Self {
            achieved_rate_hz: cursor.get_u32_le(),
            buffer_size: cursor.get_u32_le(),
            endpoint: cursor.get_u8(),
        })
    }

    /// Serialize as the firmware would send it
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        let mut cursor = &mut bytes[..];
        cursor.put_u32_le(self.achieved_rate_hz);
        cursor.put_u32_le(self.buffer_size);
        cursor.put_u8(self.endpoint);
        bytes
    }

    /// Reject endpoints that cannot stream samples to the host
    pub fn validate(&self) -> Result<()> {
        if !is_in_endpoint(self.endpoint) {
            return Err(ProtocolError::UnexpectedEndpoint(self.endpoint));
        }
        Ok(())
    }
}

/// Start command: no payload, no response
///
/// See [`StartPayload`] for the layout the verb also accepts.
pub fn start_packet() -> CommandPacket {
    CommandPacket::header_only(CLASS_LOGIC_ANALYZER, LA_VERB_START)
}

/// Stop command: no payload, no response
pub fn stop_packet() -> CommandPacket {
    CommandPacket::header_only(CLASS_LOGIC_ANALYZER, LA_VERB_STOP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_payload_bytes() {
        let payload = ConfigurePayload {
            sample_rate_hz: 1_000_000,
            num_channels: 4,
        };
        assert_eq!(payload.encode(), [0x40, 0x42, 0x0f, 0x00, 0x04]);

        let packet = payload.into_packet().unwrap();
        assert_eq!(packet.class(), CLASS_LOGIC_ANALYZER);
        assert_eq!(packet.verb(), LA_VERB_CONFIGURE);
        assert_eq!(packet.wire_len(), 8 + ConfigurePayload::LEN);
    }

    #[test]
    fn test_start_payload_bytes() {
        let payload = StartPayload {
            sample_rate_hz: 0x0102_0304,
        };
        assert_eq!(payload.encode(), [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_configure_response_decode() {
        let response = ConfigureResponse::decode(&[
            0x40, 0x42, 0x0f, 0x00, 0x00, 0x00, 0x01, 0x00, 0x82,
        ])
        .unwrap();
        assert_eq!(response.achieved_rate_hz, 1_000_000);
        assert_eq!(response.buffer_size, 65536);
        assert_eq!(response.endpoint, 0x82);
        assert!(response.validate().is_ok());
    }

    #[test]
    fn test_configure_response_ignores_padding() {
        let mut bytes = ConfigureResponse {
            achieved_rate_hz: 20_000_000,
            buffer_size: 4096,
            endpoint: 0x81,
        }
        .encode()
        .to_vec();
        bytes.extend_from_slice(&[0, 0, 0]);

        let response = ConfigureResponse::decode(&bytes).unwrap();
        assert_eq!(response.endpoint, 0x81);
    }

    #[test]
    fn test_configure_response_too_short() {
        let err = ConfigureResponse::decode(&[0; 8]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ResponseTooShort {
                expected: 9,
                actual: 8
            }
        );
    }

    #[test]
    fn test_out_endpoint_rejected() {
        let response = ConfigureResponse {
            achieved_rate_hz: 1,
            buffer_size: 1,
            endpoint: 0x02,
        };
        assert_eq!(
            response.validate(),
            Err(ProtocolError::UnexpectedEndpoint(0x02))
        );
    }

    #[test]
    fn test_start_stop_are_header_only() {
        assert!(start_packet().payload().is_empty());
        assert_eq!(stop_packet().verb(), LA_VERB_STOP);
    }
}
