//! Byte-level encoding of libgreat command packets and USB setup headers
//!
//! Every multi-byte field is little-endian and written at a fixed offset;
//! nothing here depends on native struct layout.
//!
//! # Command Packet Format
//!
//! ```text
//! [class: u32 LE][verb: u32 LE][payload: 0..=1024 bytes]
//! ```
//!
//! The payload length travels implicitly as the control transfer's
//! `wLength`; it is never written into the packet itself.

use crate::error::{ProtocolError, Result};
use crate::types::{COMMAND_HEADER_LEN, Direction, MAX_PAYLOAD_LEN};
use bytes::{Buf, BufMut};
use std::fmt;

/// Length of a USB control setup header
pub const SETUP_PACKET_LEN: usize = 8;

/// A libgreat command: class, verb and a bounded payload
///
/// The payload lives in a fixed-capacity array so a packet can never hold
/// more than [`MAX_PAYLOAD_LEN`] bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandPacket {
    class: u32,
    verb: u32,
    payload: [u8; MAX_PAYLOAD_LEN],
    payload_len: usize,
}

impl CommandPacket {
    /// Build a packet, rejecting payloads that exceed the packet capacity
    ///
    /// # Example
    /// ```
    /// use protocol::{CommandPacket, CLASS_LOGIC_ANALYZER, LA_VERB_START};
    ///
    /// let packet = CommandPacket::new(CLASS_LOGIC_ANALYZER, LA_VERB_START, &[]).unwrap();
    /// assert_eq!(packet.wire_len(), 8);
    /// ```
    pub fn new(class: u32, verb: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut buffer = [0u8; MAX_PAYLOAD_LEN];
        buffer[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            class,
            verb,
            payload: buffer,
            payload_len: payload.len(),
        })
    }

    /// Build a command that carries no payload
    pub fn header_only(class: u32, verb: u32) -> Self {
        Self {
            class,
            verb,
            payload: [0u8; MAX_PAYLOAD_LEN],
            payload_len: 0,
        }
    }

    pub fn class(&self) -> u32 {
        self.class
    }

    pub fn verb(&self) -> u32 {
        self.verb
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len]
    }

    /// Number of bytes sent on the wire: header plus used payload
    pub fn wire_len(&self) -> usize {
        COMMAND_HEADER_LEN + self.payload_len
    }

    /// Serialize into the wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.put_u32_le(self.class);
        buf.put_u32_le(self.verb);
        buf.put_slice(self.payload());
        buf
    }

    /// Parse a packet the way the firmware does on receipt
    ///
    /// Everything after the two header words is payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < COMMAND_HEADER_LEN {
            return Err(ProtocolError::IncompletePacket {
                expected: COMMAND_HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let mut cursor = bytes;
        let class = cursor.get_u32_le();
        let verb = cursor.get_u32_le();
        Self::new(class, verb, cursor)
    }
}

impl fmt::Debug for CommandPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPacket")
            .field("class", &format_args!("{:#x}", self.class))
            .field("verb", &format_args!("{:#x}", self.verb))
            .field("payload_len", &self.payload_len)
            .finish()
    }
}

/// Standard USB control setup header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Direction of the data stage
    pub fn direction(&self) -> Direction {
        Direction::from_request_type(self.request_type)
    }

    /// Append the 8-byte header to `buf`
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.request_type);
        buf.put_u8(self.request);
        buf.put_u16_le(self.value);
        buf.put_u16_le(self.index);
        buf.put_u16_le(self.length);
    }

    pub fn to_bytes(&self) -> [u8; SETUP_PACKET_LEN] {
        let mut bytes = [0u8; SETUP_PACKET_LEN];
        let mut cursor = &mut bytes[..];
        self.write_to(&mut cursor);
        bytes
    }

    /// Parse the header at the start of a control transfer buffer
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SETUP_PACKET_LEN {
            return Err(ProtocolError::IncompletePacket {
                expected: SETUP_PACKET_LEN,
                actual: bytes.len(),
            });
        }

        let mut cursor = bytes;
        Ok(Self {
            request_type: cursor.get_u8(),
            request: cursor.get_u8(),
            value: cursor.get_u16_le(),
            index: cursor.get_u16_le(),
            length: cursor.get_u16_le(),
        })
    }
}
