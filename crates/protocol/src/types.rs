//! libgreat protocol constants and control request helpers
//!
//! The GreatFET exposes every libgreat command through a single vendor
//! control request on endpoint 0. The class/verb pair inside the command
//! packet selects what the firmware does.

/// Vendor request number used for every libgreat command
pub const LIBGREAT_REQUEST_NUMBER: u8 = 0x65;

/// `wValue` selecting "execute command"
pub const LIBGREAT_VALUE_EXECUTE: u16 = 0;

/// `wIndex` flag: firmware must not queue a response for this command
pub const FLAG_SKIP_RESPONSE: u16 = 1 << 0;

/// Maximum payload bytes carried by a single command packet
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// Maximum length of identity strings returned by the core class
pub const MAX_STRING_LEN: usize = 128;

/// Size of the class + verb header preceding the payload on the wire
pub const COMMAND_HEADER_LEN: usize = 2 * std::mem::size_of::<u32>();

/// Core class: board identity and housekeeping
pub const CLASS_CORE: u32 = 0x000;

/// Core verb: read firmware version string
pub const CORE_VERB_READ_VERSION: u32 = 0x1;

/// Core verb: read board serial number string
pub const CORE_VERB_READ_SERIAL: u32 = 0x3;

/// Logic analyzer class
pub const CLASS_LOGIC_ANALYZER: u32 = 0x10d;

/// Logic analyzer verb: negotiate rate/channels, returns the streaming endpoint
pub const LA_VERB_CONFIGURE: u32 = 0x0;

/// Logic analyzer verb: begin streaming samples
pub const LA_VERB_START: u32 = 0x3;

/// Logic analyzer verb: halt streaming
pub const LA_VERB_STOP: u32 = 0x4;

/// Interface carrying the bulk sample endpoint
pub const STREAMING_INTERFACE: u8 = 1;

/// Direction of a control transfer's data stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// `bmRequestType` bit masks
pub mod request_type {
    /// Data stage direction bit (set = device to host)
    pub const DIRECTION_IN: u8 = 0x80;
    /// Vendor-defined request type
    pub const TYPE_VENDOR: u8 = 0x40;
    /// Recipient: endpoint
    pub const RECIPIENT_ENDPOINT: u8 = 0x02;
}

impl Direction {
    /// Direction encoded in a `bmRequestType` byte
    pub fn from_request_type(bm_request_type: u8) -> Self {
        if bm_request_type & request_type::DIRECTION_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// `bmRequestType` used for libgreat commands in this direction
    pub fn vendor_request_type(self) -> u8 {
        let base = request_type::TYPE_VENDOR | request_type::RECIPIENT_ENDPOINT;
        match self {
            Direction::Out => base,
            Direction::In => base | request_type::DIRECTION_IN,
        }
    }
}

/// True if `endpoint` is an IN (device to host) endpoint address
pub fn is_in_endpoint(endpoint: u8) -> bool {
    endpoint & request_type::DIRECTION_IN != 0
}
