//! libgreat command protocol for the GreatFET logic analyzer
//!
//! This crate defines the packets exchanged with GreatFET firmware over the
//! vendor control request: the class/verb command packet, the logic analyzer
//! payloads and responses, and the USB setup header used to carry them.
//! All encoding is explicit little-endian at fixed offsets.
//!
//! # Example
//!
//! ```
//! use protocol::{CommandPacket, ConfigurePayload, ConfigureResponse};
//!
//! // Ask for 1 MHz on four channels
//! let packet = ConfigurePayload { sample_rate_hz: 1_000_000, num_channels: 4 }
//!     .into_packet()
//!     .unwrap();
//! let wire = packet.encode();
//! assert_eq!(&wire[8..], &[0x40, 0x42, 0x0f, 0x00, 0x04]);
//!
//! // Firmware-side view of the same bytes
//! let decoded = CommandPacket::decode(&wire).unwrap();
//! assert_eq!(decoded.payload(), packet.payload());
//!
//! // Parse the negotiated streaming parameters
//! let response = ConfigureResponse::decode(&[0x40, 0x42, 0x0f, 0, 0, 0, 1, 0, 0x82]).unwrap();
//! assert_eq!(response.endpoint, 0x82);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use codec::{CommandPacket, SETUP_PACKET_LEN, SetupPacket};
pub use error::{ProtocolError, Result};
pub use messages::{ConfigurePayload, ConfigureResponse, StartPayload, start_packet, stop_packet};
pub use types::{
    CLASS_CORE, CLASS_LOGIC_ANALYZER, COMMAND_HEADER_LEN, CORE_VERB_READ_SERIAL,
    CORE_VERB_READ_VERSION, Direction, FLAG_SKIP_RESPONSE, LA_VERB_CONFIGURE, LA_VERB_START,
    LA_VERB_STOP, LIBGREAT_REQUEST_NUMBER, LIBGREAT_VALUE_EXECUTE, MAX_PAYLOAD_LEN,
    MAX_STRING_LEN, STREAMING_INTERFACE, is_in_endpoint,
};
