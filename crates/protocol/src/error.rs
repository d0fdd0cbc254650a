//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Command payload does not fit in a single libgreat packet
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Response shorter than the fixed layout it is parsed as
    #[error("Response too short: expected {expected} bytes, got {actual}")]
    ResponseTooShort { expected: usize, actual: usize },

    /// Packet or setup header truncated before its fixed header ended
    #[error("Incomplete packet: expected at least {expected} bytes, got {actual}")]
    IncompletePacket { expected: usize, actual: usize },

    /// Device negotiated an endpoint that cannot carry IN samples
    #[error("Unexpected streaming endpoint {0:#04x}")]
    UnexpectedEndpoint(u8),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
