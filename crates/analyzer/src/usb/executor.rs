//! libgreat command execution
//!
//! A command goes out as an OUT control transfer carrying the encoded
//! packet. When the caller wants a response, a second IN transfer reads it
//! back; otherwise the skip-response flag tells the firmware not to queue
//! one.

use crate::usb::bridge::{ControlData, ControlTransfer};
use common::UsbResult;
use protocol::{
    CLASS_CORE, CORE_VERB_READ_SERIAL, CORE_VERB_READ_VERSION, CommandPacket, FLAG_SKIP_RESPONSE,
    LIBGREAT_REQUEST_NUMBER, LIBGREAT_VALUE_EXECUTE, MAX_STRING_LEN,
};
use std::time::Duration;
use tracing::{debug, error, trace};

/// Runs libgreat commands over a blocking control channel
pub struct CommandExecutor<C> {
    control: C,
}

impl<C: ControlTransfer> CommandExecutor<C> {
    pub fn new(control: C) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Send `packet` and optionally read its response
    ///
    /// An absent or empty `response` buffer sends the command with the
    /// skip-response flag and returns 0. Otherwise returns the number of
    /// response bytes received.
    ///
    /// A busy device is passed back silently so callers can retry.
    pub fn execute(
        &mut self,
        packet: &CommandPacket,
        response: Option<&mut [u8]>,
        timeout: Duration,
    ) -> UsbResult<usize> {
        let response = response.filter(|buffer| !buffer.is_empty());
        let flags = if response.is_some() {
            0
        } else {
            FLAG_SKIP_RESPONSE
        };

        trace!(
            "Executing command class {:#x} verb {:#x} ({} payload bytes)",
            packet.class(),
            packet.verb(),
            packet.payload().len()
        );

        let wire = packet.encode();
        if let Err(e) = self.control.control_transfer(
            LIBGREAT_REQUEST_NUMBER,
            LIBGREAT_VALUE_EXECUTE,
            flags,
            ControlData::Out(&wire),
            timeout,
        ) {
            if e.is_busy() {
                trace!("Device busy, command not accepted");
            } else {
                error!("Failed to submit command: {}", e);
            }
            return Err(e);
        }

        let Some(buffer) = response else {
            return Ok(0);
        };

        self.control
            .control_transfer(
                LIBGREAT_REQUEST_NUMBER,
                LIBGREAT_VALUE_EXECUTE,
                0,
                ControlData::In(buffer),
                timeout,
            )
            .map_err(|e| {
                error!("Failed to read command response: {}", e);
                e
            })
    }

    /// Read a string from the core class
    ///
    /// The string ends at the reported length or the first NUL, whichever
    /// comes first. Any failure yields `None`.
    pub fn read_core_string(&mut self, verb: u32, timeout: Duration) -> Option<String> {
        let packet = CommandPacket::header_only(CLASS_CORE, verb);
        let mut buffer = [0u8; MAX_STRING_LEN];

        let len = match self.execute(&packet, Some(&mut buffer), timeout) {
            Ok(len) => len,
            Err(e) => {
                debug!("Core string {:#x} unavailable: {}", verb, e);
                return None;
            }
        };

        let bytes = &buffer[..len];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
        Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Firmware version string
    pub fn version(&mut self, timeout: Duration) -> Option<String> {
        let version = self.read_core_string(CORE_VERB_READ_VERSION, timeout);
        debug!("GreatFET firmware version: {:?}", version);
        version
    }

    /// Board serial number
    pub fn serial_number(&mut self, timeout: Duration) -> Option<String> {
        let serial = self.read_core_string(CORE_VERB_READ_SERIAL, timeout);
        debug!("GreatFET serial number: {:?}", serial);
        serial
    }
}
