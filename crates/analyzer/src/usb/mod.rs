//! USB layer
//!
//! The transport seam lives in `common`; this module builds the blocking
//! command path and the streaming transfer pool on top of it, and provides
//! the libusb implementation used against real hardware.

pub mod bridge;
pub mod executor;
pub mod libusb;
pub mod pool;

pub use bridge::{ControlBridge, ControlData, ControlTransfer};
pub use executor::CommandExecutor;
pub use libusb::{LibusbTransfer, LibusbTransport};
pub use pool::TransferPool;
