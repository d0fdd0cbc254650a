//! GreatFET logic analyzer acquisition core
//!
//! Drives the libgreat logic analyzer class over USB: blocking command
//! execution on top of asynchronous control transfers, a pool of bulk IN
//! transfers for continuous sample streaming, and the configure / start /
//! stop lifecycle that ties them together.
//!
//! # Example
//!
//! ```no_run
//! use analyzer::{AnalyzerConfig, DiscardSink, LibusbTransport, LogicAnalyzer};
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AnalyzerConfig::default();
//! let transport = Arc::new(LibusbTransport::open(
//!     config.device.vendor_id,
//!     config.device.product_id,
//! )?);
//! let mut analyzer = LogicAnalyzer::new(
//!     transport,
//!     config.acquisition.clone(),
//!     Arc::new(Mutex::new(DiscardSink)),
//! );
//!
//! analyzer.acquire()?;
//! while analyzer.is_streaming() {
//!     analyzer.poll(Duration::from_millis(100))?;
//! }
//! analyzer.cancel()?;
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod config;
pub mod device;
pub mod error;
pub mod sink;
pub mod stream;
pub mod usb;

pub use acquisition::{AcquisitionState, LogicAnalyzer};
pub use config::{AcquisitionSettings, AnalyzerConfig, DeviceSettings, LoggingSettings};
pub use device::DeviceContext;
pub use error::{Error, Result};
pub use sink::{DiscardSink, FileSink, SampleSink, SharedSink};
pub use stream::{StatsSnapshot, StreamFormat, StreamStats};
pub use usb::{
    CommandExecutor, ControlBridge, ControlData, ControlTransfer, LibusbTransport, TransferPool,
};
