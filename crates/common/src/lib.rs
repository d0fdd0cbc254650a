//! Common utilities for greatfet-logic
//!
//! This crate provides the pieces shared between the analyzer core and its
//! tests: the USB error taxonomy, the asynchronous transport seam and its
//! transfer types, and logging setup. The scripted mock transport in
//! `test_utils` is only built for tests and under the `test-utils` feature.

pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;
pub mod usb_types;

pub use error::{Error, Result, UsbError, UsbResult};
pub use logging::{setup_logging, setup_test_logging};
pub use transport::UsbTransport;
pub use usb_types::{
    Completion, CompletionCallback, Rearm, TransferKind, TransferRequest, TransferStatus,
};
