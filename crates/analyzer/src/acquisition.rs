//! Acquisition lifecycle controller
//!
//! Owns the device context, the command executor and the streaming transfer
//! pool for one GreatFET, and sequences them through configure, start, stop
//! and cancel.

use crate::config::AcquisitionSettings;
use crate::device::DeviceContext;
use crate::error::{Error, Result};
use crate::sink::SharedSink;
use crate::stream::{StatsSnapshot, StreamFormat, StreamStats, streaming_callback};
use crate::usb::{CommandExecutor, ControlBridge, TransferPool};
use common::{UsbError, UsbTransport};
use protocol::{
    ConfigurePayload, ConfigureResponse, STREAMING_INTERFACE, start_packet, stop_packet,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Event loop passes spent draining cancellations on teardown
const TEARDOWN_DRAIN_PASSES: usize = 8;

/// Where the controller is in the acquisition lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Configuring,
    Configured,
    Streaming,
    Stopping,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Configuring => "configuring",
            AcquisitionState::Configured => "configured",
            AcquisitionState::Streaming => "streaming",
            AcquisitionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Drives one logic analyzer from configuration to streaming and back
pub struct LogicAnalyzer<T: UsbTransport> {
    transport: Arc<T>,
    executor: CommandExecutor<ControlBridge<T>>,
    pool: TransferPool<T>,
    context: DeviceContext,
    settings: AcquisitionSettings,
    state: AcquisitionState,
    sink: SharedSink,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
}

impl<T: UsbTransport> LogicAnalyzer<T> {
    pub fn new(transport: Arc<T>, settings: AcquisitionSettings, sink: SharedSink) -> Self {
        Self {
            executor: CommandExecutor::new(ControlBridge::new(transport.clone())),
            pool: TransferPool::new(transport.clone(), settings.transfer_buffer_size),
            context: DeviceContext::new(settings.sample_rate_hz, settings.num_channels),
            transport,
            settings,
            state: AcquisitionState::Idle,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(StreamStats::default()),
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Change the requested rate; takes effect on the next configure
    pub fn set_sample_rate(&mut self, sample_rate_hz: u64) {
        self.context.sample_rate_hz = sample_rate_hz;
    }

    /// Change the requested channel count; takes effect on the next configure
    pub fn set_num_channels(&mut self, num_channels: u8) {
        self.context.num_channels = num_channels;
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn pool(&self) -> &TransferPool<T> {
        &self.pool
    }

    /// True while samples are expected to flow
    pub fn is_streaming(&self) -> bool {
        self.state == AcquisitionState::Streaming && self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn version(&mut self) -> Option<String> {
        self.executor.version(self.settings.command_timeout())
    }

    pub fn serial_number(&mut self) -> Option<String> {
        self.executor.serial_number(self.settings.command_timeout())
    }

    pub fn allocate_transfers(&mut self) -> Result<()> {
        self.pool.allocate(self.settings.transfer_pool_size)?;
        Ok(())
    }

    pub fn free_transfers(&mut self) {
        self.pool.free_all();
    }

    /// Negotiate rate and channels with the firmware and claim the
    /// streaming interface
    pub fn configure(&mut self) -> Result<ConfigureResponse> {
        if self.state == AcquisitionState::Streaming {
            return Err(Error::InvalidState {
                operation: "configure",
                state: self.state,
            });
        }

        self.state = AcquisitionState::Configuring;
        match self.negotiate() {
            Ok(response) => {
                self.state = AcquisitionState::Configured;
                Ok(response)
            }
            Err(e) => {
                self.context.clear_negotiated();
                self.state = AcquisitionState::Idle;
                Err(e)
            }
        }
    }

    fn negotiate(&mut self) -> Result<ConfigureResponse> {
        let sample_rate_hz = u32::try_from(self.context.sample_rate_hz).map_err(|_| {
            Error::InvalidSettings(format!(
                "sample rate {} Hz does not fit the configure command",
                self.context.sample_rate_hz
            ))
        })?;

        debug!(
            "Configuring {} channels at {} Hz",
            self.context.num_channels, sample_rate_hz
        );
        let packet = ConfigurePayload {
            sample_rate_hz,
            num_channels: self.context.num_channels,
        }
        .into_packet()?;

        let mut buffer = [0u8; ConfigureResponse::LEN];
        let len = self
            .executor
            .execute(&packet, Some(&mut buffer), self.settings.command_timeout())
            .map_err(|source| Error::Command {
                command: "configure",
                source,
            })?;

        let response = ConfigureResponse::decode(&buffer[..len])?;
        response.validate()?;
        self.context.apply(&response);
        debug!(
            "Firmware achieved {} Hz, buffer {} bytes, endpoint {:#04x}",
            response.achieved_rate_hz, response.buffer_size, response.endpoint
        );

        self.transport
            .claim_interface(STREAMING_INTERFACE)
            .map_err(|e| {
                error!("Failed to claim interface {}: {}", STREAMING_INTERFACE, e);
                Error::Usb(e)
            })?;

        info!(
            "Configured for {} channels at {} Hz",
            self.context.num_channels, response.achieved_rate_hz
        );
        Ok(response)
    }

    /// Tell the firmware to start sampling and arm the streaming pool
    pub fn start(&mut self) -> Result<()> {
        if self.state != AcquisitionState::Configured {
            return Err(Error::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        let armed = self.pool.armed();
        if armed > 0 {
            return Err(Error::TransfersPending { armed });
        }
        let format = self.context.stream_format().ok_or(Error::InvalidState {
            operation: "start",
            state: self.state,
        })?;

        if let Err(source) =
            self.executor
                .execute(&start_packet(), None, self.settings.command_timeout())
        {
            self.state = AcquisitionState::Idle;
            return Err(Error::Command {
                command: "start",
                source,
            });
        }

        info!("Acquisition started");
        self.stats.reset();
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acquisition_started(&format);
        self.running.store(true, Ordering::Release);

        if let Err(e) = self.arm_streaming(format) {
            error!("Failed to arm sample streaming: {}", e);
            if let Err(stop_err) = self.stop() {
                warn!("Stopping after failed start: {}", stop_err);
            }
            return Err(e);
        }

        self.state = AcquisitionState::Streaming;
        Ok(())
    }

    fn arm_streaming(&mut self, format: StreamFormat) -> Result<()> {
        if self.pool.is_empty() {
            self.pool.allocate(self.settings.transfer_pool_size)?;
        }
        let callback = streaming_callback(
            self.sink.clone(),
            format,
            self.running.clone(),
            self.stats.clone(),
        );
        self.pool.prepare_and_submit(format.endpoint, callback)?;
        Ok(())
    }

    /// Halt streaming on the firmware side
    ///
    /// Outstanding transfers are not cancelled; they are released as they
    /// complete. Valid in any state.
    pub fn stop(&mut self) -> Result<()> {
        info!("Stopping acquisition");
        self.state = AcquisitionState::Stopping;
        self.running.store(false, Ordering::Release);

        if let Err(e) = self.transport.release_interface(STREAMING_INTERFACE) {
            warn!("Failed to release interface {}: {}", STREAMING_INTERFACE, e);
        }

        let result = self
            .executor
            .execute(&stop_packet(), None, self.settings.stop_timeout());

        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acquisition_stopped();
        self.state = AcquisitionState::Idle;

        result.map(|_| ()).map_err(|source| Error::Command {
            command: "stop",
            source,
        })
    }

    /// Cancel every outstanding transfer, then stop
    pub fn cancel(&mut self) -> Result<()> {
        if let Err(e) = self.pool.cancel_all() {
            debug!("Cancelling streaming transfers: {}", e);
        }
        self.stop()
    }

    /// Configure and start in one step
    pub fn acquire(&mut self) -> Result<()> {
        self.configure()?;
        self.start()
    }

    /// Process transport events, running completion callbacks
    pub fn poll(&self, timeout: Duration) -> Result<()> {
        match self.transport.handle_events(timeout) {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => Ok(()),
            Err(e) => Err(Error::Usb(e)),
        }
    }

    /// Cancel anything still armed, give outstanding completions a few
    /// event loop passes to land, then release the pool
    pub fn teardown(&mut self) {
        self.running.store(false, Ordering::Release);
        if !self.pool.is_empty() {
            if let Err(e) = self.pool.cancel_all() {
                debug!("Cancelling transfers on teardown: {}", e);
            }
            for _ in 0..TEARDOWN_DRAIN_PASSES {
                match self.transport.handle_events(Duration::from_millis(10)) {
                    Ok(()) => {}
                    Err(UsbError::Interrupted) => {}
                    Err(e) => {
                        debug!("Event handling during teardown: {}", e);
                        break;
                    }
                }
            }
        }
        self.pool.free_all();
    }
}

impl<T: UsbTransport> Drop for LogicAnalyzer<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
