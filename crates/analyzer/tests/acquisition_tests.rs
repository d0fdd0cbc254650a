//! Lifecycle scenarios against the scripted mock transport

use analyzer::{
    AcquisitionSettings, AcquisitionState, Error, LogicAnalyzer, SampleSink, StreamFormat,
};
use common::UsbError;
use common::test_utils::{ControlReply, MockTransport};
use protocol::{
    CLASS_LOGIC_ANALYZER, ConfigureResponse, Direction, FLAG_SKIP_RESPONSE, LA_VERB_CONFIGURE,
    LA_VERB_START, LA_VERB_STOP, ProtocolError, STREAMING_INTERFACE,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const POOL_SIZE: usize = 4;
const BUFFER_SIZE: usize = 512;

#[derive(Default)]
struct RecordingSink {
    started: Vec<StreamFormat>,
    stopped: usize,
    samples: Vec<u8>,
}

impl SampleSink for RecordingSink {
    fn acquisition_started(&mut self, format: &StreamFormat) {
        self.started.push(*format);
    }

    fn deliver(&mut self, samples: &[u8], _format: &StreamFormat) {
        self.samples.extend_from_slice(samples);
    }

    fn acquisition_stopped(&mut self) {
        self.stopped += 1;
    }
}

struct Harness {
    transport: Arc<MockTransport>,
    sink: Arc<Mutex<RecordingSink>>,
    analyzer: LogicAnalyzer<MockTransport>,
}

fn harness() -> Harness {
    common::setup_test_logging();

    let transport = Arc::new(MockTransport::new());
    let sink = Arc::new(Mutex::new(RecordingSink::default()));
    let settings = AcquisitionSettings {
        sample_rate_hz: 1_000_000,
        num_channels: 4,
        transfer_pool_size: POOL_SIZE,
        transfer_buffer_size: BUFFER_SIZE,
        ..AcquisitionSettings::default()
    };
    let analyzer = LogicAnalyzer::new(transport.clone(), settings, sink.clone());

    Harness {
        transport,
        sink,
        analyzer,
    }
}

fn configure_response(endpoint: u8) -> [u8; ConfigureResponse::LEN] {
    ConfigureResponse {
        achieved_rate_hz: 1_000_000,
        buffer_size: 65536,
        endpoint,
    }
    .encode()
}

fn verbs(transport: &MockTransport) -> Vec<u32> {
    transport.commands().iter().map(|c| c.verb()).collect()
}

mod configure {
    use super::*;

    #[test]
    fn test_configure_negotiates_endpoint() {
        let mut h = harness();
        h.transport.queue_command_response(&configure_response(0x82));

        let response = h.analyzer.configure().unwrap();
        assert_eq!(response.endpoint, 0x82);
        assert_eq!(h.analyzer.state(), AcquisitionState::Configured);
        assert_eq!(h.analyzer.context().endpoint, Some(0x82));
        assert_eq!(h.analyzer.context().achieved_rate_hz, Some(1_000_000));
        assert_eq!(h.analyzer.context().buffer_size, Some(65536));

        let commands = h.transport.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].class(), CLASS_LOGIC_ANALYZER);
        assert_eq!(commands[0].verb(), LA_VERB_CONFIGURE);
        assert_eq!(commands[0].payload(), &[0x40, 0x42, 0x0f, 0x00, 0x04]);

        let log = h.transport.control_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].setup.index, 0);
        assert_eq!(log[1].setup.direction(), Direction::In);
        assert_eq!(usize::from(log[1].setup.length), ConfigureResponse::LEN);

        assert_eq!(h.transport.claimed_interfaces(), vec![STREAMING_INTERFACE]);
    }

    #[test]
    fn test_short_response_rejected() {
        let mut h = harness();
        h.transport.queue_command_response(&[0; 8]);

        let err = h.analyzer.configure().unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::ResponseTooShort {
                expected: 9,
                actual: 8
            })
        ));
        assert_eq!(h.analyzer.state(), AcquisitionState::Idle);
        assert_eq!(h.analyzer.context().endpoint, None);
        assert!(h.transport.claimed_interfaces().is_empty());
    }

    #[test]
    fn test_out_endpoint_rejected() {
        let mut h = harness();
        h.transport.queue_command_response(&configure_response(0x02));

        let err = h.analyzer.configure().unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnexpectedEndpoint(0x02))
        ));
        assert_eq!(h.analyzer.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_busy_device_reports_command_error() {
        let mut h = harness();
        h.transport
            .push_control_reply(ControlReply::Reject(UsbError::Busy));

        let err = h.analyzer.configure().unwrap_err();
        assert!(err.is_busy());
        assert!(matches!(
            err,
            Error::Command {
                command: "configure",
                ..
            }
        ));
        assert_eq!(h.transport.control_log().len(), 1);
    }

    #[test]
    fn test_claim_failure_propagates() {
        let mut h = harness();
        h.transport.queue_command_response(&configure_response(0x81));
        h.transport.set_claim_error(UsbError::Access);

        let err = h.analyzer.configure().unwrap_err();
        assert!(matches!(err, Error::Usb(UsbError::Access)));
        assert_eq!(h.analyzer.state(), AcquisitionState::Idle);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_stop_without_start() {
        let mut h = harness();

        h.analyzer.stop().unwrap();

        assert_eq!(h.transport.release_attempts(), vec![STREAMING_INTERFACE]);
        assert_eq!(verbs(&h.transport), vec![LA_VERB_STOP]);
        assert_eq!(h.transport.control_log()[0].setup.index, FLAG_SKIP_RESPONSE);
        assert_eq!(h.analyzer.state(), AcquisitionState::Idle);
        assert_eq!(h.sink.lock().unwrap().stopped, 1);
    }

    #[test]
    fn test_stop_command_failure() {
        let mut h = harness();
        h.transport.push_control_reply(ControlReply::Status(
            common::TransferStatus::Stall,
        ));

        let err = h.analyzer.stop().unwrap_err();
        assert!(matches!(
            err,
            Error::Command {
                command: "stop",
                source: UsbError::Pipe
            }
        ));
        assert_eq!(h.analyzer.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_start_failure_returns_to_idle() {
        let mut h = harness();
        h.transport.queue_command_response(&configure_response(0x81));
        h.analyzer.configure().unwrap();
        h.transport.push_control_reply(ControlReply::Status(
            common::TransferStatus::TimedOut,
        ));

        let err = h.analyzer.start().unwrap_err();
        assert!(matches!(
            err,
            Error::Command {
                command: "start",
                source: UsbError::Timeout
            }
        ));
        assert_eq!(h.analyzer.state(), AcquisitionState::Idle);
        assert_eq!(h.transport.bulk_in_flight(), 0);
        assert!(h.sink.lock().unwrap().started.is_empty());
    }

    #[test]
    fn test_acquire_configures_then_starts() {
        let mut h = harness();
        h.transport.queue_command_response(&configure_response(0x81));

        h.analyzer.acquire().unwrap();

        assert_eq!(h.analyzer.state(), AcquisitionState::Streaming);
        assert!(h.analyzer.is_streaming());
        assert_eq!(verbs(&h.transport), vec![LA_VERB_CONFIGURE, LA_VERB_START]);

        let start = &h.transport.control_log()[2];
        assert_eq!(start.setup.index, FLAG_SKIP_RESPONSE);
    }

    #[test]
    fn test_stop_uses_long_timeout() {
        let mut h = harness();
        h.transport.queue_command_response(&configure_response(0x81));
        h.analyzer.acquire().unwrap();
        h.analyzer.stop().unwrap();

        let settings = AcquisitionSettings::default();
        assert!(settings.stop_timeout() > settings.command_timeout());

        let timeouts: Vec<Duration> = h
            .transport
            .control_log()
            .iter()
            .map(|record| record.timeout)
            .collect();
        assert_eq!(
            timeouts,
            vec![
                settings.command_timeout(),
                settings.command_timeout(),
                settings.command_timeout(),
                settings.stop_timeout(),
            ]
        );
        assert_eq!(verbs(&h.transport).last(), Some(&LA_VERB_STOP));
    }

    #[test]
    fn test_configure_rejected_while_streaming() {
        let mut h = harness();
        h.transport.queue_command_response(&configure_response(0x81));
        h.analyzer.acquire().unwrap();

        let err = h.analyzer.configure().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "configure",
                state: AcquisitionState::Streaming
            }
        ));
    }

    #[test]
    fn test_identity_strings() {
        let mut h = harness();
        h.transport.queue_command_response(b"v2023.1\0garbage");
        h.transport.queue_command_response(b"0000000000000000a06063c8");

        assert_eq!(h.analyzer.version().as_deref(), Some("v2023.1"));
        assert_eq!(
            h.analyzer.serial_number().as_deref(),
            Some("0000000000000000a06063c8")
        );
    }

    #[test]
    fn test_identity_failure_is_none() {
        let mut h = harness();
        h.transport
            .push_control_reply(ControlReply::Reject(UsbError::Pipe));

        assert_eq!(h.analyzer.version(), None);
    }
}

mod streaming {
    use super::*;

    fn start_streaming(h: &mut Harness) {
        h.transport.queue_command_response(&configure_response(0x81));
        h.analyzer.configure().unwrap();
        h.analyzer.start().unwrap();
    }

    #[test]
    fn test_samples_reach_sink() {
        let mut h = harness();
        start_streaming(&mut h);

        assert_eq!(h.analyzer.state(), AcquisitionState::Streaming);
        assert_eq!(h.analyzer.pool().armed(), POOL_SIZE);
        assert_eq!(h.transport.bulk_in_flight(), POOL_SIZE);
        assert_eq!(
            h.sink.lock().unwrap().started,
            vec![StreamFormat {
                sample_rate_hz: 1_000_000,
                num_channels: 4,
                endpoint: 0x81,
            }]
        );

        h.transport.push_bulk_chunk(vec![0x11; BUFFER_SIZE]);
        h.transport.push_bulk_chunk(vec![0x22; 100]);
        h.analyzer.poll(Duration::ZERO).unwrap();

        let sink = h.sink.lock().unwrap();
        assert_eq!(sink.samples.len(), BUFFER_SIZE + 100);
        assert_eq!(sink.samples[BUFFER_SIZE], 0x22);
        drop(sink);

        let stats = h.analyzer.stats();
        assert_eq!(stats.transfers, 2);
        assert_eq!(stats.bytes, (BUFFER_SIZE + 100) as u64);
        assert_eq!(stats.errors, 0);

        // Completed slots were handed back to the transport
        assert_eq!(h.transport.bulk_in_flight(), POOL_SIZE);
    }

    #[test]
    fn test_cancel_drains_pool_and_stops() {
        let mut h = harness();
        start_streaming(&mut h);

        h.analyzer.cancel().unwrap();

        assert_eq!(h.transport.cancel_requests(), POOL_SIZE);
        assert_eq!(h.transport.bulk_in_flight(), 0);
        assert_eq!(h.analyzer.pool().armed(), 0);
        assert_eq!(h.analyzer.state(), AcquisitionState::Idle);
        assert!(!h.analyzer.is_streaming());
        assert_eq!(verbs(&h.transport).last(), Some(&LA_VERB_STOP));
        assert!(h.transport.claimed_interfaces().is_empty());
        assert_eq!(h.sink.lock().unwrap().stopped, 1);
    }

    #[test]
    fn test_stopped_stream_releases_completions() {
        let mut h = harness();
        start_streaming(&mut h);
        h.analyzer.stop().unwrap();

        h.transport.push_bulk_chunk(vec![0; 16]);
        h.analyzer.poll(Duration::ZERO).unwrap();

        // Late data never reaches the sink and the slot is not rearmed
        let sink = h.sink.lock().unwrap();
        assert!(sink.samples.is_empty());
        assert_eq!(sink.stopped, 1);
        drop(sink);
        assert_eq!(h.transport.bulk_in_flight(), POOL_SIZE - 1);
        assert_eq!(h.analyzer.pool().armed(), POOL_SIZE - 1);
    }

    #[test]
    fn test_restart_with_transfers_outstanding_requires_cancel() {
        let mut h = harness();
        start_streaming(&mut h);
        h.analyzer.stop().unwrap();
        assert_eq!(h.transport.bulk_in_flight(), POOL_SIZE);

        h.transport.queue_command_response(&configure_response(0x81));
        h.analyzer.configure().unwrap();
        let err = h.analyzer.start().unwrap_err();
        assert!(matches!(err, Error::TransfersPending { armed: POOL_SIZE }));

        h.analyzer.cancel().unwrap();
        h.transport.queue_command_response(&configure_response(0x81));
        h.analyzer.configure().unwrap();
        h.analyzer.start().unwrap();
        assert_eq!(h.transport.bulk_in_flight(), POOL_SIZE);
        assert_eq!(h.analyzer.pool().len(), POOL_SIZE);
    }

    #[test]
    fn test_restart_after_stream_drains() {
        let mut h = harness();
        start_streaming(&mut h);
        h.analyzer.stop().unwrap();

        for _ in 0..POOL_SIZE {
            h.transport.push_bulk_chunk(vec![0x33; 8]);
        }
        h.analyzer.poll(Duration::ZERO).unwrap();
        assert_eq!(h.transport.bulk_in_flight(), 0);
        assert_eq!(h.analyzer.pool().armed(), 0);

        h.transport.queue_command_response(&configure_response(0x81));
        h.analyzer.configure().unwrap();
        h.analyzer.start().unwrap();

        assert_eq!(h.analyzer.state(), AcquisitionState::Streaming);
        assert_eq!(h.analyzer.pool().armed(), POOL_SIZE);
        assert_eq!(h.transport.bulk_in_flight(), POOL_SIZE);
        assert_eq!(h.transport.cancel_requests(), 0);

        h.transport.push_bulk_chunk(vec![0x44; 8]);
        h.analyzer.poll(Duration::ZERO).unwrap();
        let sink = h.sink.lock().unwrap();
        assert_eq!(sink.started.len(), 2);
        assert_eq!(sink.samples, vec![0x44; 8]);
    }

    #[test]
    fn test_arming_is_all_or_nothing() {
        let mut h = harness();
        h.transport.queue_command_response(&configure_response(0x81));
        h.analyzer.configure().unwrap();

        // Submissions: configure out/in, start, then the bulk slots
        h.transport.fail_submission_at(5, UsbError::Pipe);

        let err = h.analyzer.start().unwrap_err();
        assert!(matches!(err, Error::Usb(UsbError::Io)));
        assert_eq!(h.analyzer.state(), AcquisitionState::Idle);
        assert_eq!(h.analyzer.pool().armed(), 0);
        assert_eq!(h.transport.cancel_requests(), 2);
        assert_eq!(h.transport.bulk_in_flight(), 0);
        assert_eq!(verbs(&h.transport).last(), Some(&LA_VERB_STOP));

        let sink = h.sink.lock().unwrap();
        assert_eq!(sink.started.len(), 1);
        assert_eq!(sink.stopped, 1);
    }

    #[test]
    fn test_pool_allocation_failure() {
        let mut h = harness();
        h.transport.queue_command_response(&configure_response(0x81));
        h.analyzer.configure().unwrap();

        // Three control transfers so far, then two pool slots
        h.transport.fail_allocation_at(5);

        let err = h.analyzer.start().unwrap_err();
        assert!(matches!(err, Error::Usb(UsbError::NoMemory)));
        assert_eq!(h.analyzer.state(), AcquisitionState::Idle);
        assert!(h.analyzer.pool().is_empty());
        assert_eq!(h.transport.bulk_in_flight(), 0);
    }

    #[test]
    fn test_preallocated_transfers_are_reused() {
        let mut h = harness();
        h.analyzer.allocate_transfers().unwrap();
        assert_eq!(h.analyzer.pool().len(), POOL_SIZE);
        let allocated = h.transport.allocated();

        start_streaming(&mut h);

        // Only the three control transfers were allocated on top
        assert_eq!(h.transport.allocated(), allocated + 3);
    }

    #[test]
    fn test_free_transfers() {
        let mut h = harness();
        h.analyzer.allocate_transfers().unwrap();
        h.analyzer.free_transfers();

        assert!(h.analyzer.pool().is_empty());
        assert_eq!(h.transport.freed(), POOL_SIZE);
        assert_eq!(h.transport.double_frees(), 0);
    }

    #[test]
    fn test_drop_while_streaming_releases_everything() {
        let Harness {
            transport,
            analyzer: mut analyzer,
            ..
        } = harness();
        transport.queue_command_response(&configure_response(0x81));
        analyzer.acquire().unwrap();
        drop(analyzer);

        assert_eq!(transport.in_flight(), 0);
        assert_eq!(transport.freed(), transport.allocated());
        assert_eq!(transport.double_frees(), 0);
    }
}
