//! Destinations for captured samples

use crate::stream::StreamFormat;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Receives sample buffers and acquisition lifecycle notifications
///
/// `deliver` is called from inside transport event processing, so it must
/// not block for long.
pub trait SampleSink: Send {
    fn acquisition_started(&mut self, _format: &StreamFormat) {}

    fn deliver(&mut self, samples: &[u8], format: &StreamFormat);

    fn acquisition_stopped(&mut self) {}
}

/// Sink shared between the controller and the streaming callback
pub type SharedSink = Arc<Mutex<dyn SampleSink>>;

/// Sink that drops every sample
#[derive(Debug, Default)]
pub struct DiscardSink;

impl SampleSink for DiscardSink {
    fn deliver(&mut self, _samples: &[u8], _format: &StreamFormat) {}
}

/// Writes raw sample bytes to a file
///
/// Write failures cannot be reported from `deliver`; the first one is kept,
/// later samples are dropped and [`FileSink::finish`] returns the error.
pub struct FileSink<W: Write = BufWriter<File>> {
    writer: W,
    bytes_written: u64,
    error: Option<io::Error>,
}

impl FileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        info!("Writing samples to {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> FileSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes_written: 0,
            error: None,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush buffered samples and report the total written
    pub fn finish(&mut self) -> io::Result<u64> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush()?;
        Ok(self.bytes_written)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> SampleSink for FileSink<W> {
    fn acquisition_started(&mut self, format: &StreamFormat) {
        debug!(
            "Capture started: {} channels at {} Hz",
            format.num_channels, format.sample_rate_hz
        );
    }

    fn deliver(&mut self, samples: &[u8], _format: &StreamFormat) {
        if self.error.is_some() {
            return;
        }
        match self.writer.write_all(samples) {
            Ok(()) => self.bytes_written += samples.len() as u64,
            Err(e) => {
                error!("Failed to write samples: {}", e);
                self.error = Some(e);
            }
        }
    }

    fn acquisition_stopped(&mut self) {
        if let Err(e) = self.writer.flush() {
            error!("Failed to flush samples: {}", e);
            self.error.get_or_insert(e);
        }
        debug!("Capture stopped after {} bytes", self.bytes_written);
    }
}
