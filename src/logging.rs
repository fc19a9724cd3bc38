use crate::types::{Format, LabError, Logger, Result};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// This is a shared, thread-safe buffer for captured logs.
/// We use `Arc<Mutex<...>>` so the subscriber and the test can both reach it.
#[derive(Clone, Debug, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Returns the captured logs as a string and clears the buffer.
    pub fn get_string(&self) -> String {
        let mut buffer = match self.0.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        let s = String::from_utf8_lossy(&buffer).to_string();
        buffer.clear();
        s
    }
}

/// A writer that either appends to a [`LogBuffer`] or goes straight to stderr.
pub struct LogWriter {
    buffer: Option<LogBuffer>,
}

impl LogWriter {
    pub fn new(buffer: LogBuffer) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }

    /// Create a writer that outputs immediately (for the main application)
    pub fn new_immediate() -> Self {
        Self { buffer: None }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(buffer) = &self.buffer {
            let mut buffer = match buffer.0.lock() {
                Ok(buffer) => buffer,
                Err(poisoned) => poisoned.into_inner(),
            };
            buffer.extend_from_slice(buf);
        } else {
            let mut stderr = io::stderr().lock();
            stderr.write_all(buf)?;
            stderr.flush()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_none() {
            io::stderr().flush()?;
        }
        Ok(())
    }
}

// The `MakeWriter` implementation is what `tracing_subscriber` needs.
impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogWriter;

    fn make_writer(&self) -> Self::Writer {
        LogWriter::new(self.clone())
    }
}

/// Immediate writer for the main application (no buffering)
pub(crate) struct ImmediateWriter;

impl<'a> MakeWriter<'a> for ImmediateWriter {
    type Writer = LogWriter;

    fn make_writer(&self) -> Self::Writer {
        LogWriter::new_immediate()
    }
}

fn level_for(verbose: bool) -> Level {
    if verbose { Level::DEBUG } else { Level::INFO }
}

/// Build a subscriber for `format` that writes through `writer`.
pub fn build_subscriber<W>(
    verbose: bool,
    format: Format,
    writer: W,
) -> Box<dyn tracing::Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let level = level_for(verbose);
    match format {
        Format::Json => Box::new(
            FmtSubscriber::builder()
                .json()
                .with_max_level(level)
                .with_writer(writer)
                .finish(),
        ),
        Format::Text => Box::new(
            FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(writer)
                .without_time()
                .with_target(false)
                .with_level(false)
                .finish(),
        ),
        Format::Log => Box::new(
            FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(writer)
                .with_target(false)
                .finish(),
        ),
    }
}

// Default Logger implementation for production use
pub struct DefaultLogger {
    verbose: bool,
    format: Format,
}

impl DefaultLogger {
    pub fn new(verbose: bool, format: Format) -> Self {
        Self { verbose, format }
    }
}

impl Logger for DefaultLogger {
    fn init(&self) -> Result<()> {
        let subscriber = build_subscriber(self.verbose, self.format, ImmediateWriter);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LabError::Config(format!("setting default subscriber failed: {e}")))
    }
}

pub fn init(logger: &dyn Logger) -> Result<()> {
    logger.init()
}
