//! Observer-chained writer used for every byte a task writes
//!
//! [`IoController`] threads each chunk through an ordered list of data
//! observers before it reaches the underlying sink. Observers are used for
//! progress accounting and for aborting writes (e.g. on cancellation).

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;

/// Size of the intermediate buffer used by [`copy_through`]
pub const COPY_BUFFER_SIZE: usize = 4 * 1024;

/// Called with every chunk before it reaches the sink
pub type DataObserver = Box<dyn FnMut(&[u8]) -> io::Result<()> + Send>;

/// Called once when the controller is closed
pub type CloseObserver = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// Writer wrapper with data and close observers
///
/// A controller without a sink acts as a no-op writer: observers still run,
/// but the data is discarded.
pub struct IoController<W: Write> {
    sink: Option<W>,
    data_observers: Vec<DataObserver>,
    close_observers: Vec<CloseObserver>,
}

impl<W: Write> IoController<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Some(sink),
            data_observers: Vec::new(),
            close_observers: Vec::new(),
        }
    }

    pub fn on_data(&mut self, observer: impl FnMut(&[u8]) -> io::Result<()> + Send + 'static) {
        self.data_observers.push(Box::new(observer));
    }

    pub fn on_close(&mut self, observer: impl FnOnce() -> io::Result<()> + Send + 'static) {
        self.close_observers.push(Box::new(observer));
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.sink.as_ref()
    }

    /// Run close observers in order, then flush and release the sink
    ///
    /// The first failing observer aborts the chain and the sink is dropped
    /// without being flushed.
    pub fn close(mut self) -> io::Result<()> {
        for observer in self.close_observers.drain(..) {
            observer()?;
        }

        if let Some(mut sink) = self.sink.take() {
            sink.flush()?;
        }

        Ok(())
    }
}

impl IoController<io::Sink> {
    /// Controller that only runs observers
    pub fn discard() -> Self {
        Self {
            sink: None,
            data_observers: Vec::new(),
            close_observers: Vec::new(),
        }
    }
}

impl<W: Write> Write for IoController<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for observer in self.data_observers.iter_mut() {
            observer(buf)?;
        }

        match self.sink.as_mut() {
            Some(sink) => sink.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> fmt::Debug for IoController<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoController")
            .field("has_sink", &self.sink.is_some())
            .field("data_observers", &self.data_observers.len())
            .field("close_observers", &self.close_observers.len())
            .finish()
    }
}

/// Error from [`copy_through`], carrying the bytes written before it failed
#[derive(Debug, Error)]
#[error("copy failed after {written} bytes: {source}")]
pub struct CopyError {
    pub written: u64,
    #[source]
    pub source: io::Error,
}

impl From<CopyError> for io::Error {
    fn from(err: CopyError) -> Self {
        err.source
    }
}

/// Stream `src` into `dst` with a fixed 4 KiB buffer
///
/// A writer that accepts fewer bytes than offered is a fatal error, not a
/// retry opportunity.
pub fn copy_through<R, W>(dst: &mut W, src: &mut R) -> Result<u64, CopyError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    let mut written: u64 = 0;

    loop {
        let read = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => return Err(CopyError { written, source }),
        };

        let wrote = match dst.write(&buf[..read]) {
            Ok(n) => n,
            Err(source) => return Err(CopyError { written, source }),
        };
        written += wrote as u64;

        if wrote != read {
            return Err(CopyError {
                written,
                source: io::Error::new(ErrorKind::WriteZero, "short write"),
            });
        }
    }

    Ok(written)
}
