use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, LineWriter, Write};
use std::path::Path;

/// Line-oriented, append-only text output.
///
/// Writes never fail from the caller's point of view: the first I/O error is kept,
/// everything after it is dropped, and the error is returned by [`TraceSink::finish`].
///
/// Console and caller-supplied writers receive each line as soon as it is complete.
/// Only file traces are block-buffered.
pub struct TraceSink {
    out: Box<dyn Write>,
    error: Option<io::Error>,
    lines: u64,
}

impl fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSink")
            .field("lines", &self.lines)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl TraceSink {
    /// Line-buffered sink over `out`.
    pub fn new(out: Box<dyn Write>) -> Self {
        TraceSink::from_writer(Box::new(LineWriter::new(out)))
    }

    /// Block-buffered sink over `out`; lines reach it on flush or when the buffer fills.
    pub fn buffered(out: Box<dyn Write>) -> Self {
        TraceSink::from_writer(Box::new(BufWriter::new(out)))
    }

    fn from_writer(out: Box<dyn Write>) -> Self {
        TraceSink {
            out,
            error: None,
            lines: 0,
        }
    }

    pub fn stdout() -> Self {
        TraceSink::new(Box::new(io::stdout()))
    }

    pub fn stderr() -> Self {
        TraceSink::new(Box::new(io::stderr()))
    }

    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(TraceSink::buffered(Box::new(File::create(path)?)))
    }

    /// Appends `args` followed by a newline.
    pub fn line(&mut self, args: fmt::Arguments<'_>) {
        if self.error.is_some() {
            return;
        }
        match writeln!(self.out, "{args}") {
            Ok(()) => self.lines += 1,
            Err(err) => {
                tracing::error!(%err, "trace output failed; dropping further lines");
                self.error = Some(err);
            }
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(err) = &self.error {
            return Err(io::Error::new(err.kind(), err.to_string()));
        }
        self.out.flush()
    }

    /// Flushes and reports the first error seen, if any.
    pub fn finish(mut self) -> io::Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.out.flush()
    }
}
