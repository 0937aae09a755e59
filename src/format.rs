//! Derivation layer: everything a [`Format`] gets for free.
//!
//! [`RowFormat`] wraps the minimal format contract and derives:
//!
//! - **Closing readers/writers**: [`RowFormat::reader`], [`RowFormat::writer`]
//! - **Batch I/O**: [`RowFormat::read_all`], [`RowFormat::write_all`]
//! - **Channel streaming**: [`RowFormat::read_stream`], [`RowFormat::write_stream`]
//!
//! # Example
//!
//! ```
//! use rowstream::io::jsonl::JsonLinesFormat;
//! use rowstream::{RowFormat, SharedBuffer, Source};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Rec { id: u32 }
//!
//! # fn main() -> anyhow::Result<()> {
//! let jsonl = RowFormat::new(JsonLinesFormat::<Rec>::new());
//! let buf = SharedBuffer::new();
//! jsonl.write_all(buf.clone(), vec![Rec { id: 1 }, Rec { id: 2 }])?;
//! assert_eq!(buf.to_string_lossy(), "{\"id\":1}\n{\"id\":2}\n");
//!
//! let back = jsonl.read_all(buf.source())?;
//! assert_eq!(back, vec![Rec { id: 1 }, Rec { id: 2 }]);
//! # Ok(())
//! # }
//! ```

use crate::closing::{ClosingReader, ClosingWriter};
use crate::context::Context;
use crate::error::{Result, RowError};
use crate::row::{Format, RowReader, RowResult, RowWriter};
use crate::task::{self, StreamTask};
use crate::transport::{DEFAULT_PIPE_CAPACITY, Sink, Source};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::fmt;
use std::sync::Arc;

/// Default capacity of the record channels created by the streaming operations.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Tuning for the channel and pipe buffers created by streaming operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Records buffered per channel; `None` for an unbounded channel,
    /// `Some(0)` for a rendezvous channel.
    pub channel_capacity: Option<usize>,
    /// Bytes buffered inside the in-process pipes built by `pipe`/`merge`.
    pub pipe_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            channel_capacity: Some(DEFAULT_CHANNEL_CAPACITY),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

impl StreamOptions {
    pub fn channel<T>(&self) -> (Sender<T>, Receiver<T>) {
        match self.channel_capacity {
            Some(cap) => bounded(cap),
            None => unbounded(),
        }
    }
}

/// Rows read before a terminal error, together with that error.
///
/// Returned by [`RowFormat::read_all`]. Converts into [`RowError`] (dropping
/// the rows) so `?` works in functions returning [`crate::Result`].
pub struct Partial<T> {
    pub rows: Vec<T>,
    pub error: RowError,
}

impl<T> Partial<T> {
    fn empty(error: RowError) -> Self {
        Self {
            rows: Vec::new(),
            error,
        }
    }

    pub fn into_parts(self) -> (Vec<T>, RowError) {
        (self.rows, self.error)
    }
}

impl<T> fmt::Debug for Partial<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partial")
            .field("rows", &self.rows.len())
            .field("error", &self.error)
            .finish()
    }
}

impl<T> fmt::Display for Partial<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} rows)", self.error, self.rows.len())
    }
}

impl<T> std::error::Error for Partial<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<Partial<T>> for RowError {
    fn from(partial: Partial<T>) -> Self {
        partial.error
    }
}

/// A [`Format`] plus the operations derived from it.
///
/// Cloning is cheap: clones share the format.
#[derive(Debug)]
pub struct RowFormat<F> {
    core: Arc<F>,
    options: StreamOptions,
}

impl<F> Clone for RowFormat<F> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            options: self.options,
        }
    }
}

impl<F: Format + Default> Default for RowFormat<F> {
    fn default() -> Self {
        Self::new(F::default())
    }
}

impl<F: Format> RowFormat<F> {
    pub fn new(core: F) -> Self {
        Self {
            core: Arc::new(core),
            options: StreamOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub fn core(&self) -> &F {
        &self.core
    }

    /// A reader over `source` that closes the source when it is closed.
    ///
    /// # Errors
    /// The format's construction error.
    pub fn reader(&self, source: impl Into<Source>) -> Result<ClosingReader<F::Row, F::Reader>> {
        open_reader(&*self.core, source.into())
    }

    /// A writer over `sink` that closes the sink when it is closed.
    ///
    /// # Errors
    /// The format's construction error.
    pub fn writer(&self, sink: impl Into<Sink>) -> Result<ClosingWriter<F::Row, F::Writer>> {
        let (bytes, closer) = sink.into().split();
        let raw = self.core.writer(bytes).inspect_err(|err| closer.abandon(err))?;
        Ok(ClosingWriter::new(raw, closer))
    }

    /// Read every row of `source`.
    ///
    /// # Errors
    /// On a construction, decode or transport error, returns the rows read so
    /// far together with whatever closing the reader reported.
    pub fn read_all(
        &self,
        source: impl Into<Source>,
    ) -> std::result::Result<Vec<F::Row>, Partial<F::Row>> {
        let mut reader = self.reader(source).map_err(Partial::empty)?;
        let mut rows = Vec::new();
        loop {
            match reader.read() {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(err) => {
                    let error = reader.close(Some(err.clone())).err().unwrap_or(err);
                    return Err(Partial { rows, error });
                }
            }
        }
        match reader.close(None) {
            Ok(()) => Ok(rows),
            Err(error) => Err(Partial { rows, error }),
        }
    }

    /// Write `rows` in order, then close. Returns the number of rows written.
    ///
    /// # Errors
    /// Construction errors, or the first write error (after which the writer
    /// is closed with it and no further rows are written).
    pub fn write_all<I>(&self, sink: impl Into<Sink>, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = F::Row>,
    {
        let mut writer = self.writer(sink)?;
        let mut written = 0usize;
        for row in rows {
            if let Err(err) = writer.write(row) {
                return Err(writer.close(Some(err.clone())).err().unwrap_or(err));
            }
            written += 1;
        }
        writer.close(None)?;
        Ok(written)
    }

    /// Stream the rows of `source` through a channel fed by a dedicated thread.
    ///
    /// Returns at once: the reader is built on the task, so a header read
    /// never blocks the caller. The channel carries each row as `Ok`, at most
    /// one `Err` as its last item, and then disconnects. Construction errors
    /// and cancellation arrive as that single `Err`. The reader is closed by
    /// the task: cleanly at end of stream, otherwise with the terminal error.
    pub fn read_stream(
        &self,
        ctx: &Context,
        source: impl Into<Source>,
    ) -> Receiver<RowResult<F::Row>> {
        let core = Arc::clone(&self.core);
        let source = source.into();
        let (tx, rx) = self.options.channel();
        match task::spawn_reader(ctx.clone(), move || open_reader(&*core, source), tx) {
            Ok(_detached) => rx,
            Err(err) => failed(err),
        }
    }

    /// Drain `rows` into a writer over `sink` on a dedicated thread.
    ///
    /// The writer is constructed before this returns, so construction errors
    /// are reported here. The task closes the writer exactly once: cleanly
    /// when the channel disconnects, with the error when an `Err` arrives or a
    /// write fails, and with the cancellation error when `ctx` is done.
    ///
    /// # Errors
    /// The format's construction error.
    pub fn write_stream(
        &self,
        ctx: &Context,
        sink: impl Into<Sink>,
        rows: Receiver<RowResult<F::Row>>,
    ) -> Result<StreamTask> {
        let writer = self.writer(sink)?;
        task::spawn_writer(ctx.clone(), writer, rows)
    }
}

fn open_reader<F: Format>(
    core: &F,
    source: Source,
) -> Result<ClosingReader<F::Row, F::Reader>> {
    let (bytes, closer) = source.split();
    let raw = core.reader(bytes).inspect_err(|err| closer.abandon(err))?;
    Ok(ClosingReader::new(raw, closer))
}

/// A terminated channel holding only `err`.
fn failed<T>(err: RowError) -> Receiver<RowResult<T>> {
    let (tx, rx) = bounded(1);
    let _ = tx.send(Err(err));
    rx
}
