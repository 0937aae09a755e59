//! Byte transports handed to formats.
//!
//! A transport is one of a closed set of capability variants, which decides
//! what the closing wrapper does with it once the record stream ends:
//!
//! | Variant    | On close                                                     |
//! |------------|--------------------------------------------------------------|
//! | `Pipe`     | pipe end closed *with the terminal error* (or cleanly)        |
//! | `Owned`    | released (dropped) as soon as the stream is closed           |
//! | `Retained` | left alone; the caller keeps its lifecycle                   |
//!
//! [`pipe`] builds an in-process byte pipe whose ends propagate a close reason
//! to the peer: a reader that hits the end of a pipe closed with an error sees
//! that error (as an `io::Error` wrapping the original [`RowError`]) instead of
//! a clean end of file.

use crate::error::RowError;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Default number of bytes buffered inside a [`pipe`].
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// A byte source for a record reader.
pub enum Source {
    Pipe(PipeReader),
    Owned(Box<dyn Read + Send>),
    Retained(Box<dyn Read + Send>),
}

/// A byte sink for a record writer.
pub enum Sink {
    Pipe(PipeWriter),
    Owned(Box<dyn Write + Send>),
    Retained(Box<dyn Write + Send>),
}

/// What the closing wrapper does to the transport after the format is closed.
pub(crate) enum TransportCloser {
    Pipe(PipeCloser),
    Release,
    Keep,
}

impl TransportCloser {
    /// The format could not be built over this transport; tell a pipe peer why.
    pub(crate) fn abandon(&self, err: &RowError) {
        if let Self::Pipe(pipe) = self {
            pipe.close_with_error(Some(err.clone()));
        }
    }
}

impl Source {
    pub fn owned(reader: impl Read + Send + 'static) -> Self {
        Self::Owned(Box::new(reader))
    }

    pub fn retained(reader: impl Read + Send + 'static) -> Self {
        Self::Retained(Box::new(reader))
    }

    /// In-memory source over a copy of `bytes`.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::retained(Cursor::new(bytes.into()))
    }

    pub(crate) fn split(self) -> (Box<dyn Read + Send>, TransportCloser) {
        match self {
            Self::Pipe(pipe) => {
                let closer = pipe.closer();
                (Box::new(pipe), TransportCloser::Pipe(closer))
            }
            Self::Owned(reader) => (reader, TransportCloser::Release),
            Self::Retained(reader) => (reader, TransportCloser::Keep),
        }
    }
}

impl Sink {
    pub fn owned(writer: impl Write + Send + 'static) -> Self {
        Self::Owned(Box::new(writer))
    }

    pub fn retained(writer: impl Write + Send + 'static) -> Self {
        Self::Retained(Box::new(writer))
    }

    pub(crate) fn split(self) -> (Box<dyn Write + Send>, TransportCloser) {
        match self {
            Self::Pipe(pipe) => {
                let closer = pipe.closer();
                (Box::new(pipe), TransportCloser::Pipe(closer))
            }
            Self::Owned(writer) => (writer, TransportCloser::Release),
            Self::Retained(writer) => (writer, TransportCloser::Keep),
        }
    }
}

impl From<PipeReader> for Source {
    fn from(pipe: PipeReader) -> Self {
        Self::Pipe(pipe)
    }
}

impl From<File> for Source {
    fn from(file: File) -> Self {
        Self::owned(file)
    }
}

impl From<PipeWriter> for Sink {
    fn from(pipe: PipeWriter) -> Self {
        Self::Pipe(pipe)
    }
}

impl From<File> for Sink {
    fn from(file: File) -> Self {
        Self::owned(file)
    }
}

impl From<SharedBuffer> for Sink {
    fn from(buffer: SharedBuffer) -> Self {
        Self::retained(buffer)
    }
}

// ============================================================================
// In-process pipe
// ============================================================================

struct PipeState {
    buf: VecDeque<u8>,
    capacity: usize,
    // `Some(None)` is a clean close, `Some(Some(e))` a close with reason.
    write_closed: Option<Option<RowError>>,
    read_closed: Option<Option<RowError>>,
}

struct PipeShared {
    state: Mutex<PipeState>,
    changed: Condvar,
}

impl PipeShared {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, PipeState>) -> MutexGuard<'a, PipeState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Copy)]
enum PipeSide {
    Read,
    Write,
}

/// Closes one end of a pipe without owning it.
pub(crate) struct PipeCloser {
    shared: Arc<PipeShared>,
    side: PipeSide,
}

impl PipeCloser {
    pub(crate) fn close_with_error(&self, reason: Option<RowError>) {
        close_side(&self.shared, self.side, reason);
    }
}

fn close_side(shared: &PipeShared, side: PipeSide, reason: Option<RowError>) {
    let mut st = shared.lock();
    match side {
        PipeSide::Write => {
            if st.write_closed.is_none() {
                st.write_closed = Some(reason);
            }
        }
        PipeSide::Read => {
            if st.read_closed.is_none() {
                st.read_closed = Some(reason);
                st.buf.clear();
            }
        }
    }
    shared.changed.notify_all();
}

/// Read end of an in-process pipe.
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

/// Write end of an in-process pipe.
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

/// Create a pipe with the default buffer size.
pub fn pipe() -> (PipeReader, PipeWriter) {
    pipe_with_capacity(DEFAULT_PIPE_CAPACITY)
}

/// Create a pipe buffering at most `capacity` bytes (at least one).
pub fn pipe_with_capacity(capacity: usize) -> (PipeReader, PipeWriter) {
    let shared = Arc::new(PipeShared {
        state: Mutex::new(PipeState {
            buf: VecDeque::new(),
            capacity: capacity.max(1),
            write_closed: None,
            read_closed: None,
        }),
        changed: Condvar::new(),
    });
    (
        PipeReader {
            shared: Arc::clone(&shared),
        },
        PipeWriter { shared },
    )
}

impl PipeReader {
    /// Close the read end. Pending and future writes fail with `reason`, or
    /// with a broken-pipe error when `reason` is `None`.
    pub fn close_with_error(&self, reason: Option<RowError>) {
        close_side(&self.shared, PipeSide::Read, reason);
    }

    pub(crate) fn closer(&self) -> PipeCloser {
        PipeCloser {
            shared: Arc::clone(&self.shared),
            side: PipeSide::Read,
        }
    }
}

impl PipeWriter {
    /// Close the write end. Once the buffered bytes are drained, the reader
    /// sees end of file when `reason` is `None`, otherwise `reason`.
    pub fn close_with_error(&self, reason: Option<RowError>) {
        close_side(&self.shared, PipeSide::Write, reason);
    }

    pub(crate) fn closer(&self) -> PipeCloser {
        PipeCloser {
            shared: Arc::clone(&self.shared),
            side: PipeSide::Write,
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut st = self.shared.lock();
        loop {
            if st.read_closed.is_some() {
                return Err(RowError::closed("read on closed pipe").into_io());
            }
            if !st.buf.is_empty() {
                let n = out.len().min(st.buf.len());
                for (slot, byte) in out.iter_mut().zip(st.buf.drain(..n)) {
                    *slot = byte;
                }
                self.shared.changed.notify_all();
                return Ok(n);
            }
            match &st.write_closed {
                Some(None) => return Ok(0),
                Some(Some(reason)) => return Err(reason.clone().into_io()),
                None => {}
            }
            st = self.shared.wait(st);
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut st = self.shared.lock();
        loop {
            if let Some(reason) = &st.read_closed {
                let err = reason
                    .clone()
                    .unwrap_or_else(|| RowError::closed("read side of pipe closed"));
                return Err(err.into_io());
            }
            if st.write_closed.is_some() {
                return Err(RowError::closed("write on closed pipe").into_io());
            }
            let room = st.capacity.saturating_sub(st.buf.len());
            if room > 0 {
                let n = room.min(data.len());
                st.buf.extend(&data[..n]);
                self.shared.changed.notify_all();
                return Ok(n);
            }
            st = self.shared.wait(st);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        close_side(&self.shared, PipeSide::Read, None);
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        close_side(&self.shared, PipeSide::Write, None);
    }
}

// ============================================================================
// Shared in-memory buffer
// ============================================================================

/// A growable byte buffer shared between the caller and a writer.
///
/// Hand a clone to a [`Sink`] (it becomes `Retained`) and read the bytes back
/// from the original once the writer is closed.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// A source over a snapshot of the current contents.
    pub fn source(&self) -> Source {
        Source::from_bytes(self.contents())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
