//! Closing wrappers: close the format, then the transport under it.
//!
//! The raw reader/writer is closed first so that its outcome (the prior
//! error, or its own flush/close failure) is what the transport sees:
//!
//! * a pipe end is closed *with* that outcome, so the peer on the other side
//!   of a producer/consumer boundary observes the failure instead of a clean
//!   end of file;
//! * an owned transport is released;
//! * a retained transport is left alone.

use crate::error::{ErrorKind, Result, RowError};
use crate::row::{RowReader, RowWriter, settle};
use crate::transport::TransportCloser;
use std::marker::PhantomData;

/// A [`RowReader`] that also closes its byte source.
pub struct ClosingReader<T, R>
where
    R: RowReader<T>,
{
    raw: Option<R>,
    closer: TransportCloser,
    closed: bool,
    _row: PhantomData<fn() -> T>,
}

/// A [`RowWriter`] that also closes its byte sink.
pub struct ClosingWriter<T, W>
where
    W: RowWriter<T>,
{
    raw: Option<W>,
    closer: TransportCloser,
    closed: bool,
    _row: PhantomData<fn(T)>,
}

impl<T, R: RowReader<T>> ClosingReader<T, R> {
    pub(crate) fn new(raw: R, closer: TransportCloser) -> Self {
        Self {
            raw: Some(raw),
            closer,
            closed: false,
            _row: PhantomData,
        }
    }
}

impl<T, W: RowWriter<T>> ClosingWriter<T, W> {
    pub(crate) fn new(raw: W, closer: TransportCloser) -> Self {
        Self {
            raw: Some(raw),
            closer,
            closed: false,
            _row: PhantomData,
        }
    }
}

fn close_transport<X>(raw: &mut Option<X>, closer: &TransportCloser, outcome: &Result<()>) {
    match closer {
        TransportCloser::Pipe(pipe) => {
            pipe.close_with_error(outcome.as_ref().err().cloned());
            raw.take();
        }
        TransportCloser::Release => {
            raw.take();
        }
        TransportCloser::Keep => {}
    }
}

impl<T, R: RowReader<T>> RowReader<T> for ClosingReader<T, R> {
    fn read(&mut self) -> Result<Option<T>> {
        match self.raw.as_mut() {
            Some(raw) if !self.closed => raw.read(),
            _ => Err(RowError::closed("read on closed row reader")),
        }
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        if self.closed {
            return settle(prior, Ok(()));
        }
        self.closed = true;
        let outcome = match self.raw.as_mut() {
            Some(raw) => raw.close(prior),
            None => settle(prior, Ok(())),
        };
        close_transport(&mut self.raw, &self.closer, &outcome);
        outcome
    }
}

impl<T, W: RowWriter<T>> RowWriter<T> for ClosingWriter<T, W> {
    fn write(&mut self, row: T) -> Result<()> {
        match self.raw.as_mut() {
            Some(raw) if !self.closed => raw.write(row),
            _ => Err(RowError::closed("write on closed row writer")),
        }
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        if self.closed {
            return settle(prior, Ok(()));
        }
        self.closed = true;
        let outcome = match self.raw.as_mut() {
            Some(raw) => raw.close(prior),
            None => settle(prior, Ok(())),
        };
        close_transport(&mut self.raw, &self.closer, &outcome);
        outcome
    }
}

// Unclosed wrappers are closed on drop with a `Closed` error: output is still
// flushed and owned transports released, but a pipe peer sees the failure
// rather than a clean end of file. While unwinding, the format is not touched
// again; only the transport is closed.
fn panic_reason() -> Option<RowError> {
    std::thread::panicking().then(|| RowError::internal("stream dropped while panicking"))
}

impl<T, R: RowReader<T>> Drop for ClosingReader<T, R> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(reason) = panic_reason() {
            self.closed = true;
            close_transport(&mut self.raw, &self.closer, &Err(reason));
            return;
        }
        let reason = RowError::closed("row reader dropped without close");
        if let Err(err) = self.close(Some(reason)) {
            tracing::debug!(%err, "row reader closed on drop");
        }
    }
}

impl<T, W: RowWriter<T>> Drop for ClosingWriter<T, W> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(reason) = panic_reason() {
            self.closed = true;
            close_transport(&mut self.raw, &self.closer, &Err(reason));
            return;
        }
        let reason = RowError::closed("row writer dropped without close");
        match self.close(Some(reason)) {
            Err(err) if err.kind() == ErrorKind::Closed => {
                tracing::debug!(%err, "row writer closed on drop");
            }
            Err(err) => tracing::warn!(%err, "row writer failed to close on drop"),
            Ok(()) => {}
        }
    }
}
