//! The minimal per-format contract.
//!
//! A format implements [`Format`] and hands out one [`RowReader`] or
//! [`RowWriter`] per byte transport. Everything else (batch I/O, channel
//! streaming, closing the transport, piping, merging) is derived from these
//! three traits by [`RowFormat`](crate::format::RowFormat).
//!
//! # Close semantics
//!
//! `close(prior)` runs exactly once per reader/writer, after the terminal
//! condition. `prior` is the error that stopped the stream, or `None` on clean
//! completion. The return value is the effective outcome: `Err(prior)` unless
//! closing itself failed, in which case the close failure wins.

use crate::error::{Result, RowError};
use std::io::{Read, Write};

/// One record or the terminal error of a stream; the unit carried on channels.
pub type RowResult<T> = std::result::Result<T, RowError>;

/// Sequential record cursor.
pub trait RowReader<T>: Send {
    /// Next record, `Ok(None)` at end of stream.
    ///
    /// End of stream is not an error; a broken transport is.
    ///
    /// # Errors
    /// Decode or transport failures. Either is terminal for this reader.
    fn read(&mut self) -> Result<Option<T>>;

    /// Close the reader, threading `prior` through.
    ///
    /// # Errors
    /// `prior`, or a failure while closing.
    fn close(&mut self, prior: Option<RowError>) -> Result<()>;
}

/// Sequential record sink.
pub trait RowWriter<T>: Send {
    /// Encode one record.
    ///
    /// # Errors
    /// Encode or transport failures. Either is terminal for this writer.
    fn write(&mut self, row: T) -> Result<()>;

    /// Flush and close the writer, threading `prior` through.
    ///
    /// Implementations flush buffered output all the way into the byte sink
    /// they were built over.
    ///
    /// # Errors
    /// `prior`, the first write/flush failure, or a failure while closing.
    fn close(&mut self, prior: Option<RowError>) -> Result<()>;
}

/// Stateless factory for readers and writers of one record type.
///
/// Header handling or other per-stream setup happens in `reader`/`writer`
/// and is reported as a construction error.
pub trait Format: Send + Sync + 'static {
    type Row: Send + 'static;
    type Reader: RowReader<Self::Row> + 'static;
    type Writer: RowWriter<Self::Row> + 'static;

    /// # Errors
    /// Construction errors, e.g. a missing header.
    fn reader(&self, source: Box<dyn Read + Send>) -> Result<Self::Reader>;

    /// # Errors
    /// Construction errors, e.g. the header could not be written.
    fn writer(&self, sink: Box<dyn Write + Send>) -> Result<Self::Writer>;
}

/// Outcome of `close` given the prior error and the closer's own result.
pub(crate) fn settle(prior: Option<RowError>, closed: Result<()>) -> Result<()> {
    match (closed, prior) {
        (Err(close_err), _) => Err(close_err),
        (Ok(()), Some(prior)) => Err(prior),
        (Ok(()), None) => Ok(()),
    }
}

impl<T, R: RowReader<T> + ?Sized> RowReader<T> for Box<R> {
    fn read(&mut self) -> Result<Option<T>> {
        (**self).read()
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        (**self).close(prior)
    }
}

impl<T, W: RowWriter<T> + ?Sized> RowWriter<T> for Box<W> {
    fn write(&mut self, row: T) -> Result<()> {
        (**self).write(row)
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        (**self).close(prior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn settle_prefers_close_failure() {
        let out = settle(Some(RowError::decode("row")), Err(RowError::transport("flush")));
        assert_eq!(out.map_err(|e| e.kind()), Err(ErrorKind::Transport));
    }

    #[test]
    fn settle_keeps_prior() {
        let out = settle(Some(RowError::decode("row")), Ok(()));
        assert_eq!(out.map_err(|e| e.kind()), Err(ErrorKind::Decode));
        assert!(settle(None, Ok(())).is_ok());
    }
}
