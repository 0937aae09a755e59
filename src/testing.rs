//! Test doubles for formats, transports and streams.
//!
//! These helpers let tests (here and in downstream crates) script the failure
//! modes that real transports only produce occasionally:
//!
//! - [`LinesFormat`]: one `String` row per text line, with an optional header
//!   and an optional injected panic
//! - [`RecordingFormat`] / [`Recorded`]: a writer that records every row and
//!   the reason it was closed with
//! - [`FailingSource`]: a byte source that yields some bytes, then an error
//! - [`VecReader`] / [`PanickingReader`]: in-memory readers for `merge`
//! - [`TempFilePath`] / [`temp_file_with`]: file transports
//!
//! # Example
//!
//! ```
//! use rowstream::testing::{FailingSource, LinesFormat};
//! use rowstream::{RowError, RowFormat};
//!
//! let lines = RowFormat::new(LinesFormat::new());
//! let partial = lines
//!     .read_all(FailingSource::new(b"a\nb\n", RowError::other("source error")))
//!     .unwrap_err();
//! assert_eq!(partial.rows, vec!["a", "b"]);
//! assert_eq!(partial.error.message(), "source error");
//! ```

use crate::error::{Result, RowError};
use crate::row::{Format, RowReader, RowWriter, settle};
use crate::transport::{Sink, Source};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;

// ============================================================================
// Line-per-row format
// ============================================================================

/// Plain text, one `String` row per line.
#[derive(Debug, Clone, Default)]
pub struct LinesFormat {
    header: Option<String>,
    panic_after: Option<usize>,
}

impl LinesFormat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require (on read) and emit (on write) a first line equal to `header`.
    #[must_use]
    pub fn with_header(header: impl Into<String>) -> Self {
        Self {
            header: Some(header.into()),
            panic_after: None,
        }
    }

    /// Readers panic when asked for the row after the first `rows` rows.
    #[must_use]
    pub fn panicking_after(mut self, rows: usize) -> Self {
        self.panic_after = Some(rows);
        self
    }
}

pub struct LinesReader {
    inner: BufReader<Box<dyn Read + Send>>,
    line: String,
    read: usize,
    panic_after: Option<usize>,
}

impl LinesReader {
    fn next_line(&mut self) -> Result<Option<String>> {
        self.line.clear();
        if self.inner.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        let text = self.line.trim_end_matches(['\n', '\r']);
        Ok(Some(text.to_string()))
    }
}

pub struct LinesWriter {
    inner: Box<dyn Write + Send>,
}

impl Format for LinesFormat {
    type Row = String;
    type Reader = LinesReader;
    type Writer = LinesWriter;

    fn reader(&self, source: Box<dyn Read + Send>) -> Result<LinesReader> {
        let mut reader = LinesReader {
            inner: BufReader::new(source),
            line: String::new(),
            read: 0,
            panic_after: self.panic_after,
        };
        if let Some(expected) = &self.header {
            match reader.next_line()? {
                None => return Err(RowError::construction("missing header line")),
                Some(found) if &found != expected => {
                    return Err(RowError::construction(format!(
                        "header mismatch: expected {expected:?}, found {found:?}"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(reader)
    }

    fn writer(&self, mut sink: Box<dyn Write + Send>) -> Result<LinesWriter> {
        if let Some(header) = &self.header {
            writeln!(sink, "{header}").map_err(|err| RowError::from(err).on_encode())?;
        }
        Ok(LinesWriter { inner: sink })
    }
}

impl RowReader<String> for LinesReader {
    fn read(&mut self) -> Result<Option<String>> {
        if self.panic_after == Some(self.read) {
            panic!("injected panic after {} rows", self.read);
        }
        let line = self.next_line()?;
        if line.is_some() {
            self.read += 1;
        }
        Ok(line)
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        settle(prior, Ok(()))
    }
}

impl RowWriter<String> for LinesWriter {
    fn write(&mut self, row: String) -> Result<()> {
        writeln!(self.inner, "{row}").map_err(|err| RowError::from(err).on_encode())
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        settle(prior, self.inner.flush().map_err(RowError::from))
    }
}

// ============================================================================
// Recording writers
// ============================================================================

struct RecordedState<T> {
    rows: Vec<T>,
    closes: Vec<Option<RowError>>,
}

/// Shared view of everything a [`RecordingWriter`] saw.
pub struct Recorded<T> {
    state: Arc<Mutex<RecordedState<T>>>,
}

impl<T> Clone for Recorded<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Recorded<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(RecordedState {
                rows: Vec::new(),
                closes: Vec::new(),
            })),
        }
    }
}

impl<T> Recorded<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut RecordedState<T>) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn row_count(&self) -> usize {
        self.with(|s| s.rows.len())
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.with(|s| s.closes.len())
    }

    /// The `prior` passed to the first `close`, or `None` if never closed.
    pub fn close_reason(&self) -> Option<Option<RowError>> {
        self.with(|s| s.closes.first().cloned())
    }
}

impl<T: Clone> Recorded<T> {
    pub fn rows(&self) -> Vec<T> {
        self.with(|s| s.rows.clone())
    }
}

/// A writer that records rows instead of encoding them.
pub struct RecordingWriter<T> {
    recorded: Recorded<T>,
    fail_on: Option<usize>,
    delay: Option<Duration>,
}

impl<T> RecordingWriter<T> {
    pub fn new(recorded: Recorded<T>) -> Self {
        Self {
            recorded,
            fail_on: None,
            delay: None,
        }
    }
}

impl<T: Send> RowWriter<T> for RecordingWriter<T> {
    fn write(&mut self, row: T) -> Result<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let index = self.recorded.row_count();
        if self.fail_on == Some(index) {
            return Err(RowError::encode(format!("refusing row #{}", index + 1)));
        }
        self.recorded.with(|s| s.rows.push(row));
        Ok(())
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        self.recorded.with(|s| s.closes.push(prior.clone()));
        settle(prior, Ok(()))
    }
}

/// [`LinesFormat`] reading, [`RecordingWriter`] writing (the sink is ignored).
#[derive(Clone, Default)]
pub struct RecordingFormat {
    lines: LinesFormat,
    recorded: Recorded<String>,
    fail_on: Option<usize>,
    delay: Option<Duration>,
}

impl RecordingFormat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writers fail on the row with zero-based `index`.
    #[must_use]
    pub fn failing_on(mut self, index: usize) -> Self {
        self.fail_on = Some(index);
        self
    }

    /// Writers sleep for `delay` before each row.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn recorded(&self) -> Recorded<String> {
        self.recorded.clone()
    }
}

impl Format for RecordingFormat {
    type Row = String;
    type Reader = LinesReader;
    type Writer = RecordingWriter<String>;

    fn reader(&self, source: Box<dyn Read + Send>) -> Result<LinesReader> {
        self.lines.reader(source)
    }

    fn writer(&self, _sink: Box<dyn Write + Send>) -> Result<RecordingWriter<String>> {
        Ok(RecordingWriter {
            recorded: self.recorded.clone(),
            fail_on: self.fail_on,
            delay: self.delay,
        })
    }
}

// ============================================================================
// Scripted transports and readers
// ============================================================================

/// Yields `bytes`, then fails every further read with `error`.
pub struct FailingSource {
    bytes: Cursor<Vec<u8>>,
    error: RowError,
}

impl FailingSource {
    pub fn new(bytes: impl Into<Vec<u8>>, error: RowError) -> Self {
        Self {
            bytes: Cursor::new(bytes.into()),
            error,
        }
    }
}

impl Read for FailingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.bytes.read(buf)? {
            0 if !buf.is_empty() => Err(self.error.clone().into_io()),
            n => Ok(n),
        }
    }
}

impl From<FailingSource> for Source {
    fn from(source: FailingSource) -> Self {
        Source::owned(source)
    }
}

/// A reader over in-memory rows, optionally ending with an error.
pub struct VecReader<T> {
    rows: VecDeque<T>,
    error: Option<RowError>,
    delay: Option<Duration>,
}

impl<T> VecReader<T> {
    pub fn new(rows: impl IntoIterator<Item = T>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            error: None,
            delay: None,
        }
    }

    /// Fail with `error` once the rows are exhausted.
    #[must_use]
    pub fn then_fail(mut self, error: RowError) -> Self {
        self.error = Some(error);
        self
    }

    /// Sleep before every row.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Rows not yet read.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl<T: Send> RowReader<T> for VecReader<T> {
    fn read(&mut self) -> Result<Option<T>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match self.rows.pop_front() {
            Some(row) => Ok(Some(row)),
            None => self.error.clone().map_or(Ok(None), Err),
        }
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        settle(prior, Ok(()))
    }
}

/// Yields its rows, then panics.
pub struct PanickingReader<T> {
    rows: VecDeque<T>,
    message: &'static str,
}

impl<T> PanickingReader<T> {
    pub fn new(rows: impl IntoIterator<Item = T>, message: &'static str) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            message,
        }
    }
}

impl<T: Send> RowReader<T> for PanickingReader<T> {
    fn read(&mut self) -> Result<Option<T>> {
        match self.rows.pop_front() {
            Some(row) => Ok(Some(row)),
            None => panic!("{}", self.message),
        }
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        settle(prior, Ok(()))
    }
}

// ============================================================================
// File fixtures
// ============================================================================

/// A temporary file that is deleted when dropped.
pub struct TempFilePath {
    _file: NamedTempFile,
    path: PathBuf,
}

impl TempFilePath {
    /// # Errors
    /// The temporary file could not be created.
    pub fn new() -> io::Result<Self> {
        let file = NamedTempFile::new()?;
        let path = file.path().to_path_buf();
        Ok(Self { _file: file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// An owned source reading the file from the start.
    ///
    /// # Errors
    /// The file could not be opened.
    pub fn source(&self) -> io::Result<Source> {
        Ok(File::open(&self.path)?.into())
    }

    /// An owned sink truncating the file.
    ///
    /// # Errors
    /// The file could not be opened for writing.
    pub fn sink(&self) -> io::Result<Sink> {
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(file.into())
    }

    /// # Errors
    /// The file could not be read or is not UTF-8.
    pub fn read_to_string(&self) -> io::Result<String> {
        std::fs::read_to_string(&self.path)
    }
}

/// A temporary file holding `contents`.
///
/// # Errors
/// The file could not be created or written.
pub fn temp_file_with(contents: impl AsRef<[u8]>) -> io::Result<TempFilePath> {
    let file = TempFilePath::new()?;
    std::fs::write(file.path(), contents)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::RowFormat;

    #[test]
    fn lines_round_trip_with_header() -> anyhow::Result<()> {
        let fmt = RowFormat::new(LinesFormat::with_header("h"));
        let buf = crate::transport::SharedBuffer::new();
        fmt.write_all(buf.clone(), vec!["a".to_string(), "b".to_string()])?;
        assert_eq!(buf.to_string_lossy(), "h\na\nb\n");
        assert_eq!(fmt.read_all(buf.source())?, vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn lines_header_mismatch_is_construction_error() {
        let err = RowFormat::new(LinesFormat::with_header("h"))
            .reader(Source::from_bytes("x\n"))
            .err()
            .expect("mismatch");
        assert_eq!(err.kind(), ErrorKind::Construction);
    }

    #[test]
    fn failing_source_yields_bytes_then_error() {
        let mut src = FailingSource::new(b"ab", RowError::transport("gone"));
        let mut buf = [0u8; 8];
        assert_eq!(src.read(&mut buf).ok(), Some(2));
        let err = src.read(&mut buf).expect_err("exhausted");
        assert_eq!(RowError::from(err).kind(), ErrorKind::Transport);
    }

    #[test]
    fn recording_writer_keeps_rows_and_reason() {
        let recorded = Recorded::<u8>::new();
        let mut w = RecordingWriter::new(recorded.clone());
        assert!(w.write(1).is_ok());
        let err = w.close(Some(RowError::other("upstream"))).expect_err("prior");
        assert_eq!(err.message(), "upstream");
        assert_eq!(recorded.rows(), vec![1]);
        assert_eq!(recorded.close_count(), 1);
        assert_eq!(
            recorded.close_reason().flatten().map(|e| e.message().to_string()),
            Some("upstream".to_string())
        );
    }

    #[test]
    fn vec_reader_then_fail() {
        let mut r = VecReader::new([1, 2]).then_fail(RowError::decode("bad"));
        assert!(matches!(r.read(), Ok(Some(1))));
        assert!(matches!(r.read(), Ok(Some(2))));
        assert_eq!(r.remaining(), 0);
        assert!(r.read().is_err());
    }

    #[test]
    fn temp_file_fixture_is_readable() -> anyhow::Result<()> {
        let file = temp_file_with("x\ny\n")?;
        let rows = RowFormat::new(LinesFormat::new()).read_all(file.source()?)?;
        assert_eq!(rows, vec!["x", "y"]);
        Ok(())
    }
}
