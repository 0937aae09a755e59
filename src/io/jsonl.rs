//! JSON Lines: one compact JSON document per line.
//!
//! # Notes
//! - Empty/whitespace-only lines are skipped on read.
//! - There is no header; an empty source is an empty stream.
//! - Decode errors name the offending line number.

use crate::error::{Result, RowError};
use crate::io::finish_writer;
use crate::row::{Format, RowReader, RowWriter, settle};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;

/// Serde-backed JSON Lines format for records of type `T`.
pub struct JsonLinesFormat<T> {
    _row: PhantomData<fn() -> T>,
}

impl<T> JsonLinesFormat<T> {
    pub fn new() -> Self {
        Self { _row: PhantomData }
    }
}

impl<T> Default for JsonLinesFormat<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonLinesFormat<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonLinesFormat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonLinesFormat")
    }
}

/// Reader half of [`JsonLinesFormat`].
pub struct JsonLinesReader<T> {
    inner: BufReader<Box<dyn Read + Send>>,
    line: String,
    line_no: u64,
    _row: PhantomData<fn() -> T>,
}

/// Writer half of [`JsonLinesFormat`].
pub struct JsonLinesWriter<T> {
    inner: BufWriter<Box<dyn Write + Send>>,
    failed: Option<RowError>,
    _row: PhantomData<fn(T)>,
}

impl<T> Format for JsonLinesFormat<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Row = T;
    type Reader = JsonLinesReader<T>;
    type Writer = JsonLinesWriter<T>;

    fn reader(&self, source: Box<dyn Read + Send>) -> Result<JsonLinesReader<T>> {
        Ok(JsonLinesReader {
            inner: BufReader::new(source),
            line: String::new(),
            line_no: 0,
            _row: PhantomData,
        })
    }

    fn writer(&self, sink: Box<dyn Write + Send>) -> Result<JsonLinesWriter<T>> {
        Ok(JsonLinesWriter {
            inner: BufWriter::new(sink),
            failed: None,
            _row: PhantomData,
        })
    }
}

impl<T: DeserializeOwned + Send> RowReader<T> for JsonLinesReader<T> {
    fn read(&mut self) -> Result<Option<T>> {
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            let line_no = self.line_no;
            return serde_json::from_str(text).map(Some).map_err(|err| {
                RowError::decode(format!("parse JSONL line {line_no}: {err}")).with_source(err)
            });
        }
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        settle(prior, Ok(()))
    }
}

impl<T: Serialize + Send> RowWriter<T> for JsonLinesWriter<T> {
    fn write(&mut self, row: T) -> Result<()> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        let written = serde_json::to_writer(&mut self.inner, &row)
            .map_err(RowError::from)
            .and_then(|()| Ok(self.inner.write_all(b"\n")?))
            .map_err(RowError::on_encode);
        if let Err(err) = &written {
            self.failed = Some(err.clone());
        }
        written
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        let flushed = self.inner.flush();
        finish_writer(prior, self.failed.take(), flushed)
    }
}
