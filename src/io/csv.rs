//! Delimited text with a header line.
//!
//! The first line of every stream is a header row: writers emit it at
//! construction, readers consume it at construction and fail with a
//! construction error when the source is empty. A header-only source is valid
//! and reads as an empty stream.
//!
//! Rows are mapped to records either by caller-supplied closures
//! ([`CsvFormat::new`]) or by Serde ([`CsvFormat::serde`], fields matched by
//! header name).
//!
//! # Design notes
//! - Every row must have as many fields as the header.
//! - Blank lines are skipped by the `csv` parser.

use crate::error::{ErrorKind, Result, RowError};
use crate::io::finish_writer;
use crate::row::{Format, RowReader, RowWriter, settle};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use std::sync::Arc;

type DecodeFn<T> = Arc<dyn Fn(&StringRecord, &StringRecord) -> anyhow::Result<T> + Send + Sync>;
type EncodeFn<T> =
    Arc<dyn Fn(&mut csv::Writer<Box<dyn Write + Send>>, &T) -> anyhow::Result<()> + Send + Sync>;

/// Header-first delimited text format for records of type `T`.
pub struct CsvFormat<T> {
    header: Vec<String>,
    delimiter: u8,
    decode: DecodeFn<T>,
    encode: EncodeFn<T>,
}

impl<T> Clone for CsvFormat<T> {
    fn clone(&self) -> Self {
        Self {
            header: self.header.clone(),
            delimiter: self.delimiter,
            decode: Arc::clone(&self.decode),
            encode: Arc::clone(&self.encode),
        }
    }
}

impl<T> CsvFormat<T> {
    /// A format with explicit field mapping.
    ///
    /// `decode` receives one data row; `encode` returns the fields of one row,
    /// in header order.
    pub fn new<H, S, D, E>(header: H, decode: D, encode: E) -> Self
    where
        H: IntoIterator<Item = S>,
        S: Into<String>,
        D: Fn(&StringRecord) -> anyhow::Result<T> + Send + Sync + 'static,
        E: Fn(&T) -> anyhow::Result<Vec<String>> + Send + Sync + 'static,
    {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            delimiter: b',',
            decode: Arc::new(move |record, _header| decode(record)),
            encode: Arc::new(move |wtr, row| {
                let fields = encode(row)?;
                wtr.write_record(&fields)?;
                Ok(())
            }),
        }
    }

    /// Field delimiter (default `,`).
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Header written by writers of this format.
    pub fn header(&self) -> &[String] {
        &self.header
    }
}

impl<T: Serialize + DeserializeOwned> CsvFormat<T> {
    /// A Serde-backed format.
    ///
    /// Readers match fields by the header *found in the source*; writers emit
    /// `header` and serialize each record in field order.
    pub fn serde<H, S>(header: H) -> Self
    where
        H: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            delimiter: b',',
            decode: Arc::new(|record, header| Ok(record.deserialize(Some(header))?)),
            encode: Arc::new(|wtr, row| {
                wtr.serialize(row)?;
                Ok(())
            }),
        }
    }
}

/// Reader half of [`CsvFormat`].
pub struct CsvReader<T> {
    inner: csv::Reader<Box<dyn Read + Send>>,
    header: StringRecord,
    record: StringRecord,
    decode: DecodeFn<T>,
    rows: u64,
}

/// Writer half of [`CsvFormat`].
pub struct CsvWriter<T> {
    inner: csv::Writer<Box<dyn Write + Send>>,
    encode: EncodeFn<T>,
    failed: Option<RowError>,
    rows: u64,
}

// Codec closures report `anyhow` errors; keep transport failures recognisable.
fn codec_error(err: anyhow::Error, kind: ErrorKind, what: String) -> RowError {
    let err = match err.downcast::<csv::Error>() {
        Ok(csv_err) => {
            let row_err = RowError::from(csv_err);
            if row_err.kind() != ErrorKind::Decode {
                return row_err;
            }
            anyhow::Error::new(row_err)
        }
        Err(err) => err,
    };
    RowError::new(kind, format!("{what}: {err:#}")).with_source(err)
}

impl<T: Send + 'static> Format for CsvFormat<T> {
    type Row = T;
    type Reader = CsvReader<T>;
    type Writer = CsvWriter<T>;

    fn reader(&self, source: Box<dyn Read + Send>) -> Result<CsvReader<T>> {
        let mut inner = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .from_reader(source);
        let mut header = StringRecord::new();
        let found = inner.read_record(&mut header).map_err(|err| {
            let err = RowError::from(err);
            if err.kind() == ErrorKind::Decode {
                RowError::construction(format!("read CSV header: {}", err.message()))
            } else {
                err
            }
        })?;
        if !found {
            return Err(RowError::construction("empty CSV source: expected a header row"));
        }
        Ok(CsvReader {
            inner,
            header,
            record: StringRecord::new(),
            decode: Arc::clone(&self.decode),
            rows: 0,
        })
    }

    fn writer(&self, sink: Box<dyn Write + Send>) -> Result<CsvWriter<T>> {
        let mut inner = WriterBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .from_writer(sink);
        inner
            .write_record(&self.header)
            .map_err(|err| RowError::from(err).on_encode())?;
        Ok(CsvWriter {
            inner,
            encode: Arc::clone(&self.encode),
            failed: None,
            rows: 0,
        })
    }
}

impl<T: Send> RowReader<T> for CsvReader<T> {
    fn read(&mut self) -> Result<Option<T>> {
        if !self.inner.read_record(&mut self.record)? {
            return Ok(None);
        }
        self.rows += 1;
        let row = (self.decode)(&self.record, &self.header).map_err(|err| {
            codec_error(err, ErrorKind::Decode, format!("parse CSV record #{}", self.rows))
        })?;
        Ok(Some(row))
    }

    fn close(&mut self, prior: Option<RowError>) -> Result<()> {
        settle(prior, Ok(()))
    }
}

impl<T: Send> RowWriter<T> for CsvWriter<T> {
    fn write(&mut self, row: T) -> Result<()> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        self.rows += 1;
        let written = (self.encode)(&mut self.inner, &row).map_err(|err| {
            codec_error(err, ErrorKind::Encode, format!("serialize CSV row #{}", self.rows))
                .on_encode()
        });
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::RowFormat;
    use crate::transport::{SharedBuffer, Source};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pair {
        a: String,
        b: String,
    }

    fn pairs() -> RowFormat<CsvFormat<Pair>> {
        RowFormat::new(CsvFormat::new(
            ["A", "B"],
            |rec: &StringRecord| {
                anyhow::ensure!(rec.len() == 2, "record should have 2 columns");
                Ok(Pair {
                    a: rec[0].to_string(),
                    b: rec[1].to_string(),
                })
            },
            |row: &Pair| Ok(vec![row.a.clone(), row.b.clone()]),
        ))
    }

    #[test]
    fn reads_rows_after_header() -> anyhow::Result<()> {
        let rows = pairs().read_all(Source::from_bytes("A,B\nx,y\n"))?;
        assert_eq!(
            rows,
            vec![Pair {
                a: "x".into(),
                b: "y".into()
            }]
        );
        Ok(())
    }

    #[test]
    fn writes_header_then_rows() -> anyhow::Result<()> {
        let buf = SharedBuffer::new();
        pairs().write_all(
            buf.clone(),
            vec![Pair {
                a: "x".into(),
                b: "y".into(),
            }],
        )?;
        assert_eq!(buf.to_string_lossy(), "A,B\nx,y\n");
        Ok(())
    }

    #[test]
    fn empty_source_is_construction_error() {
        let err = pairs()
            .reader(Source::from_bytes(""))
            .err()
            .expect("header required");
        assert_eq!(err.kind(), ErrorKind::Construction);
    }

    #[test]
    fn header_only_reads_as_empty() -> anyhow::Result<()> {
        let mut reader = pairs().reader(Source::from_bytes("A,B\n"))?;
        assert!(reader.read()?.is_none());
        reader.close(None)?;
        Ok(())
    }

    #[test]
    fn short_row_is_decode_error() {
        let partial = pairs()
            .read_all(Source::from_bytes("A,B\ngarbage\n"))
            .expect_err("unequal lengths");
        assert_eq!(partial.error.kind(), ErrorKind::Decode);
        assert!(partial.rows.is_empty());
    }

    #[test]
    fn serde_variant_uses_source_header_and_delimiter() -> anyhow::Result<()> {
        let fmt = RowFormat::new(CsvFormat::<Pair>::serde(["a", "b"]).with_delimiter(b';'));
        let rows = fmt.read_all(Source::from_bytes("b;a\n2;1\n"))?;
        assert_eq!(
            rows,
            vec![Pair {
                a: "1".into(),
                b: "2".into()
            }]
        );

        let buf = SharedBuffer::new();
        fmt.write_all(buf.clone(), rows)?;
        assert_eq!(buf.to_string_lossy(), "a;b\n1;2\n");
        Ok(())
    }

    #[test]
    fn decode_closure_error_mentions_record_number() {
        let fmt = RowFormat::new(CsvFormat::<u32>::new(
            ["n"],
            |rec: &StringRecord| Ok(rec[0].parse::<u32>()?),
            |n: &u32| Ok(vec![n.to_string()]),
        ));
        let partial = fmt
            .read_all(Source::from_bytes("n\n1\nnope\n"))
            .expect_err("bad number");
        assert_eq!(partial.rows, vec![1]);
        assert_eq!(partial.error.kind(), ErrorKind::Decode);
        assert!(partial.error.message().contains("parse CSV record #2"));
    }
}
