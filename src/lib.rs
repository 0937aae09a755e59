//! # rowstream
//!
//! Streaming, row-oriented I/O over byte transports.
//!
//! A format implements the small [`Format`] contract (one [`RowReader`] and one
//! [`RowWriter`] per transport). Wrapping it in a [`RowFormat`] derives the
//! rest:
//!
//! - **Closing wrappers** that close the underlying transport too
//! - **Batch I/O**: [`RowFormat::read_all`] / [`RowFormat::write_all`]
//! - **Channel streaming** on dedicated threads:
//!   [`RowFormat::read_stream`] / [`RowFormat::write_stream`]
//! - **Combinators**: [`pipe`] converts between formats, [`merge`] fans rows
//!   from several readers into one output
//!
//! Errors travel with the data: a reader's terminal error is passed to the
//! paired writer's `close`, and from there to whoever reads the output.
//! Long-running operations observe a [`Context`] for cancellation and
//! deadlines, and a panic inside a task becomes an ordinary error.
//!
//! ## Quick Start
//!
//! ```
//! use rowstream::io::csv::CsvFormat;
//! use rowstream::io::jsonl::JsonLinesFormat;
//! use rowstream::{Context, RowFormat, SharedBuffer, Source};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct City { name: String, pop: u32 }
//!
//! # fn main() -> anyhow::Result<()> {
//! let csv = RowFormat::new(CsvFormat::<City>::serde(["name", "pop"]));
//! let jsonl = RowFormat::new(JsonLinesFormat::<City>::new());
//!
//! let ctx = Context::background();
//! let rows = csv.read_stream(&ctx, Source::from_bytes("name,pop\nOslo,700000\n"));
//! let out = SharedBuffer::new();
//! jsonl.write_stream(&ctx, out.clone(), rows)?.wait()?;
//!
//! assert_eq!(out.to_string_lossy(), "{\"name\":\"Oslo\",\"pop\":700000}\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `io-jsonl` (default): [`io::jsonl`]
//! - `io-csv` (default): [`io::csv`]

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod closing;
pub mod combinators;
pub mod context;
pub mod error;
pub mod format;
pub mod io;
pub mod row;
mod task;
pub mod testing;
pub mod transport;

pub use closing::{ClosingReader, ClosingWriter};
pub use combinators::{Merged, merge, pipe};
pub use context::Context;
pub use error::{ErrorKind, Result, RowError};
pub use format::{DEFAULT_CHANNEL_CAPACITY, Partial, RowFormat, StreamOptions};
pub use row::{Format, RowReader, RowResult, RowWriter};
pub use task::StreamTask;
pub use transport::{PipeReader, PipeWriter, SharedBuffer, Sink, Source};
