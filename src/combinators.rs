//! Format-to-format conversion ([`pipe`]) and fan-in ([`merge`]).
//!
//! Both return the read end of an in-process byte pipe carrying the
//! destination encoding. Failures anywhere upstream surface as a read error on
//! that pipe; clean completion is end of file.

use crate::context::Context;
use crate::error::{Result, RowError};
use crate::format::RowFormat;
use crate::row::{Format, RowReader};
use crate::task::{self, StreamTask};
use crate::transport::{PipeReader, Source, pipe_with_capacity};
use std::io::{self, Read};
use std::thread::JoinHandle;

/// Convert the rows of `source` from format `from` into format `to`.
///
/// ```
/// use rowstream::io::csv::CsvFormat;
/// use rowstream::io::jsonl::JsonLinesFormat;
/// use rowstream::{Context, RowFormat, Source, pipe};
/// use serde::{Deserialize, Serialize};
/// use std::io::Read;
///
/// #[derive(Serialize, Deserialize)]
/// struct Row { a: String, b: String }
///
/// # fn main() -> anyhow::Result<()> {
/// let csv = RowFormat::new(CsvFormat::<Row>::serde(["a", "b"]));
/// let jsonl = RowFormat::new(JsonLinesFormat::<Row>::new());
///
/// let mut out = String::new();
/// pipe(&Context::background(), Source::from_bytes("a,b\nx,y\n"), &csv, &jsonl)?
///     .read_to_string(&mut out)?;
/// assert_eq!(out, "{\"a\":\"x\",\"b\":\"y\"}\n");
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// The destination writer's construction error. Source construction errors
/// are delivered through the returned pipe.
pub fn pipe<A, B>(
    ctx: &Context,
    source: impl Into<Source>,
    from: &RowFormat<A>,
    to: &RowFormat<B>,
) -> Result<PipeReader>
where
    A: Format,
    B: Format<Row = A::Row>,
{
    let rows = from.read_stream(ctx, source);
    let (output, sink) = pipe_with_capacity(to.options().pipe_capacity);
    let _detached = to.write_stream(ctx, sink, rows)?;
    Ok(output)
}

/// Merge already-open readers into one stream written with `out`.
///
/// Rows of one input keep their order; inputs interleave in arrival order.
/// The output ends once every input has reached end of stream. An input error
/// is forwarded and ends the output with that error.
///
/// The readers are *not* closed: take them back with
/// [`Merged::into_sources`] once the output has been consumed.
///
/// # Errors
/// The destination writer's construction error. The readers are dropped in
/// that case.
pub fn merge<F: Format>(
    ctx: &Context,
    out: &RowFormat<F>,
    readers: Vec<Box<dyn RowReader<F::Row>>>,
) -> Result<Merged<F::Row>> {
    let (tx, rx) = out.options().channel();
    let (output, sink) = pipe_with_capacity(out.options().pipe_capacity);
    let writer = out.write_stream(ctx, sink, rx)?;
    let mut sources = Vec::with_capacity(readers.len());
    for (index, reader) in readers.into_iter().enumerate() {
        sources.push(task::spawn_source(ctx.clone(), index, reader, tx.clone())?);
    }
    // Completion barrier: each input holds one sender, the channel ends with the last.
    drop(tx);
    tracing::debug!(inputs = sources.len(), "merge started");
    Ok(Merged {
        output,
        sources,
        writer,
    })
}

/// Output of [`merge`]: readable destination bytes plus the input readers.
pub struct Merged<T> {
    output: PipeReader,
    sources: Vec<JoinHandle<Box<dyn RowReader<T>>>>,
    writer: StreamTask,
}

impl<T: Send + 'static> Merged<T> {
    /// Stop reading the output and hand back the input readers, unclosed.
    ///
    /// Dropping the output first stops any input still running, so this
    /// never blocks on an undrained pipe.
    ///
    /// # Errors
    /// An input task that died outside its panic boundary.
    pub fn into_sources(self) -> Result<Vec<Box<dyn RowReader<T>>>> {
        let Self {
            output,
            sources,
            writer,
        } = self;
        drop(output);
        let readers = sources
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| RowError::internal("merge input task died"))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Err(err) = writer.wait() {
            tracing::debug!(%err, "merge writer closed with error");
        }
        Ok(readers)
    }
}

impl<T> Read for Merged<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.output.read(buf)
    }
}
