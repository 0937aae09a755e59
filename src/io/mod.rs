//! Reference formats built on established encoding crates.
//!
//! Each format implements [`Format`](crate::Format) and is meant to be wrapped
//! in a [`RowFormat`](crate::RowFormat).

#[cfg_attr(docsrs, doc(cfg(feature = "io-jsonl")))]
#[cfg(feature = "io-jsonl")]
pub mod jsonl;

#[cfg_attr(docsrs, doc(cfg(feature = "io-csv")))]
#[cfg(feature = "io-csv")]
pub mod csv;

#[cfg(any(feature = "io-csv", feature = "io-jsonl"))]
use crate::error::{Result, RowError};

/// Close outcome for a buffered writer.
///
/// Buffered rows are always flushed so partial output reaches the sink. An
/// upstream `prior` error is reported as is (a flush failure then is only
/// logged); otherwise the first failed write wins over the flush result.
#[cfg(any(feature = "io-csv", feature = "io-jsonl"))]
pub(crate) fn finish_writer(
    prior: Option<RowError>,
    first_failure: Option<RowError>,
    flushed: std::io::Result<()>,
) -> Result<()> {
    let flushed = flushed.map_err(|err| RowError::from(err).on_encode());
    match (prior, first_failure, flushed) {
        (Some(prior), _, Err(flush_err)) => {
            tracing::debug!(%flush_err, "flush failed while closing after an error");
            Err(prior)
        }
        (Some(prior), _, Ok(())) => Err(prior),
        (None, Some(failure), _) => Err(failure),
        (None, None, flushed) => flushed,
    }
}
