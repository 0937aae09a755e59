#![cfg(feature = "io-jsonl")]

use anyhow::Result;
use rowstream::io::jsonl::JsonLinesFormat;
use rowstream::testing::{FailingSource, TempFilePath};
use rowstream::{ErrorKind, RowError, RowFormat, SharedBuffer, Source};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Debug)]
struct Rec {
    id: u32,
    word: String,
}

fn recs() -> RowFormat<JsonLinesFormat<Rec>> {
    RowFormat::new(JsonLinesFormat::new())
}

fn sample() -> Vec<Rec> {
    vec![
        Rec {
            id: 1,
            word: "hi".into(),
        },
        Rec {
            id: 2,
            word: "there".into(),
        },
    ]
}

#[test]
fn jsonl_roundtrip_through_file() -> Result<()> {
    let file = TempFilePath::new()?;
    assert_eq!(recs().write_all(file.sink()?, sample())?, 2);
    assert_eq!(
        file.read_to_string()?,
        "{\"id\":1,\"word\":\"hi\"}\n{\"id\":2,\"word\":\"there\"}\n"
    );
    assert_eq!(recs().read_all(file.source()?)?, sample());
    Ok(())
}

#[test]
fn jsonl_empty_source_is_empty_vec() -> Result<()> {
    let rows = recs().read_all(Source::from_bytes(Vec::new()))?;
    assert!(rows.is_empty());
    Ok(())
}

#[test]
fn jsonl_transport_error_keeps_partial_rows() {
    let src = FailingSource::new(
        "{\"id\":1,\"word\":\"hi\"}\n",
        RowError::transport("connection reset"),
    );
    let partial = recs().read_all(src).expect_err("transport fails");
    assert_eq!(partial.rows, sample()[..1].to_vec());
    assert_eq!(partial.error.kind(), ErrorKind::Transport);
    assert_eq!(partial.error.message(), "connection reset");
}

#[test]
fn jsonl_partial_converts_into_row_error() {
    fn read(src: Source) -> rowstream::Result<Vec<Rec>> {
        Ok(recs().read_all(src)?)
    }
    let err = read(Source::from_bytes("{oops}\n")).expect_err("bad json");
    assert_eq!(err.kind(), ErrorKind::Decode);
}

#[test]
fn jsonl_retained_sink_stays_usable() -> Result<()> {
    let buf = SharedBuffer::new();
    recs().write_all(buf.clone(), sample())?;
    recs().write_all(buf.clone(), sample())?;
    assert_eq!(recs().read_all(buf.source())?.len(), 4);
    Ok(())
}
