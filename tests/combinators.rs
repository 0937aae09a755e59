#![cfg(all(feature = "io-csv", feature = "io-jsonl"))]

use anyhow::Result;
use csv::StringRecord;
use rowstream::io::csv::CsvFormat;
use rowstream::io::jsonl::JsonLinesFormat;
use rowstream::testing::{FailingSource, LinesFormat, PanickingReader, VecReader};
use rowstream::transport;
use rowstream::{Context, ErrorKind, RowError, RowFormat, RowReader, Source, merge, pipe};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
struct Pair {
    a: String,
    b: String,
}

fn pair_csv() -> RowFormat<CsvFormat<Pair>> {
    RowFormat::new(CsvFormat::new(
        ["A", "B"],
        |rec: &StringRecord| {
            anyhow::ensure!(rec.len() == 2, "expected 2 columns, found {}", rec.len());
            Ok(Pair {
                a: rec[0].to_string(),
                b: rec[1].to_string(),
            })
        },
        |p: &Pair| Ok(vec![p.a.clone(), p.b.clone()]),
    ))
}

/// Read everything; on error return the bytes read so far with the error.
fn drain(mut r: impl Read) -> (Vec<u8>, Option<RowError>) {
    let mut out = Vec::new();
    let err = r.read_to_end(&mut out).err().map(RowError::from);
    (out, err)
}

#[test]
fn pipe_csv_to_jsonl() -> Result<()> {
    let ctx = Context::background();
    let jsonl = RowFormat::new(JsonLinesFormat::<Pair>::new());
    let out = pipe(&ctx, Source::from_bytes("A,B\nx,y\n"), &pair_csv(), &jsonl)?;
    let (bytes, err) = drain(out);
    assert!(err.is_none(), "{err:?}");
    assert_eq!(String::from_utf8(bytes)?, "{\"a\":\"x\",\"b\":\"y\"}\n");
    Ok(())
}

#[test]
fn pipe_jsonl_back_to_csv() -> Result<()> {
    let ctx = Context::background();
    let jsonl = RowFormat::new(JsonLinesFormat::<Pair>::new());
    let src = "{\"a\":\"1\",\"b\":\"2\"}\n{\"a\":\"3\",\"b\":\"4\"}\n";
    let out = pipe(&ctx, Source::from_bytes(src), &jsonl, &pair_csv())?;
    let (bytes, err) = drain(out);
    assert!(err.is_none(), "{err:?}");
    assert_eq!(String::from_utf8(bytes)?, "A,B\n1,2\n3,4\n");
    Ok(())
}

#[test]
fn pipe_surfaces_source_error_after_partial_output() -> Result<()> {
    let ctx = Context::background();
    let lines = RowFormat::new(LinesFormat::new());
    let jsonl = RowFormat::new(JsonLinesFormat::<String>::new());
    let src = FailingSource::new("1\n2\n", RowError::other("source error"));
    let (bytes, err) = drain(pipe(&ctx, src, &lines, &jsonl)?);
    assert_eq!(String::from_utf8(bytes)?, "\"1\"\n\"2\"\n");
    let err = err.expect("error reaches the pipe reader");
    assert_eq!(err.message(), "source error");
    Ok(())
}

#[test]
fn pipe_surfaces_source_construction_error() -> Result<()> {
    let ctx = Context::background();
    let jsonl = RowFormat::new(JsonLinesFormat::<Pair>::new());
    let (bytes, err) = drain(pipe(&ctx, Source::from_bytes(""), &pair_csv(), &jsonl)?);
    assert!(bytes.is_empty());
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Construction));
    Ok(())
}

#[test]
fn csv_read_stream_does_not_wait_for_header() -> Result<()> {
    let ctx = Context::background();
    let (rd, mut wr) = transport::pipe();
    let rows = pair_csv().read_stream(&ctx, rd);
    wr.write_all(b"A,B\nx,y\n")?;
    drop(wr);
    let rows = rows.iter().collect::<rowstream::Result<Vec<_>>>()?;
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
fn pipe_returns_before_source_has_bytes() -> Result<()> {
    let ctx = Context::background();
    let jsonl = RowFormat::new(JsonLinesFormat::<Pair>::new());
    let (rd, mut wr) = transport::pipe();
    let out = pipe(&ctx, rd, &pair_csv(), &jsonl)?;
    wr.write_all(b"A,B\nx,y\n")?;
    drop(wr);
    let (bytes, err) = drain(out);
    assert!(err.is_none(), "{err:?}");
    assert_eq!(String::from_utf8(bytes)?, "{\"a\":\"x\",\"b\":\"y\"}\n");
    Ok(())
}

fn numbered(source: u32, count: u32) -> Box<dyn RowReader<u32>> {
    let rows = (0..count).map(move |i| source * 1000 + i);
    Box::new(VecReader::new(rows).with_delay(Duration::from_micros(50)))
}

#[test]
fn merge_delivers_every_row_in_source_order() -> Result<()> {
    let ctx = Context::background();
    let jsonl = RowFormat::new(JsonLinesFormat::<u32>::new());
    let mut merged = merge(&ctx, &jsonl, vec![numbered(1, 50), numbered(2, 30), numbered(3, 0)])?;

    let mut bytes = Vec::new();
    merged.read_to_end(&mut bytes)?;
    let rows = jsonl.read_all(Source::from_bytes(bytes))?;
    assert_eq!(rows.len(), 80);

    let mut by_source: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for row in rows {
        by_source.entry(row / 1000).or_default().push(row % 1000);
    }
    assert_eq!(by_source[&1], (0..50).collect::<Vec<_>>());
    assert_eq!(by_source[&2], (0..30).collect::<Vec<_>>());
    assert!(!by_source.contains_key(&3));

    let readers = merged.into_sources()?;
    assert_eq!(readers.len(), 3);
    for mut reader in readers {
        assert!(reader.read()?.is_none(), "inputs were drained");
        reader.close(None)?;
    }
    Ok(())
}

#[test]
fn merge_of_nothing_is_empty() -> Result<()> {
    let ctx = Context::background();
    let jsonl = RowFormat::new(JsonLinesFormat::<u32>::new());
    let (bytes, err) = drain(merge(&ctx, &jsonl, Vec::new())?);
    assert!(bytes.is_empty());
    assert!(err.is_none());
    Ok(())
}

#[test]
fn merge_forwards_input_error() -> Result<()> {
    let ctx = Context::background();
    let jsonl = RowFormat::new(JsonLinesFormat::<u32>::new());
    let failing: Box<dyn RowReader<u32>> =
        Box::new(VecReader::new([7]).then_fail(RowError::transport("input 2 broke")));
    let merged = merge(&ctx, &jsonl, vec![numbered(1, 5), failing])?;
    let (_bytes, err) = drain(merged);
    let err = err.expect("merge fails");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.message(), "input 2 broke");
    Ok(())
}

#[test]
fn merge_recovers_input_panic() -> Result<()> {
    let ctx = Context::background();
    let jsonl = RowFormat::new(JsonLinesFormat::<u32>::new());
    let panicking: Box<dyn RowReader<u32>> =
        Box::new(PanickingReader::new([1, 2], "input exploded"));
    let merged = merge(&ctx, &jsonl, vec![panicking])?;
    let (bytes, err) = drain(merged);
    assert_eq!(String::from_utf8(bytes)?, "1\n2\n");
    let err = err.expect("panic is reported");
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.message().contains("input exploded"));
    Ok(())
}

#[test]
fn merge_into_sources_stops_unread_inputs() -> Result<()> {
    let ctx = Context::background();
    let jsonl = RowFormat::new(JsonLinesFormat::<u32>::new());
    let merged = merge(&ctx, &jsonl, vec![numbered(1, 100_000)])?;
    let readers = merged.into_sources()?;
    assert_eq!(readers.len(), 1);
    Ok(())
}
