//! Dedicated threads behind the streaming operations.
//!
//! Every task owns its reader or writer *outside* its panic boundary, so a
//! panic inside the loop is converted to an [`ErrorKind::Internal`] error and
//! still reaches the close call and the other side of the channel.
//!
//! [`ErrorKind::Internal`]: crate::error::ErrorKind::Internal

use crate::context::Context;
use crate::error::{Result, RowError};
use crate::row::{RowReader, RowResult, RowWriter};
use crossbeam_channel::{Receiver, Sender, select};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Handle to a running `write_stream` task.
///
/// Dropping it detaches the task. [`wait`](Self::wait) blocks until the
/// writer is closed and returns the close outcome.
#[must_use = "drop the task to detach it, or wait() for the close outcome"]
pub struct StreamTask {
    handle: JoinHandle<Result<()>>,
}

impl StreamTask {
    /// # Errors
    /// The writer's close outcome: the stream's terminal error, if any.
    pub fn wait(self) -> Result<()> {
        self.handle
            .join()
            .unwrap_or_else(|payload| Err(panic_error(payload)))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> RowError {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::warn!(panic = %msg, "recovered panic in stream task");
    RowError::internal(format!("recovered panic: {msg}"))
}

fn spawn<R: Send + 'static>(
    name: &str,
    f: impl FnOnce() -> R + Send + 'static,
) -> Result<JoinHandle<R>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|err| RowError::internal(format!("spawn {name} thread")).with_source(err))
}

/// Why an item could not be sent.
pub(crate) enum Stop {
    /// The consumer dropped its receiver.
    HungUp,
    /// The context was cancelled or its deadline passed.
    Done(RowError),
}

impl Stop {
    fn into_error(self) -> RowError {
        match self {
            Self::HungUp => RowError::closed("row consumer hung up"),
            Self::Done(reason) => reason,
        }
    }
}

/// Send one item unless the context finishes or the consumer hangs up first.
pub(crate) fn send<T>(
    ctx: &Context,
    timer: &Receiver<Instant>,
    tx: &Sender<RowResult<T>>,
    item: RowResult<T>,
) -> std::result::Result<(), Stop> {
    let done = ctx.done();
    select! {
        send(tx, item) -> res => res.map_err(|_| Stop::HungUp),
        recv(done) -> _ => Err(Stop::Done(ctx.err().unwrap_or_else(RowError::cancelled))),
        recv(timer) -> _ => Err(Stop::Done(RowError::deadline_exceeded())),
    }
}

/// Hand the terminal error to the consumer regardless of the context.
///
/// Blocks until the consumer takes it or drops the receiver.
fn deliver<T>(tx: &Sender<RowResult<T>>, err: RowError) {
    if tx.send(Err(err)).is_err() {
        tracing::debug!("terminal error dropped: row consumer hung up");
    }
}

enum Pumped {
    /// Clean end of stream.
    End,
    /// A read error was forwarded to the consumer.
    Failed(RowError),
    /// The context finished; nothing has told the consumer yet.
    Cancelled(RowError),
    /// The consumer went away.
    HungUp,
}

fn pump<T, R: RowReader<T> + ?Sized>(
    ctx: &Context,
    timer: &Receiver<Instant>,
    reader: &mut R,
    tx: &Sender<RowResult<T>>,
) -> Pumped {
    let stopped = |stop: Stop| match stop {
        Stop::HungUp => Pumped::HungUp,
        Stop::Done(reason) => Pumped::Cancelled(reason),
    };
    loop {
        if let Some(reason) = ctx.err() {
            return Pumped::Cancelled(reason);
        }
        match reader.read() {
            Ok(Some(row)) => {
                if let Err(stop) = send(ctx, timer, tx, Ok(row)) {
                    return stopped(stop);
                }
            }
            Ok(None) => return Pumped::End,
            Err(err) => {
                return match send(ctx, timer, tx, Err(err.clone())) {
                    Ok(()) => Pumped::Failed(err),
                    Err(stop) => stopped(stop),
                };
            }
        }
    }
}

/// Build a reader with `open`, drive it into `tx` and close it (the
/// `read_stream` task).
pub(crate) fn spawn_reader<T, R, O>(
    ctx: Context,
    open: O,
    tx: Sender<RowResult<T>>,
) -> Result<JoinHandle<()>>
where
    T: Send + 'static,
    R: RowReader<T> + 'static,
    O: FnOnce() -> Result<R> + Send + 'static,
{
    spawn("rowstream-read", move || {
        let mut reader = match catch_unwind(AssertUnwindSafe(open)) {
            Ok(Ok(reader)) => reader,
            Ok(Err(err)) => return deliver(&tx, err),
            Err(payload) => return deliver(&tx, panic_error(payload)),
        };
        let timer = ctx.timer();
        let pumped = catch_unwind(AssertUnwindSafe(|| pump(&ctx, &timer, &mut reader, &tx)));
        let prior = match pumped {
            Ok(Pumped::End) => None,
            Ok(Pumped::Failed(err)) => Some(err),
            Ok(Pumped::Cancelled(reason)) => {
                tracing::debug!(%reason, "read stream cancelled");
                deliver(&tx, reason.clone());
                Some(reason)
            }
            Ok(Pumped::HungUp) => {
                tracing::debug!("read stream consumer hung up");
                Some(Stop::HungUp.into_error())
            }
            Err(payload) => {
                let err = panic_error(payload);
                deliver(&tx, err.clone());
                Some(err)
            }
        };
        let clean = prior.is_none();
        let closed = catch_unwind(AssertUnwindSafe(|| reader.close(prior)))
            .unwrap_or_else(|payload| Err(panic_error(payload)));
        match closed {
            Err(err) if clean => deliver(&tx, err),
            Err(err) => tracing::debug!(%err, "read stream closed with error"),
            Ok(()) => {}
        }
    })
}

fn drain<T, W: RowWriter<T> + ?Sized>(
    ctx: &Context,
    writer: &mut W,
    rx: &Receiver<RowResult<T>>,
) -> Option<RowError> {
    let done = ctx.done();
    let timer = ctx.timer();
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(Ok(row)) => {
                    if let Err(err) = writer.write(row) {
                        return Some(err);
                    }
                }
                Ok(Err(err)) => return Some(err),
                Err(_) => return None,
            },
            recv(done) -> _ => return Some(ctx.err().unwrap_or_else(RowError::cancelled)),
            recv(timer) -> _ => return Some(RowError::deadline_exceeded()),
        }
    }
}

/// Drain `rx` into `writer` and close it exactly once (the `write_stream` task).
pub(crate) fn spawn_writer<T, W>(
    ctx: Context,
    mut writer: W,
    rx: Receiver<RowResult<T>>,
) -> Result<StreamTask>
where
    T: Send + 'static,
    W: RowWriter<T> + 'static,
{
    let handle = spawn("rowstream-write", move || {
        let prior = catch_unwind(AssertUnwindSafe(|| drain(&ctx, &mut writer, &rx)))
            .unwrap_or_else(|payload| Some(panic_error(payload)));
        // Hang up before closing so producers stop instead of blocking on a full channel.
        drop(rx);
        if let Some(reason) = &prior {
            tracing::debug!(%reason, "write stream closing with error");
        }
        writer.close(prior)
    })?;
    Ok(StreamTask { handle })
}

/// Forward one merge input into the shared channel. The reader is handed back
/// unclosed when the input is exhausted, failed, or cancelled.
pub(crate) fn spawn_source<T>(
    ctx: Context,
    index: usize,
    mut reader: Box<dyn RowReader<T>>,
    tx: Sender<RowResult<T>>,
) -> Result<JoinHandle<Box<dyn RowReader<T>>>>
where
    T: Send + 'static,
{
    spawn(&format!("rowstream-merge-{index}"), move || {
        let timer = ctx.timer();
        match catch_unwind(AssertUnwindSafe(|| pump(&ctx, &timer, &mut reader, &tx))) {
            Ok(Pumped::End) => tracing::debug!(index, "merge input exhausted"),
            Ok(Pumped::Failed(err)) => tracing::debug!(index, %err, "merge input failed"),
            Ok(Pumped::Cancelled(reason)) => {
                tracing::debug!(index, %reason, "merge input cancelled");
                deliver(&tx, reason);
            }
            Ok(Pumped::HungUp) => tracing::debug!(index, "merge output hung up"),
            Err(payload) => deliver(&tx, panic_error(payload)),
        }
        // `tx` drops here: the shared channel terminates once every input has finished.
        reader
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::VecReader;

    #[test]
    fn panic_error_reads_str_and_string_payloads() {
        let err = panic_error(Box::new("boom"));
        assert_eq!(err.message(), "recovered panic: boom");
        let err = panic_error(Box::new(String::from("bang")));
        assert_eq!(err.message(), "recovered panic: bang");
    }

    #[test]
    fn send_reports_hung_up_consumer() {
        let ctx = Context::background();
        let (tx, rx) = crossbeam_channel::bounded::<RowResult<u8>>(1);
        drop(rx);
        let stop = send(&ctx, &ctx.timer(), &tx, Ok(1)).expect_err("hung up");
        assert!(matches!(stop, Stop::HungUp));
        assert_eq!(stop.into_error().kind(), ErrorKind::Closed);
    }

    #[test]
    fn send_observes_cancellation() {
        let ctx = Context::background();
        let (tx, _rx) = crossbeam_channel::bounded::<RowResult<u8>>(0);
        ctx.cancel();
        let stop = send(&ctx, &ctx.timer(), &tx, Ok(1)).expect_err("cancelled");
        assert!(matches!(&stop, Stop::Done(reason) if reason.is_cancellation()));
    }

    #[test]
    fn reader_construction_error_is_the_only_item() {
        let (tx, rx) = crossbeam_channel::bounded::<RowResult<u8>>(0);
        let open = || -> Result<VecReader<u8>> { Err(RowError::construction("no header")) };
        let opened = spawn_reader(Context::background(), open, tx);
        assert!(opened.is_ok());
        let items: Vec<_> = rx.iter().collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(err) if err.kind() == ErrorKind::Construction));
    }

    /// Yields its rows, then panics while closing.
    struct CloseBomb(VecReader<u8>);

    impl RowReader<u8> for CloseBomb {
        fn read(&mut self) -> Result<Option<u8>> {
            self.0.read()
        }

        fn close(&mut self, _prior: Option<RowError>) -> Result<()> {
            panic!("close exploded");
        }
    }

    #[test]
    fn panic_while_closing_reaches_consumer() {
        let (tx, rx) = crossbeam_channel::bounded::<RowResult<u8>>(4);
        let handle = spawn_reader(
            Context::background(),
            || Ok(CloseBomb(VecReader::new([1, 2]))),
            tx,
        );
        let items: Vec<_> = rx.iter().collect();
        assert_eq!(items.len(), 3);
        assert!(matches!(items[1], Ok(2)));
        let err = items[2].as_ref().expect_err("close panic is reported");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message().contains("close exploded"));
        assert!(handle.is_ok_and(|h| h.join().is_ok()), "thread survives the panic");
    }

    #[test]
    fn cancelled_reader_ends_with_cancellation_error() {
        let ctx = Context::background();
        ctx.cancel();
        let (tx, rx) = crossbeam_channel::bounded::<RowResult<u8>>(0);
        let _detached = spawn_reader(ctx, || Ok(VecReader::new([1, 2, 3])), tx);
        let items: Vec<_> = rx.iter().collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(err) if err.is_cancellation()));
    }
}
