//! Cooperative cancellation for streaming tasks.
//!
//! A [`Context`] carries a "done" signal and the reason it fired. Tasks select
//! on [`Context::done`] next to their row channel; the done channel never
//! yields a value, it disconnects when the context is cancelled. Deadlines are
//! exposed separately through [`Context::deadline`] so tasks can add a timer
//! arm to the same `select!`.
//!
//! Clones share state: cancelling any clone cancels them all.

use crate::error::RowError;
use crossbeam_channel::{Receiver, Sender, after, bounded, never};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    // Dropping the sender disconnects every clone of `done_rx`.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    reason: Mutex<Option<RowError>>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn background() -> Self {
        Self::build(None)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        let (done_tx, done_rx) = bounded(0);
        Self {
            inner: Arc::new(ContextInner {
                done_tx: Mutex::new(Some(done_tx)),
                done_rx,
                reason: Mutex::new(None),
                deadline,
            }),
        }
    }

    /// Cancel with the generic cancellation error.
    pub fn cancel(&self) {
        self.cancel_with(RowError::cancelled());
    }

    /// Cancel with a specific reason. Only the first reason is kept.
    pub fn cancel_with(&self, reason: RowError) {
        let mut slot = self
            .inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            tracing::debug!(%reason, "context cancelled");
            *slot = Some(reason);
        }
        drop(slot);
        self.inner
            .done_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Channel that disconnects once the context is cancelled.
    ///
    /// Deadlines do not disconnect it; pair it with [`timer`](Self::timer).
    pub fn done(&self) -> Receiver<()> {
        self.inner.done_rx.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// A channel that fires at the deadline, or never.
    pub fn timer(&self) -> Receiver<Instant> {
        match self.inner.deadline {
            Some(deadline) => after(deadline.saturating_duration_since(Instant::now())),
            None => never(),
        }
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<RowError> {
        let reason = self
            .inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if reason.is_some() {
            return reason;
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(RowError::deadline_exceeded()),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish()
    }
}
