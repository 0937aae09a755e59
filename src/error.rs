//! Error taxonomy shared by every reader, writer, task and combinator.
//!
//! A single [`RowError`] value is often delivered to more than one place (a
//! channel consumer *and* a close call, or both ends of a pipe), so it is cheap
//! to clone: the optional underlying cause is reference counted.

use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Category of a [`RowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Format setup failed (e.g. a header was expected but the source was empty).
    Construction,
    /// A record failed to parse.
    Decode,
    /// A record failed to serialize, or the sink rejected it.
    Encode,
    /// The underlying byte source or sink failed.
    Transport,
    /// The stream's context was cancelled.
    Cancelled,
    /// The stream's context deadline passed.
    DeadlineExceeded,
    /// The other side of a channel or pipe went away.
    Closed,
    /// A panic was caught at a task boundary.
    Internal,
    /// Caller-supplied error, e.g. an upstream failure passed to `close`.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Construction => "construction",
            Self::Decode => "decode",
            Self::Encode => "encode",
            Self::Transport => "transport",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Closed => "closed",
            Self::Internal => "internal",
            Self::Other => "error",
        };
        f.write_str(s)
    }
}

/// Terminal error of a record stream.
#[derive(Debug, Clone)]
pub struct RowError {
    kind: ErrorKind,
    message: String,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, RowError>;

impl RowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        self.source = Some(Arc::from(source.into()));
        self
    }

    pub fn construction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Construction, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encode, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "context cancelled")
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded, "context deadline exceeded")
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// A caller-supplied error, typically an upstream failure handed to `close`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The bare message, without the kind prefix used by `Display`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True for `Cancelled` and `DeadlineExceeded`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }

    /// Re-express this error as an `io::Error` that can be unwrapped again by
    /// `RowError::from(io::Error)` on the other side of a byte transport.
    pub fn into_io(self) -> io::Error {
        let kind = match self.kind {
            ErrorKind::Closed => io::ErrorKind::BrokenPipe,
            ErrorKind::DeadlineExceeded => io::ErrorKind::TimedOut,
            ErrorKind::Decode => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }

    /// Serializer failures surface from `serde_json`/`csv` as decode errors;
    /// on the write path they are encode errors.
    pub(crate) fn on_encode(self) -> Self {
        if self.kind == ErrorKind::Decode {
            Self {
                kind: ErrorKind::Encode,
                ..self
            }
        } else {
            self
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for RowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn Error + 'static))
    }
}

impl From<io::Error> for RowError {
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<RowError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(row_err) = inner.downcast::<RowError>() {
                    return *row_err;
                }
            }
            return RowError::transport("i/o error");
        }
        let kind = match err.kind() {
            io::ErrorKind::BrokenPipe => ErrorKind::Closed,
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => ErrorKind::Decode,
            _ => ErrorKind::Transport,
        };
        RowError::new(kind, err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for RowError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            return RowError::from(io::Error::from(err));
        }
        RowError::decode(err.to_string()).with_source(err)
    }
}

#[cfg(feature = "io-csv")]
impl From<csv::Error> for RowError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            if let csv::ErrorKind::Io(io_err) = err.into_kind() {
                return RowError::from(io_err);
            }
            return RowError::transport("csv i/o error");
        }
        RowError::decode(err.to_string()).with_source(err)
    }
}

impl From<anyhow::Error> for RowError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<RowError>() {
            Ok(row_err) => row_err,
            Err(err) => RowError::other(format!("{err:#}")).with_source(err),
        }
    }
}
