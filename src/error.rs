use std::fmt;

/// Errors surfaced by the queue index.
///
/// Every variant corresponds to a row of the error table in the design
/// notes: caller mistakes (`InvalidMessageId`, `NotOnBoundary`) are
/// returned without mutating state; `Corrupt` covers the recovery-safe
/// cases (truncated trailing records, an unexpected deliver-only record
/// with no matching publish) that are logged and skipped rather than
/// treated as fatal; `Io` is fatal for the owning `IndexState` and the
/// caller must reopen the queue via `init`.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    InvalidMessageId { len: usize },
    NotOnBoundary { seq_id: u64 },
    Corrupt(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::InvalidMessageId { len } => {
                write!(f, "invalid message id: expected 16 bytes, got {len}")
            }
            Error::NotOnBoundary { seq_id } => {
                write!(f, "seq_id {seq_id} is not on a segment boundary")
            }
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
