//! Error types for lsmdb.
//!
//! Every failure that reaches a caller is one of the [`ErrorKind`]s below.
//! Engine status codes are translated exactly once, at the engine call site,
//! through `From<EngineError>`.

use crate::engine::{EngineError, Status};
use std::fmt;

/// Caller-visible failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation invalid for the current lifecycle state or argument shape.
    Usage,
    /// A lookup or delete targeted a key that does not exist.
    NotFound,
    /// The engine reported contention; safe to retry after backoff.
    Transient,
    /// Out of memory or store full.
    ResourceExhausted,
    /// Corruption, protocol or state mismatch, failed compression.
    Integrity,
    /// File and path errors, permission problems.
    Io,
    /// Invalid tuning parameter, detected before any engine handle exists.
    Configuration,
}

/// The main error type for lsmdb operations.
#[derive(Debug)]
pub enum Error {
    /// Operation not valid for the current state or arguments
    Usage(String),

    /// Write attempted through a read-only handle
    ReadOnly,

    /// Key was not found
    KeyNotFound(Vec<u8>),

    /// Engine is busy
    Busy(String),

    /// Out of memory or the store is full
    ResourceExhausted(String),

    /// Data corruption or engine state mismatch
    Integrity(String),

    /// I/O error
    Io(std::io::Error),

    /// Invalid configuration value
    Config(String),

    /// A lock was poisoned (internal error)
    LockPoisoned,
}

impl Error {
    /// Shorthand for a usage error.
    pub fn usage(msg: impl Into<String>) -> Self {
        Error::Usage(msg.into())
    }

    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// The failure class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Usage(_) | Error::ReadOnly => ErrorKind::Usage,
            Error::KeyNotFound(_) => ErrorKind::NotFound,
            Error::Busy(_) => ErrorKind::Transient,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::Integrity(_) | Error::LockPoisoned => ErrorKind::Integrity,
            Error::Io(_) => ErrorKind::Io,
            Error::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// True for the "missing key" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Usage(msg) => write!(f, "Usage error: {}", msg),
            Error::ReadOnly => write!(f, "Read only"),
            Error::KeyNotFound(key) => {
                write!(f, "Key {:?} was not found", String::from_utf8_lossy(key))
            }
            Error::Busy(msg) => write!(f, "Engine busy: {}", msg),
            Error::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            Error::Integrity(msg) => write!(f, "Integrity error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::LockPoisoned => write!(f, "Lock poisoned"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        use std::io::ErrorKind as IoKind;

        let EngineError { status, message } = err;
        match status {
            Status::Busy => Error::Busy(message),
            Status::NoMem | Status::Full => Error::ResourceExhausted(message),
            Status::Corrupt | Status::Protocol | Status::Mismatch | Status::Error => {
                Error::Integrity(message)
            }
            Status::Misuse => Error::Usage(message),
            Status::ReadOnly => {
                Error::Io(std::io::Error::new(IoKind::PermissionDenied, message))
            }
            Status::CantOpen | Status::IoErrNoEnt => {
                Error::Io(std::io::Error::new(IoKind::NotFound, message))
            }
            Status::IoErr => Error::Io(std::io::Error::new(IoKind::Other, message)),
        }
    }
}

/// A specialized `Result` type for lsmdb operations.
pub type Result<T> = std::result::Result<T, Error>;
