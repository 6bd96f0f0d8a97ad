use serde_derive::{Deserialize, Serialize};

/// All errors surfaced by leasekv.
///
/// Protocol-level trouble (stale terms, log conflicts, unreachable peers)
/// never shows up here; the consensus core absorbs it. These variants cover
/// what is left: bad configuration, malformed persisted or wire data, I/O,
/// and internal channel failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Invalid cluster configuration. Fatal at startup.
    Config(String),
    /// Malformed input: a persisted file, a client command, a wire frame.
    Parse(String),
    /// Filesystem failure while persisting or recovering node state.
    Io(String),
    /// An unexpected internal condition, e.g. a closed channel.
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(s) => write!(f, "configuration error: {}", s),
            Error::Parse(s) => write!(f, "parse error: {}", s),
            Error::Io(s) => write!(f, "io error: {}", s),
            Error::Internal(s) => write!(f, "internal error: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<rustyline::error::ReadlineError> for Error {
    fn from(err: rustyline::error::ReadlineError) -> Self {
        Error::Internal(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::Internal(err.to_string())
    }
}
