//! Error taxonomy for the memcached client core.
//!
//! Only [`Error::InvalidKey`] and [`Error::Configuration`] ever cross the
//! public command API: every other variant is produced and consumed
//! internally by [`crate::connection`], [`crate::pool`], and [`crate::engine`],
//! which absorb it and return a sentinel (`false`, `None`, or an empty
//! collection) instead.

use std::fmt;
use std::io;

/// Errors produced while talking to a single memcached server, or while
/// validating a command before any network activity happens.
#[derive(Debug)]
pub enum Error {
    /// The key failed local validation (empty, too long, or contains
    /// whitespace/control bytes). Never results in a network round-trip.
    InvalidKey,
    /// A configuration value was invalid at client-construction time.
    Configuration(String),
    /// Connect, read, write, or timeout failure on the socket.
    Transport(io::Error),
    /// The reply was empty, malformed, or desynchronised the stream.
    ProtocolError(String),
    /// The peer sent `ERROR`, `CLIENT_ERROR`, or `SERVER_ERROR`.
    ServerRejected(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key"),
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::ProtocolError(msg) => write!(f, "protocol error: {msg}"),
            Self::ServerRejected(msg) => write!(f, "server rejected command: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Transport(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
