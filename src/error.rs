//! Error types for imapstress
//!
//! Mirrors the four error kinds in the design: a malformed server response
//! (`Protocol`), a server reply that contradicts the local mailbox model
//! (`State`), a command that failed when failure wasn't expected
//! (`CommandFailure`), and a condition that forces the connection closed
//! (`Fatal`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("state error: {0}")]
    State(String),

    #[error("command failed: {0}")]
    CommandFailure(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error should terminate the client connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::Io(_) | Self::Tls(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
