//! `postwire` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    auth::AuthError,
    connection::ParseError,
    postgres::{DatabaseError, ProtocolError},
    query::QueryError,
    value::TypeDecodeError,
};

/// A specialized [`Result`] type for `postwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `postwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Add context message to the error.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns `true` if the connection cannot be used after this error.
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Returns the SQLSTATE code if this error is reported by the server.
    pub fn code(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Query(QueryError::Server(db)) => Some(db.code()),
            ErrorKind::Authentication(AuthError::Server(db)) => Some(db.code()),
            _ => None,
        }
    }
}

/// All possible error kind from `postwire` library.
pub enum ErrorKind {
    /// Socket failure.
    Transport(io::Error),
    /// Peer closed the connection, or the connection is no longer usable.
    ConnectionClosed(ClosedReason),
    /// Client and server disagree on the protocol.
    Protocol(ProtocolError),
    /// Authentication failed.
    Authentication(AuthError),
    /// Query rejected by the server or by client side check.
    Query(QueryError),
    /// Value cannot be decoded.
    Decode(TypeDecodeError),
    /// Invalid configuration.
    Config(ParseError),
    /// Another query is still in flight.
    Busy,
}

impl ErrorKind {
    /// Returns `true` if the connection cannot be used after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(_) | Self::ConnectionClosed(_) | Self::Protocol(_) | Self::Authentication(_) => true,
            Self::Query(_) | Self::Decode(_) | Self::Config(_) | Self::Busy => false,
        }
    }
}

/// The reason connection is closed.
#[derive(Debug, thiserror::Error)]
pub enum ClosedReason {
    /// Peer closed the socket.
    #[error("connection closed by server")]
    Eof,
    /// Connection closed by [`close`][crate::Connection::close].
    #[error("connection is closed")]
    Closed,
    /// Connection previously failed.
    #[error("connection failed previously: {0}")]
    Failed(String),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<io::Error>e => ErrorKind::Transport(e));
from!(<ClosedReason>e => ErrorKind::ConnectionClosed(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<AuthError>e => ErrorKind::Authentication(e));
from!(<QueryError>e => ErrorKind::Query(e));
from!(<DatabaseError>e => ErrorKind::Query(QueryError::Server(e)));
from!(<TypeDecodeError>e => ErrorKind::Decode(e));
from!(<ParseError>e => ErrorKind::Config(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => fmt::Display::fmt(e, f),
            Self::ConnectionClosed(e) => fmt::Display::fmt(e, f),
            Self::Protocol(e) => fmt::Display::fmt(e, f),
            Self::Authentication(e) => fmt::Display::fmt(e, f),
            Self::Query(e) => fmt::Display::fmt(e, f),
            Self::Decode(e) => fmt::Display::fmt(e, f),
            Self::Config(e) => fmt::Display::fmt(e, f),
            Self::Busy => f.write_str("another query is still in flight"),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
