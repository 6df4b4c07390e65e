//! Protocol error
use std::fmt;

use super::BackendMessage;

/// An error when translating buffer from postgres.
///
/// Protocol error means client and server disagree on the protocol,
/// the connection cannot be used anymore.
pub enum ProtocolError {
    /// Message received is not expected in current phase.
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    /// Server request unknown authentication code.
    UnknownAuth {
        auth: u32,
    },
    /// Server request authentication method that is not supported.
    UnsupportedAuth {
        method: String,
    },
    /// Message body does not match its format.
    Malformed {
        msgtype: u8,
        reason: &'static str,
    },
    /// Message length header is invalid.
    InvalidLength {
        msgtype: u8,
        len: u32,
    },
    /// `DataRow` fields count missmatch with `RowDescription`.
    ColumnCount {
        expect: usize,
        found: usize,
    },
    /// `DataRow` received without prior `RowDescription`.
    MissingDescription,
}

impl std::error::Error for ProtocolError { }

/// Display message type with its name.
struct Tag(u8);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", BackendMessage::message_name(self.0), self.0 as char)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                match expect {
                    Some(m) => write!(f, "expected message `{}` found `{}`", Tag(m), Tag(found))?,
                    None => write!(f, "unexpected message `{}`", Tag(found))?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::UnknownAuth { auth } => {
                write!(f, "unknown authentication request code: {auth}")
            },
            ProtocolError::UnsupportedAuth { ref method } => {
                write!(f, "unsupported authentication method: {method}")
            },
            ProtocolError::Malformed { msgtype, reason } => {
                write!(f, "malformed `{}` message: {reason}", Tag(msgtype))
            },
            ProtocolError::InvalidLength { msgtype, len } => {
                write!(f, "invalid `{}` message length: {len}", Tag(msgtype))
            },
            ProtocolError::ColumnCount { expect, found } => {
                write!(f, "`DataRow` contains {found} fields, but `RowDescription` declares {expect}")
            },
            ProtocolError::MissingDescription => {
                f.write_str("`DataRow` received before `RowDescription`")
            },
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn unsupported_auth(method: impl Into<String>) -> ProtocolError {
        Self::UnsupportedAuth { method: method.into() }
    }

    pub(crate) fn malformed(msgtype: u8, reason: &'static str) -> ProtocolError {
        Self::Malformed { msgtype, reason }
    }

    pub(crate) fn truncated(msgtype: u8) -> ProtocolError {
        Self::Malformed { msgtype, reason: "message body truncated" }
    }
}
