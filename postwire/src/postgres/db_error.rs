//! `ErrorResponse` and `NoticeResponse` fields.
use bytes::{Buf, Bytes};
use std::fmt;

use super::ProtocolError;
use crate::{common::ByteStr, ext::BytesExt};

/// Error or notice reported by the server.
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order. Since more field types might be added in future,
/// unrecognized field are silently ignored.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseError {
    severity: ByteStr,
    code: ByteStr,
    message: ByteStr,
    detail: Option<ByteStr>,
    hint: Option<ByteStr>,
    position: Option<u32>,
    where_: Option<ByteStr>,
    schema: Option<ByteStr>,
    table: Option<ByteStr>,
    column: Option<ByteStr>,
    constraint: Option<ByteStr>,
}

impl DatabaseError {
    /// Parse fields from `ErrorResponse` or `NoticeResponse` body.
    pub(crate) fn parse(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut localized_severity = None;
        let mut severity = None;
        let mut code = None;
        let mut message = None;
        let mut me = DatabaseError {
            severity: ByteStr::default(),
            code: ByteStr::default(),
            message: ByteStr::default(),
            detail: None,
            hint: None,
            position: None,
            where_: None,
            schema: None,
            table: None,
            column: None,
            constraint: None,
        };

        loop {
            if !body.has_remaining() {
                return Err(ProtocolError::truncated(msgtype));
            }
            let field = body.get_u8();
            if field == b'\0' {
                break;
            }
            let Some(value) = body.get_nul_bytestr() else {
                return Err(ProtocolError::malformed(msgtype, "invalid field string"));
            };
            match field {
                b'S' => localized_severity = Some(value),
                b'V' => severity = Some(value),
                b'C' => code = Some(value),
                b'M' => message = Some(value),
                b'D' => me.detail = Some(value),
                b'H' => me.hint = Some(value),
                b'P' => me.position = value.parse().ok(),
                b'W' => me.where_ = Some(value),
                b's' => me.schema = Some(value),
                b't' => me.table = Some(value),
                b'c' => me.column = Some(value),
                b'n' => me.constraint = Some(value),
                _ => { },
            }
        }

        // `V` is not localized and always present since 9.6
        me.severity = severity
            .or(localized_severity)
            .ok_or(ProtocolError::malformed(msgtype, "missing severity field"))?;
        me.code = code.ok_or(ProtocolError::malformed(msgtype, "missing code field"))?;
        me.message = message.ok_or(ProtocolError::malformed(msgtype, "missing message field"))?;

        Ok(me)
    }

    /// The severity: `ERROR`, `FATAL`, or `PANIC` (in an error message),
    /// or `WARNING`, `NOTICE`, `DEBUG`, `INFO`, or `LOG` (in a notice message).
    pub fn severity(&self) -> &str {
        &self.severity
    }

    /// The SQLSTATE code for the error.
    ///
    /// <https://www.postgresql.org/docs/current/errcodes-appendix.html>
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// An optional secondary error message carrying more detail about the problem.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// An optional suggestion what to do about the problem.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Error cursor position as an index into the original query string, counted in characters from 1.
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    /// Context in which the error occurred.
    pub fn where_(&self) -> Option<&str> {
        self.where_.as_deref()
    }

    /// Name of the schema associated with the error.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Name of the table associated with the error.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Name of the column associated with the error.
    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    /// Name of the constraint associated with the error.
    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }
}

impl std::error::Error for DatabaseError { }

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, ", detail: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, ", hint: {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
