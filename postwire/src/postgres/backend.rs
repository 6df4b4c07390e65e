//! Postgres Backend Messages
use bytes::{Buf, Bytes};

use super::{DatabaseError, Oid, ProtocolError};
use crate::{
    common::ByteStr,
    ext::{BufExt, BytesExt},
};

/// Largest message body accepted from the server.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024 * 1024;

/// Length of a message header, the type byte and the length.
pub const HEADER_LEN: usize = 5;

/// Validate message header, returns message type and body length.
///
/// The length in the header includes itself but not the message type.
pub fn frame_header(header: [u8; HEADER_LEN]) -> Result<(u8, usize), ProtocolError> {
    let msgtype = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len < 4 || len as usize - 4 > MAX_MESSAGE_LEN {
        return Err(ProtocolError::InvalidLength { msgtype, len });
    }
    Ok((msgtype, len as usize - 4))
}

/// A type that can be decoded into postgres backend message
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError>;
}

/// Postgres backend messages
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    ErrorResponse(ErrorResponse),
    EmptyQueryResponse(EmptyQueryResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
    /// Message with unrecognized type, kept so the caller can decide.
    Raw(RawMessage),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                    Self::Raw(raw) => raw.msgtype,
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => Self::Raw(RawMessage { msgtype, payload: body }),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    DataRow,
    ErrorResponse,
    EmptyQueryResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

impl BackendMessage {
    /// Create [`ProtocolError`] for this message arriving in `phase`.
    pub fn unexpected(&self, phase: &'static str) -> ProtocolError {
        ProtocolError::unexpected_phase(self.msgtype(), phase)
    }
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE,$typ))
        }
    };
}

/// Read from body or return truncated error.
macro_rules! read {
    ($body:ident.$get:ident()) => {
        match $body.$get() {
            Some(ok) => ok,
            None => return Err(ProtocolError::truncated(Self::MSGTYPE)),
        }
    };
}

/// Read nul string from body or return malformed error.
macro_rules! read_str {
    ($body:ident) => {
        match $body.get_nul_bytestr() {
            Some(ok) => ok,
            None => return Err(ProtocolError::malformed(Self::MSGTYPE, "invalid nul terminated string")),
        }
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that Kerberos V5 authentication is required.
    KerberosV5,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8;4],
    },
    /// Specifies that GSSAPI authentication is required.
    GSS,
    /// GSSAPI or SSPI authentication data.
    GSSContinue {
        data: Bytes,
    },
    /// Specifies that SSPI authentication is required.
    SSPI,
    /// Specifies that SASL authentication is required.
    SASL {
        /// List of SASL authentication mechanisms, in the server's order of preference.
        mechanisms: Vec<ByteStr>,
    },
    /// Specifies that this message contains a SASL challenge.
    SASLContinue {
        /// SASL data, specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// Specifies that SASL authentication has completed.
    SASLFinal {
        /// SASL outcome "additional data", specific to the SASL mechanism being used.
        data: Bytes,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    /// Name of the method, for error reporting.
    pub fn method_name(&self) -> &'static str {
        match self {
            Authentication::Ok => "Ok",
            Authentication::KerberosV5 => "KerberosV5",
            Authentication::CleartextPassword => "CleartextPassword",
            Authentication::MD5Password { .. } => "MD5Password",
            Authentication::GSS => "GSS",
            Authentication::GSSContinue { .. } => "GSSContinue",
            Authentication::SSPI => "SSPI",
            Authentication::SASL { .. } => "SASL",
            Authentication::SASLContinue { .. } => "SASLContinue",
            Authentication::SASLFinal { .. } => "SASLFinal",
        }
    }
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let auth = match read!(body.checked_u32()) {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => Authentication::MD5Password { salt: read!(body.checked_u32()).to_be_bytes(), },
            7 => Authentication::GSS,
            8 => Authentication::GSSContinue { data: body },
            9 => Authentication::SSPI,
            10 => {
                let mut mechanisms = vec![];
                loop {
                    let name = read_str!(body);
                    if name.is_empty() {
                        break;
                    }
                    mechanisms.push(name);
                }
                Authentication::SASL { mechanisms }
            },
            11 => Authentication::SASLContinue { data: body },
            12 => Authentication::SASLFinal { data: body },
            auth => return Err(ProtocolError::unknown_auth(auth)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            process_id: read!(body.checked_u32()),
            secret_key: read!(body.checked_u32()),
        })
    }
}

/// Identifies the message as a run-time parameter status report
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: ByteStr,
    /// The current value of the parameter
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: read_str!(body),
            value: read_str!(body),
        })
    }
}

/// A warning message. The frontend should display the message.
#[derive(Debug)]
pub struct NoticeResponse {
    pub notice: DatabaseError,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { notice: DatabaseError::parse(msgtype, body)? })
    }
}

/// Identifies the message as an error
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// See [`DatabaseError`] for the recognized fields.
#[derive(Debug)]
pub struct ErrorResponse {
    pub error: DatabaseError,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { error: DatabaseError::parse(msgtype, body)? })
    }
}

/// Description of a single result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero.
    pub table_oid: Oid,
    /// If the field can be identified as a column of a specific table,
    /// the attribute number of the column; otherwise zero.
    pub column_attr: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size (see `pg_type.typlen`).
    ///
    /// Note that negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier (see `pg_attribute.atttypmod`).
    pub type_modifier: i32,
    /// The format code being used for the field.
    pub format: u16,
}

/// Identifies the message as a row description
#[derive(Debug)]
pub struct RowDescription {
    pub columns: Vec<ColumnDescriptor>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let len = read!(body.checked_u16());
        let mut columns = Vec::with_capacity(len as usize);
        for _ in 0..len {
            columns.push(ColumnDescriptor {
                name: read_str!(body),
                table_oid: read!(body.checked_u32()),
                column_attr: read!(body.checked_i16()),
                type_oid: read!(body.checked_u32()),
                type_size: read!(body.checked_i16()),
                type_modifier: read!(body.checked_i32()),
                format: read!(body.checked_u16()),
            });
        }
        Ok(Self { columns })
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// The number of column values that follow (possibly zero).
    pub column_len: u16,
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';

    /// Iterate column values, [`None`] is SQL NULL.
    pub fn values(&self) -> DataRowValues {
        DataRowValues {
            remaining: self.column_len,
            body: self.body.clone(),
        }
    }
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            column_len: read!(body.checked_u16()),
            body,
        })
    }
}

/// Iterator over [`DataRow`] column values.
#[derive(Debug)]
pub struct DataRowValues {
    remaining: u16,
    body: Bytes,
}

impl Iterator for DataRowValues {
    type Item = Result<Option<Bytes>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let Some(len) = self.body.checked_i32() else {
            self.remaining = 0;
            return Some(Err(ProtocolError::truncated(DataRow::MSGTYPE)));
        };

        // As a special case, -1 indicates a NULL column value.
        if len == -1 {
            return Some(Ok(None));
        }

        let Ok(len) = usize::try_from(len) else {
            self.remaining = 0;
            return Some(Err(ProtocolError::malformed(DataRow::MSGTYPE, "negative value length")));
        };

        if self.body.remaining() < len {
            self.remaining = 0;
            return Some(Err(ProtocolError::truncated(DataRow::MSGTYPE)));
        }

        Some(Ok(Some(self.body.split_to(len))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

/// Identifies the message as a command-completed response
///
/// For an INSERT command, the tag is INSERT oid rows, where rows is the number of rows inserted.
/// oid used to be the object ID of the inserted row if rows was 1 and the target table had OIDs,
/// but OIDs system columns are not supported anymore; therefore oid is always 0.
///
/// For a DELETE command, the tag is DELETE rows where rows is the number of rows deleted.
///
/// For an UPDATE command, the tag is UPDATE rows where rows is the number of rows updated.
///
/// For a MERGE command, the tag is MERGE rows where rows is the number of rows inserted, updated, or deleted.
///
/// For a SELECT or CREATE TABLE AS command, the tag is SELECT rows where rows is the number of rows retrieved.
///
/// For a COPY command, the tag is COPY rows where rows is the number of rows copied.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            tag: read_str!(body),
        })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major protocol version requested by the client.
    pub minor: u32,
    /// Protocol options not recognized by the server.
    pub options: Vec<ByteStr>,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let minor = read!(body.checked_u32());
        let len = read!(body.checked_u32());
        let mut options = Vec::with_capacity(len.min(64) as usize);
        for _ in 0..len {
            options.push(read_str!(body));
        }
        Ok(Self { minor, options })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// The object ID of each parameter data type.
    pub oids: Vec<Oid>,
}

impl ParameterDescription  {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let len = read!(body.checked_u16());
        let mut oids = Vec::with_capacity(len as usize);
        for _ in 0..len {
            oids.push(read!(body.checked_u32()));
        }
        Ok(Self { oids })
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator.
    ///
    /// Possible values are `I` if idle (not in a transaction block);
    /// `T` if in a transaction block; or `E` if in a failed transaction block
    /// (queries will be rejected until block is ended).
    pub tx_status: u8,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { tx_status: read!(body.checked_u8()) })
    }
}

/// Message with a type this client does not recognize.
#[derive(Debug)]
pub struct RawMessage {
    pub msgtype: u8,
    pub payload: Bytes,
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self,ProtocolError> {
                    assert_msgtype!(msgtype);
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}
