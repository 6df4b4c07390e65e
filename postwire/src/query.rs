//! Extended query protocol.
//!
//! A query is sent as a single pipeline, flushed once:
//!
//! ```text
//! Parse -> Bind -> Describe(portal) -> Execute -> Sync
//! ```
//!
//! then the responses are read until `ReadyForQuery`. An `ErrorResponse` in the middle
//! does not stop reading, the server skips remaining messages until `Sync`, so the rest
//! is drained before the error is returned, leaving the connection ready for next query.
use std::sync::Arc;

use crate::{
    Error, Result,
    common::{debug, verbose},
    postgres::{
        BackendMessage, DatabaseError, PgFormat, ProtocolError,
        backend::{MAX_MESSAGE_LEN, ReadyForQuery},
        frontend::{self, Bind, Describe, Execute, Parse},
    },
    row::{ColumnDescriptor, CommandTag, QueryResult, Row},
    sql,
    transport::{PgTransport, PgTransportExt},
    value::Value,
};

/// Maximum number of parameters in a `Bind` message.
const MAX_PARAMS: usize = u16::MAX as usize;

/// An error from a query.
///
/// Query error does not break the connection.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Server rejected the query.
    #[error(transparent)]
    Server(DatabaseError),
    /// Number of parameters does not match the placeholders in the statement.
    #[error("statement expects {expect} parameters, but {found} given")]
    ParamCount {
        expect: usize,
        found: usize,
    },
    /// Too many parameters for a single statement.
    #[error("statement can only have 65535 parameters, but {0} given")]
    TooManyParams(usize),
    /// Statement and parameters exceed the maximum message size.
    #[error("query of {size} bytes exceeds the maximum message size")]
    TooLarge {
        size: usize,
    },
}

impl QueryError {
    /// SQLSTATE code if this error reported by the server.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server(db) => Some(db.code()),
            _ => None,
        }
    }
}

/// Client side check before anything is sent.
pub(crate) fn check_params(sql: &str, params: &[Value]) -> Result<(), QueryError> {
    if params.len() > MAX_PARAMS {
        return Err(QueryError::TooManyParams(params.len()));
    }
    let expect = sql::param_count(sql);
    if expect != params.len() {
        return Err(QueryError::ParamCount { expect, found: params.len() });
    }
    check_size(message_size(sql, params))
}

/// Bytes of the statement and its length prefixed parameters.
fn message_size(sql: &str, params: &[Value]) -> usize {
    params
        .iter()
        .fold(sql.len(), |acc, param| acc.saturating_add(4 + param.text_len()))
}

fn check_size(size: usize) -> Result<(), QueryError> {
    match size > MAX_MESSAGE_LEN {
        true => Err(QueryError::TooLarge { size }),
        false => Ok(()),
    }
}

/// The outcome of [`extended_query`] when the connection is still usable.
pub(crate) struct Completed {
    pub result: Result<QueryResult>,
    pub ready: ReadyForQuery,
}

/// Run statement with the extended query protocol.
///
/// Returned [`Err`] means the connection is broken, while error in [`Completed::result`]
/// is already drained up to `ReadyForQuery`.
pub(crate) async fn extended_query<IO: PgTransport>(
    mut io: IO,
    sql: &str,
    params: &[Value],
    strict: bool,
) -> Result<Completed> {
    let params = params.iter().map(Value::encode).collect::<Vec<_>>();

    io.send(Parse {
        prepare_name: "",
        sql,
        oids_len: 0,
        oids: [],
    });
    io.send(Bind {
        portal_name: "",
        stmt_name: "",
        param_format: PgFormat::Text,
        params: params.iter().cloned(),
        result_format: PgFormat::Text,
    });
    io.send(Describe { kind: b'P', name: "" });
    io.send(Execute { portal_name: "", max_row: 0 });
    io.send(frontend::Sync);
    io.flush().await?;

    let mut columns: Option<Arc<[ColumnDescriptor]>> = None;
    let mut rows = vec![];
    let mut command_tag = None;
    let mut failed: Option<Error> = None;

    loop {
        let message = match io.recv::<BackendMessage>().await {
            Ok(ok) => ok,
            Err(err) if !err.is_fatal() => {
                verbose!("draining after error: {err}");
                failed.get_or_insert(err);
                continue;
            },
            Err(err) => return Err(err),
        };

        match message {
            BackendMessage::ParseComplete(_)
            | BackendMessage::BindComplete(_)
            | BackendMessage::ParameterDescription(_)
            | BackendMessage::PortalSuspended(_) => { },
            BackendMessage::NoData(_) => columns = None,
            BackendMessage::RowDescription(desc) => columns = Some(desc.columns.into()),
            BackendMessage::DataRow(data) => {
                let Some(columns) = &columns else {
                    return Err(ProtocolError::MissingDescription.into());
                };
                if failed.is_some() {
                    continue;
                }
                match Row::from_data_row(columns, data, strict) {
                    Ok(row) => rows.push(row),
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => failed = Some(err),
                }
            },
            BackendMessage::CommandComplete(cmd) => command_tag = Some(CommandTag::new(cmd.tag)),
            BackendMessage::EmptyQueryResponse(_) => command_tag = None,
            BackendMessage::ReadyForQuery(ready) => {
                let result = match failed {
                    Some(err) => Err(err),
                    None => Ok(QueryResult {
                        columns: columns.unwrap_or_else(|| Arc::from([])),
                        rows,
                        command_tag,
                    }),
                };
                return Ok(Completed { result, ready });
            },
            BackendMessage::Raw(raw) => {
                debug!("ignoring unsupported message {:?} in extended query", raw.msgtype as char);
            },
            other => return Err(other.unexpected("extended query").into()),
        }
    }
}
