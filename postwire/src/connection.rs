//! Postgres connection.
use crate::{
    Result,
    common::{debug, warning},
    error::{ClosedReason, ErrorKind},
    postgres::{
        backend::BackendKeyData,
        frontend::Terminate,
    },
    query::{self, Completed},
    row::QueryResult,
    stream::PgStream,
    transport::{PgTransport, PgTransportExt},
    value::Value,
};

mod config;
mod state;
mod startup;

pub use config::{Config, ParseError};
pub use state::{AuthMethod, SessionState, TransactionStatus};

/// A single postgres connection.
///
/// All operations take `&mut self`, at most one query is in flight.
///
/// ```no_run
/// use postwire::{Connection, Value};
///
/// # async fn app() -> postwire::Result<()> {
/// let mut conn = Connection::connect_env().await?;
///
/// let res = conn.execute("SELECT $1::int4 + 1 AS n", &[Value::Int(41)]).await?;
///
/// assert_eq!(res.rows()[0].try_get::<_, i64>("n")?, 42);
///
/// conn.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Connection {
    stream: PgStream,
    state: SessionState,
    key_data: Option<BackendKeyData>,
    tx_status: u8,
    strict_types: bool,
}

impl Connection {
    /// Connect using configuration from environment variable.
    ///
    /// See [`Config::from_env`] for read variables.
    pub async fn connect_env() -> Result<Connection> {
        Self::connect(&Config::from_env()).await
    }

    /// Connect using url.
    pub async fn connect_url(url: &str) -> Result<Connection> {
        Self::connect(&Config::parse(url)?).await
    }

    /// Connect and authenticate.
    pub async fn connect(config: &Config) -> Result<Connection> {
        debug!("connecting to {}:{}", config.get_host(), config.get_port());
        let stream = PgStream::connect(config.get_host(), config.get_port()).await?;
        Self::startup(stream, config).await
    }

    /// Perform startup over already open stream.
    pub async fn startup(mut stream: PgStream, config: &Config) -> Result<Connection> {
        let mut state = SessionState::Disconnected;

        let res = match startup::startup(config, &mut stream, &mut state).await {
            Ok(ok) => ok,
            Err(err) => {
                warning!("startup failed in {state}: {err}");
                startup::transition(&mut state, SessionState::Failed { reason: err.kind().to_string() });
                return Err(err);
            },
        };

        debug!("session state {state} -> {}", SessionState::Ready);

        Ok(Connection {
            stream,
            state: SessionState::Ready,
            key_data: res.backend_key_data,
            tx_status: res.ready.tx_status,
            strict_types: config.strict_types,
        })
    }

    /// Execute a statement with the extended query protocol.
    ///
    /// Parameters are bound in text format, and must match the `$N` placeholders.
    ///
    /// Server error is returned after the connection is ready again,
    /// transport or protocol error leave the connection [`Failed`][SessionState::Failed].
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.check_ready()?;
        query::check_params(sql, params)?;

        self.transition(SessionState::QueryInFlight);

        match query::extended_query(&mut self.stream, sql, params, self.strict_types).await {
            Ok(Completed { result, ready }) => {
                self.tx_status = ready.tx_status;
                self.transition(SessionState::Ready);
                result
            },
            Err(err) => {
                self.transition(SessionState::Failed { reason: err.kind().to_string() });
                Err(err)
            },
        }
    }

    /// Close the connection gracefully.
    ///
    /// Closing already closed or failed connection is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => return Ok(()),
            SessionState::Failed { .. } => {
                self.transition(SessionState::Closed);
                return Ok(());
            },
            _ => { },
        }

        self.stream.send(Terminate);
        let flushed = self.stream.flush().await;
        let shutdown = self.stream.shutdown().await;
        self.transition(SessionState::Closed);

        flushed?;
        shutdown?;
        Ok(())
    }

    /// Current session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Returns `true` if connection can accept a query.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Last reported value of a run-time parameter, e.g. `server_version`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.stream.parameter(name)
    }

    /// Cancellation key of the backend.
    pub fn backend_key_data(&self) -> Option<BackendKeyData> {
        self.key_data
    }

    /// Transaction status from the last `ReadyForQuery`.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_byte(self.tx_status)
    }

    fn check_ready(&self) -> Result<()> {
        match &self.state {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(ClosedReason::Closed.into()),
            SessionState::Failed { reason } => Err(ClosedReason::Failed(reason.clone()).into()),
            SessionState::QueryInFlight
            | SessionState::Disconnected
            | SessionState::StartupSent
            | SessionState::AuthInProgress { .. } => Err(ErrorKind::Busy.into()),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("session state {} -> {next}", self.state);
        self.state = next;
    }
}
