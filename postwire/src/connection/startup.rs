//! Startup and authentication flow.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use super::{AuthMethod, Config, SessionState};
use crate::{
    Error, Result,
    auth::{AuthError, Scram, md5::md5_password},
    common::debug,
    error::ErrorKind,
    postgres::{
        BackendMessage, ProtocolError,
        backend::{Authentication, BackendKeyData, ReadyForQuery},
        frontend::{PasswordMessage, SaslInitialResponse, SaslResponse, Startup},
    },
    query::QueryError,
    transport::{PgTransport, PgTransportExt},
};

/// Run-time parameters sent in the startup message.
const STARTUP_PARAMS: &[(&str, &str)] = &[("client_encoding", "UTF8")];

/// Startup phase successful response.
pub(crate) struct StartupResponse {
    pub backend_key_data: Option<BackendKeyData>,
    pub ready: ReadyForQuery,
}

/// Perform startup, authentication, and wait for backend to be ready.
pub(crate) async fn startup<IO: PgTransport>(
    config: &Config,
    mut io: IO,
    state: &mut SessionState,
) -> Result<StartupResponse> {
    io.send_startup(Startup {
        user: config.get_user(),
        database: Some(config.get_database()),
        params: STARTUP_PARAMS,
    });
    io.flush().await?;
    transition(state, SessionState::StartupSent);

    // For all authentication methods except GSSAPI, SSPI and SASL, there is at most one request and one response.
    loop {
        let auth = match recv(&mut io).await? {
            BackendMessage::Authentication(auth) => auth,
            BackendMessage::NegotiateProtocolVersion(v) => {
                debug!("server supports protocol 3.{}, unrecognized options: {:?}", v.minor, v.options);
                continue;
            },
            other => return Err(other.unexpected("authentication").into()),
        };

        match auth {
            Authentication::Ok => break,
            Authentication::CleartextPassword => {
                transition(state, SessionState::AuthInProgress { mechanism: AuthMethod::Cleartext });
                io.send(PasswordMessage { password: &config.password });
                io.flush().await?;
            },
            Authentication::MD5Password { salt } => {
                transition(state, SessionState::AuthInProgress { mechanism: AuthMethod::Md5 });
                let password = md5_password(&config.user, &config.password, salt);
                io.send(PasswordMessage { password: &password });
                io.flush().await?;
            },
            Authentication::SASL { mechanisms } => {
                if !mechanisms.iter().any(|e|e == Scram::MECHANISM) {
                    let offered = mechanisms.iter().map(|e|e.as_str()).collect::<Vec<_>>().join(", ");
                    return Err(ProtocolError::unsupported_auth(format!("SASL [{offered}]")).into());
                }
                transition(state, SessionState::AuthInProgress { mechanism: AuthMethod::ScramSha256 });
                sasl(config, &mut io).await?;
            },
            Authentication::SASLContinue { .. } | Authentication::SASLFinal { .. } => {
                return Err(ProtocolError::unexpected_phase(Authentication::MSGTYPE, "authentication").into());
            },
            other => return Err(ProtocolError::unsupported_auth(other.method_name()).into()),
        }
    }

    debug!("authenticated as {:?}", config.get_user());

    // In this phase a backend process is being started, and the frontend is just an interested bystander.
    let mut backend_key_data = None;

    loop {
        match recv(&mut io).await? {
            BackendMessage::ReadyForQuery(ready) => {
                return Ok(StartupResponse { backend_key_data, ready })
            },
            BackendMessage::BackendKeyData(key_data) => backend_key_data = Some(key_data),
            BackendMessage::NegotiateProtocolVersion(v) => {
                debug!("server supports protocol 3.{}, unrecognized options: {:?}", v.minor, v.options);
            },
            other => return Err(other.unexpected("startup").into()),
        }
    }
}

/// `SCRAM-SHA-256` exchange, completed when the server signature is verified.
///
/// The [`Scram`] state lives only for the duration of this call.
async fn sasl<IO: PgTransport>(config: &Config, io: &mut IO) -> Result<()> {
    let mut scram = Scram::new(&config.user, &config.password);

    io.send(SaslInitialResponse {
        mechanism: Scram::MECHANISM,
        data: &scram.client_first(),
    });
    io.flush().await?;

    let server_first = match recv(io).await? {
        BackendMessage::Authentication(Authentication::SASLContinue { data }) => data,
        other => return Err(other.unexpected("SASL exchange").into()),
    };

    let client_final = scram.server_first(&server_first)?;
    io.send(SaslResponse { data: &client_final });
    io.flush().await?;

    let server_final = match recv(io).await? {
        BackendMessage::Authentication(Authentication::SASLFinal { data }) => data,
        other => return Err(other.unexpected("SASL exchange").into()),
    };

    scram.server_final(&server_final)?;

    Ok(())
}

/// `ErrorResponse` during startup is an authentication error.
///
/// Messages with unrecognized type are skipped.
async fn recv<IO: PgTransport>(io: &mut IO) -> Result<BackendMessage> {
    loop {
        let message = io.recv::<BackendMessage>().await.map_err(|err: Error| -> Error { match err.into_kind() {
            ErrorKind::Query(QueryError::Server(db)) => AuthError::Server(db).into(),
            kind => kind.into(),
        }})?;
        match message {
            BackendMessage::Raw(raw) => {
                debug!("ignoring unsupported message {:?} in startup", raw.msgtype as char);
            },
            message => return Ok(message),
        }
    }
}

pub(super) fn transition(state: &mut SessionState, next: SessionState) {
    debug!("session state {state} -> {next}");
    *state = next;
}
