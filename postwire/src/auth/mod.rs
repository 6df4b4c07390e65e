//! Client side authentication.
//!
//! Supported methods are `SCRAM-SHA-256` (without channel binding),
//! md5 and cleartext password.
use crate::postgres::DatabaseError;

pub mod scram;
pub mod md5;

pub use scram::Scram;

/// An error when authenticating to the server.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Server reject the connection with `ErrorResponse`.
    #[error("server rejected connection: {0}")]
    Server(DatabaseError),
    /// SCRAM message from server cannot be parsed.
    #[error("invalid SCRAM message: {0}")]
    InvalidMessage(&'static str),
    /// SCRAM message arrived in wrong order.
    #[error("unexpected SCRAM message order")]
    OutOfOrder,
    /// Server sent mandatory extension this client does not understand.
    #[error("unsupported SCRAM mandatory extension")]
    UnsupportedExtension,
    /// Server nonce does not start with client nonce.
    #[error("server nonce does not extend client nonce")]
    NonceMismatch,
    /// Server signature does not match.
    #[error("server signature verification failed")]
    SignatureMismatch,
    /// Server reported SCRAM error attribute.
    #[error("server reported SCRAM error: {0}")]
    ServerError(String),
}
