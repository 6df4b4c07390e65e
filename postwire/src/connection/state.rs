use std::fmt;

/// Authentication method negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Cleartext,
    Md5,
    ScramSha256,
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cleartext => "cleartext",
            Self::Md5 => "md5",
            Self::ScramSha256 => "SCRAM-SHA-256",
        }
    }
}

/// Connection session state.
///
/// ```text
/// Disconnected -> StartupSent -> AuthInProgress -> Ready <-> QueryInFlight
///                                                    |
///                                      Failed  <-----+-----> Closed
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    StartupSent,
    AuthInProgress {
        mechanism: AuthMethod,
    },
    Ready,
    QueryInFlight,
    Closed,
    Failed {
        reason: String,
    },
}

impl SessionState {
    /// Returns `true` if connection can accept query.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::StartupSent => f.write_str("StartupSent"),
            Self::AuthInProgress { mechanism } => write!(f, "AuthInProgress({})", mechanism.name()),
            Self::Ready => f.write_str("Ready"),
            Self::QueryInFlight => f.write_str("QueryInFlight"),
            Self::Closed => f.write_str("Closed"),
            Self::Failed { reason } => write!(f, "Failed({reason})"),
        }
    }
}

/// Backend transaction status from `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    Idle,
    /// In a transaction block.
    InTransaction,
    /// In a failed transaction block, queries will be rejected until block is ended.
    Failed,
}

impl TransactionStatus {
    pub(crate) fn from_byte(status: u8) -> Option<Self> {
        match status {
            b'I' => Some(Self::Idle),
            b'T' => Some(Self::InTransaction),
            b'E' => Some(Self::Failed),
            _ => None,
        }
    }
}
