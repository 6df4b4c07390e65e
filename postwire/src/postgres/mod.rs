//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        u32        ┃ [u8] ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first message sent by the client (the startup message)
//! has no initial message-type byte.
//!
//! Everything in this module is pure, no io is performed here.
//!
//! <https://www.postgresql.org/docs/current/protocol-overview.html>

pub mod pg_type;
mod pg_format;
mod db_error;

pub mod frontend;
pub mod backend;

mod error;

pub use pg_type::{Oid, type_name};
pub use pg_format::PgFormat;
pub use db_error::DatabaseError;

pub use frontend::FrontendProtocol;
pub use backend::{BackendMessage, BackendProtocol, ColumnDescriptor};
pub use error::ProtocolError;
