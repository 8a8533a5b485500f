//! PostgreSQL frontend (client → server) messages.

pub mod auth;
pub mod query;
pub mod startup;

pub use auth::{write_password, write_sasl_initial_response, write_sasl_response};
pub use query::{
    write_bind, write_copy_fail, write_describe_portal, write_execute, write_parse, write_query,
    write_sync,
};
pub use startup::{write_cancel_request, write_ssl_request, write_startup, write_terminate};

/// Frontend message type bytes.
pub mod msg_type {
    /// Password/SASL response (all auth response types use 'p')
    pub const PASSWORD: u8 = b'p';
    /// Query (simple query protocol)
    pub const QUERY: u8 = b'Q';
    /// Parse (extended query protocol)
    pub const PARSE: u8 = b'P';
    /// Bind (extended query protocol)
    pub const BIND: u8 = b'B';
    /// Execute (extended query protocol)
    pub const EXECUTE: u8 = b'E';
    /// Describe (extended query protocol)
    pub const DESCRIBE: u8 = b'D';
    /// Sync (extended query protocol)
    pub const SYNC: u8 = b'S';
    /// CopyFail
    pub const COPY_FAIL: u8 = b'f';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}
