//! A blocking PostgreSQL session core with libpq-style results.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: Protocol logic is separated from I/O
//! - **Materialized results**: Rows are kept with a cursor for streaming reads
//! - **Asynchronous dispatch**: `send_*` returns immediately, results are pulled later
//! - **Type/OID resolution**: Type and table names are cached per connection
//!
//! # Example
//!
//! ```no_run
//! use pgsession::{Connection, FetchMode};
//!
//! fn main() -> pgsession::Result<()> {
//!     let mut conn = Connection::connect("host=localhost user=postgres dbname=mydb")?;
//!
//!     if let Some(result) = conn.query("SELECT 1 AS num, 'one' AS name")? {
//!         while let Some(record) = result.fetch_array(FetchMode::Assoc) {
//!             println!("{:?}", record.get_by_name("name")?);
//!         }
//!     }
//!
//!     conn.close();
//!     Ok(())
//! }
//! ```

pub mod constants;
pub mod error;
pub mod escape;
pub mod oid_cache;
pub mod opts;
pub mod protocol;
pub mod result;
pub mod state;
pub mod sync;

pub use error::{Error, ErrorFields, QueryError, Result, Verbosity};
pub use opts::{Opts, SslMode};
pub use protocol::types::{ConnStatus, FormatCode, Oid, TransactionStatus};
pub use result::{Column, ExecStatus, FetchMode, QueryResult, Record, Value};
pub use state::action::Notification;
pub use sync::{Connection, LoFd};

/// Connect using a conninfo string or `postgres://` URL.
pub fn connect(conninfo: &str) -> Result<Connection> {
    Connection::connect(conninfo)
}

/// Connect with the default conninfo and `PG*` environment variables.
pub fn connect_default() -> Result<Connection> {
    Connection::connect_default()
}

/// Library name and version.
pub fn version() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
