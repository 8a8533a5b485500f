//! PostgreSQL wire protocol.
//!
//! - `backend`: Server → Client messages (parsing)
//! - `frontend`: Client → Server messages (encoding)
//! - `codec`: Low-level encoding/decoding primitives
//! - `types`: Common protocol types (FormatCode, Oid, TransactionStatus)

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use backend::RawMessage;
pub use types::{ConnStatus, FormatCode, Oid, TransactionStatus};
