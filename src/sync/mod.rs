//! Synchronous PostgreSQL client.

mod conn;
mod large_object;
mod session;
mod stream;

pub use conn::Connection;
pub use large_object::LoFd;
