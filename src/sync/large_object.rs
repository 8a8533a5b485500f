//! Large objects, through the server-side `lo_*` functions.
//!
//! Descriptors returned by [`Connection::lo_open`] are only valid inside the
//! transaction that opened them, as on the server.

use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::escape::{escape_bytea, unescape_bytea};
use crate::protocol::types::Oid;

use super::conn::Connection;

const INT4: Oid = 23;
const INT8: Oid = 20;
const OID: Oid = 26;
const BYTEA: Oid = 17;

/// An open large-object descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoFd(pub i32);

fn parse_scalar<T: FromStr>(bytes: &[u8], what: &str) -> Result<T> {
    simdutf8::basic::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| Error::Protocol(format!("unexpected {} value from server", what)))
}

impl Connection {
    /// Run a single-value `lo_*` call and return its text.
    fn lo_call(&mut self, sql: &str, types: &[Oid], params: &[Option<&str>]) -> Result<Vec<u8>> {
        let result = self
            .query_params(sql, types, params)?
            .ok_or_else(|| Error::Protocol(format!("no result for \"{}\"", sql)))?;
        match result.get_value(0, 0)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(Error::Protocol(format!("NULL result for \"{}\"", sql))),
        }
    }

    fn lo_fd(&self, fd: Option<LoFd>) -> Result<LoFd> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        fd.or(self.last_lo_fd)
            .ok_or_else(|| Error::Misuse("no large object descriptor is open".into()))
    }

    /// Create an empty large object; `None` lets the server pick the OID.
    pub fn lo_create(&mut self, oid: Option<Oid>) -> Result<Oid> {
        let requested = oid.unwrap_or(0).to_string();
        let value = self.lo_call("SELECT lo_create($1)", &[OID], &[Some(requested.as_str())])?;
        parse_scalar(&value, "OID")
    }

    /// Open a large object with `INV_READ` and/or `INV_WRITE`.
    ///
    /// The descriptor becomes the default for the other `lo_*` calls.
    pub fn lo_open(&mut self, oid: Oid, mode: i32) -> Result<LoFd> {
        let oid = oid.to_string();
        let mode = mode.to_string();
        let value = self.lo_call(
            "SELECT lo_open($1, $2)",
            &[OID, INT4],
            &[Some(oid.as_str()), Some(mode.as_str())],
        )?;
        let fd = LoFd(parse_scalar(&value, "descriptor")?);
        self.last_lo_fd = Some(fd);
        Ok(fd)
    }

    pub fn lo_close(&mut self, fd: Option<LoFd>) -> Result<()> {
        let fd = self.lo_fd(fd)?;
        let param = fd.0.to_string();
        self.lo_call("SELECT lo_close($1)", &[INT4], &[Some(param.as_str())])?;
        if self.last_lo_fd == Some(fd) {
            self.last_lo_fd = None;
        }
        Ok(())
    }

    /// Read up to `len` bytes from the current position.
    pub fn lo_read(&mut self, fd: Option<LoFd>, len: usize) -> Result<Vec<u8>> {
        let fd = self.lo_fd(fd)?.0.to_string();
        let len = i32::try_from(len)
            .map_err(|_| Error::Misuse(format!("read length {} is too large", len)))?
            .to_string();
        let value = self.lo_call(
            "SELECT loread($1, $2)",
            &[INT4, INT4],
            &[Some(fd.as_str()), Some(len.as_str())],
        )?;
        unescape_bytea(&value)
    }

    /// Write `data` at the current position; returns the number of bytes written.
    pub fn lo_write(&mut self, fd: Option<LoFd>, data: &[u8]) -> Result<usize> {
        let fd = self.lo_fd(fd)?.0.to_string();
        let data = escape_bytea(data);
        let value = self.lo_call(
            "SELECT lowrite($1, $2)",
            &[INT4, BYTEA],
            &[Some(fd.as_str()), Some(data.as_str())],
        )?;
        parse_scalar(&value, "byte count")
    }

    /// Move the position; `whence` is `SEEK_SET`, `SEEK_CUR` or `SEEK_END`.
    pub fn lo_seek(&mut self, fd: Option<LoFd>, offset: i64, whence: i32) -> Result<i64> {
        let fd = self.lo_fd(fd)?.0.to_string();
        let offset = offset.to_string();
        let whence = whence.to_string();
        let value = self.lo_call(
            "SELECT lo_lseek64($1, $2, $3)",
            &[INT4, INT8, INT4],
            &[Some(fd.as_str()), Some(offset.as_str()), Some(whence.as_str())],
        )?;
        parse_scalar(&value, "offset")
    }

    pub fn lo_tell(&mut self, fd: Option<LoFd>) -> Result<i64> {
        let fd = self.lo_fd(fd)?.0.to_string();
        let value = self.lo_call("SELECT lo_tell64($1)", &[INT4], &[Some(fd.as_str())])?;
        parse_scalar(&value, "offset")
    }

    pub fn lo_truncate(&mut self, fd: Option<LoFd>, len: i64) -> Result<()> {
        let fd = self.lo_fd(fd)?.0.to_string();
        let len = len.to_string();
        self.lo_call(
            "SELECT lo_truncate64($1, $2)",
            &[INT4, INT8],
            &[Some(fd.as_str()), Some(len.as_str())],
        )?;
        Ok(())
    }

    pub fn lo_unlink(&mut self, oid: Oid) -> Result<()> {
        let oid = oid.to_string();
        self.lo_call("SELECT lo_unlink($1)", &[OID], &[Some(oid.as_str())])?;
        Ok(())
    }

    /// Create a large object from a client-side file.
    pub fn lo_import(&mut self, path: impl AsRef<Path>, oid: Option<Oid>) -> Result<Oid> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let contents = std::fs::read(path.as_ref())?;
        let requested = oid.unwrap_or(0).to_string();
        let data = escape_bytea(&contents);
        let value = self.lo_call(
            "SELECT lo_from_bytea($1, $2)",
            &[OID, BYTEA],
            &[Some(requested.as_str()), Some(data.as_str())],
        )?;
        tracing::debug!(
            "imported {} bytes from {}",
            contents.len(),
            path.as_ref().display()
        );
        parse_scalar(&value, "OID")
    }

    /// Write the contents of a large object to a client-side file.
    pub fn lo_export(&mut self, oid: Oid, path: impl AsRef<Path>) -> Result<()> {
        let param = oid.to_string();
        let value = self.lo_call("SELECT lo_get($1)", &[OID], &[Some(param.as_str())])?;
        let contents = unescape_bytea(&value)?;
        std::fs::write(path.as_ref(), &contents)?;
        Ok(())
    }
}
