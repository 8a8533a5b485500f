//! Wire encoding and decoding primitives.
//!
//! All integers on the PostgreSQL wire are big-endian.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I16, I32, U32};

use crate::error::{Error, Result};

/// Split `len` bytes off the front of `data`.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len).ok_or_else(|| {
        Error::Protocol(format!(
            "read_bytes: buffer too short: {} < {}",
            data.len(),
            len
        ))
    })
}

/// Read a single byte.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&byte, rest)) => Ok((byte, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

/// Read a big-endian i16.
#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (head, rest) = read_bytes(data, 2)?;
    Ok((I16::ref_from_bytes(head)?.get(), rest))
}

/// Read a big-endian i32.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (head, rest) = read_bytes(data, 4)?;
    Ok((I32::ref_from_bytes(head)?.get(), rest))
}

/// Read a big-endian u32.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (head, rest) = read_bytes(data, 4)?;
    Ok((U32::ref_from_bytes(head)?.get(), rest))
}

/// Read a null-terminated string, returning the bytes without the terminator.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read a null-terminated UTF-8 string.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Builds one frontend message, back-filling the length field on `finish`.
///
/// Layout: optional type byte, then a 4-byte length that counts itself and
/// the payload but not the type byte.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start a regular message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::untyped(buf)
    }

    /// Start a message without a type byte (startup, SSL and cancel requests).
    pub fn untyped(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0; 4]);
        Self { buf, start }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}
