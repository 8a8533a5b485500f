//! Quoting helpers for building statements by hand.
//!
//! Output assumes `standard_conforming_strings = on`, the server default.

use crate::error::{Error, Result};

fn reject_nul(s: &str) -> Result<()> {
    match memchr::memchr(0, s.as_bytes()) {
        Some(pos) => Err(Error::Misuse(format!(
            "string contains a NUL byte at offset {}",
            pos
        ))),
        None => Ok(()),
    }
}

/// Quote `s` as a string literal, including the surrounding quotes.
///
/// Backslashes switch the literal to the `E'...'` form so it reads the same
/// whatever `standard_conforming_strings` is set to.
pub fn escape_literal(s: &str) -> Result<String> {
    reject_nul(s)?;
    let has_backslash = memchr::memchr(b'\\', s.as_bytes()).is_some();
    let mut out = String::with_capacity(s.len() + 4);
    if has_backslash {
        out.push_str(" E");
    }
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    Ok(out)
}

/// Quote `s` as an identifier, including the surrounding double quotes.
pub fn escape_identifier(s: &str) -> Result<String> {
    reject_nul(s)?;
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    Ok(out)
}

/// Encode binary data in the `bytea` hex input format (`\x0a1b...`).
pub fn escape_bytea(data: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(2 + data.len() * 2);
    out.push_str("\\x");
    for &b in data {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode a `bytea` text value in either the hex or the legacy escape format.
pub fn unescape_bytea(text: &[u8]) -> Result<Vec<u8>> {
    if let Some(hex) = text.strip_prefix(b"\\x") {
        let digits: Vec<u8> = hex
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        if digits.len() % 2 != 0 {
            return Err(Error::Misuse("odd number of hex digits in bytea".into()));
        }
        return digits
            .chunks_exact(2)
            .map(|pair| match (hex_digit(pair[0]), hex_digit(pair[1])) {
                (Some(hi), Some(lo)) => Ok(hi << 4 | lo),
                _ => Err(Error::Misuse("invalid hex digit in bytea".into())),
            })
            .collect();
    }

    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i] != b'\\' {
            out.push(text[i]);
            i += 1;
            continue;
        }
        match text.get(i + 1..i + 4) {
            Some([a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7']) => {
                out.push((a - b'0') << 6 | (b - b'0') << 3 | (c - b'0'));
                i += 4;
            }
            _ if text.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            _ => {
                return Err(Error::Misuse(format!(
                    "invalid escape sequence in bytea at offset {}",
                    i
                )));
            }
        }
    }
    Ok(out)
}
