//! Startup-phase and asynchronous backend messages.

use zerocopy::byteorder::big_endian::U32 as U32BE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i32, read_u32};
use crate::protocol::types::TransactionStatus;

/// Authentication method constants.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication request from the server.
#[derive(Debug)]
pub enum AuthenticationMessage<'a> {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Sasl { mechanisms: Vec<&'a str> },
    SaslContinue { data: &'a [u8] },
    SaslFinal { data: &'a [u8] },
    /// Kerberos, GSS, SSPI or anything newer
    Unsupported(i32),
}

impl<'a> AuthenticationMessage<'a> {
    /// Parse an Authentication message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (auth_type, rest) = read_i32(payload)?;

        Ok(match auth_type {
            auth_type::OK => AuthenticationMessage::Ok,
            auth_type::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
            auth_type::MD5_PASSWORD => {
                let (salt, _) = read_bytes(rest, 4)?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(salt);
                AuthenticationMessage::Md5Password { salt: buf }
            }
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                while data.first().is_some_and(|&b| b != 0) {
                    let (mechanism, remaining) = read_cstr(data)?;
                    mechanisms.push(mechanism);
                    data = remaining;
                }
                AuthenticationMessage::Sasl { mechanisms }
            }
            auth_type::SASL_CONTINUE => AuthenticationMessage::SaslContinue { data: rest },
            auth_type::SASL_FINAL => AuthenticationMessage::SaslFinal { data: rest },
            auth_type::KERBEROS_V5 | auth_type::GSS | auth_type::SSPI => {
                AuthenticationMessage::Unsupported(auth_type)
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Unknown authentication type: {}",
                    other
                )));
            }
        })
    }
}

/// BackendKeyData message - process ID and secret key for cancellation.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    pid: U32BE,
    secret_key: U32BE,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_bytes(payload)?)
    }

    /// Backend process ID.
    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    /// Secret key for CancelRequest.
    pub fn secret(&self) -> u32 {
        self.secret_key.get()
    }
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery message - the server is idle and waiting for the next command.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ReadyForQuery {
    status: u8,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_bytes(payload)?)
    }

    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_byte(self.status)
    }
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone)]
pub struct NotificationResponse<'a> {
    /// PID of the notifying backend
    pub pid: u32,
    pub channel: &'a str,
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload_str, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel,
            payload: payload_str,
        })
    }
}
