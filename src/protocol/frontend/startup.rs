//! Startup, cancellation and termination messages.

use crate::protocol::codec::MessageBuilder;

/// Protocol version 3.0 (0x00030000)
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// SSL request code
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Cancel request code
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Write an SSLRequest message.
///
/// Server responds with single byte: 'S' (accepted) or 'N' (rejected).
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::untyped(buf);
    msg.write_i32(SSL_REQUEST_CODE);
    msg.finish();
}

/// Write a StartupMessage from (name, value) pairs.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::untyped(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish();
}

/// Write a CancelRequest message.
///
/// Sent on a fresh socket; the server closes it without replying.
pub fn write_cancel_request(buf: &mut Vec<u8>, pid: u32, secret_key: u32) {
    let mut msg = MessageBuilder::untyped(buf);
    msg.write_i32(CANCEL_REQUEST_CODE);
    msg.write_u32(pid);
    msg.write_u32(secret_key);
    msg.finish();
}

/// Write a Terminate message.
pub fn write_terminate(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::TERMINATE).finish();
}
