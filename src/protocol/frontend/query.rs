//! Query messages: simple query, extended query, and the COPY refusal.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

/// Write a Query message.
///
/// The query string may contain multiple SQL statements separated by semicolons.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}

/// Write a Parse message.
///
/// - `name`: Statement name (empty string for unnamed statement)
/// - `query`: SQL with $1, $2, ... placeholders
/// - `param_oids`: Parameter type OIDs (0 = let server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish();
}

/// Write a Bind message with text-format parameters and text-format results.
///
/// `None` parameters are sent as SQL NULL.
pub fn write_bind(buf: &mut Vec<u8>, portal: &str, statement: &str, params: &[Option<&str>]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    // One format code applies to every parameter
    msg.write_i16(1);
    msg.write_i16(FormatCode::Text as i16);

    msg.write_i16(params.len() as i16);
    for param in params {
        match param {
            Some(value) => {
                msg.write_i32(value.len() as i32);
                msg.write_bytes(value.as_bytes());
            }
            None => msg.write_i32(-1),
        }
    }

    msg.write_i16(1);
    msg.write_i16(FormatCode::Text as i16);
    msg.finish();
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'P');
    msg.write_cstr(name);
    msg.finish();
}

/// Write an Execute message; `max_rows == 0` fetches everything.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_u32(max_rows);
    msg.finish();
}

/// Write a Sync message.
///
/// Ends an extended query sequence; the server answers with ReadyForQuery.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}

/// Write a CopyFail message, aborting a COPY FROM STDIN.
pub fn write_copy_fail(buf: &mut Vec<u8>, reason: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_FAIL);
    msg.write_cstr(reason);
    msg.finish();
}
