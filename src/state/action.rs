//! Action types for state machine I/O requests.

use crate::error::ErrorFields;

/// Action requested by a state machine.
///
/// The caller performs the requested I/O and feeds the next message back
/// into the state machine's `step()`.
#[derive(Debug)]
pub enum Action<'a> {
    /// Write the packet to the server and flush, then read the next message.
    WritePacket(&'a [u8]),

    /// Read the next message from the server.
    ReadMessage,

    /// An asynchronous message was received; handle it, then read the next message.
    AsyncMessage(AsyncMessage),

    /// A complete result is available via `take_result()`; more may follow.
    ResultReady,

    /// The server is ready for a new command.
    Finished,
}

/// A LISTEN/NOTIFY notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// PID of the notifying backend process
    pub pid: u32,
    /// Channel name
    pub channel: String,
    /// Notification payload
    pub payload: String,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time during query execution.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification(Notification),

    /// Non-fatal notice/warning from server.
    Notice(ErrorFields),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}

impl AsyncMessage {
    /// Decode one of the message types for which `RawMessage::is_async` holds.
    pub fn parse(msg: &crate::protocol::RawMessage<'_>) -> crate::error::Result<Self> {
        use crate::protocol::backend::{
            NoticeResponse, NotificationResponse, ParameterStatus, msg_type,
        };

        match msg.type_byte {
            msg_type::NOTICE_RESPONSE => {
                Ok(AsyncMessage::Notice(NoticeResponse::parse(msg.payload)?.0))
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(msg.payload)?;
                Ok(AsyncMessage::ParameterChanged {
                    name: param.name.to_string(),
                    value: param.value.to_string(),
                })
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let n = NotificationResponse::parse(msg.payload)?;
                Ok(AsyncMessage::Notification(Notification {
                    pid: n.pid,
                    channel: n.channel.to_string(),
                    payload: n.payload.to_string(),
                }))
            }
            other => Err(crate::error::Error::Protocol(format!(
                "Unknown async message type: '{}'",
                other as char
            ))),
        }
    }
}
