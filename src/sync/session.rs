//! One authenticated server session.
//!
//! `Session` owns the socket and drives the protocol state machines. It knows
//! nothing about result objects, caches or retries; those live in
//! [`Connection`](super::Connection).

use std::collections::VecDeque;
use std::io::ErrorKind;

use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::{BackendKeyData, RawMessage};
use crate::protocol::frontend::{write_cancel_request, write_terminate};
use crate::protocol::types::{ConnStatus, Oid, TransactionStatus};
use crate::result::ResultData;
use crate::state::action::{Action, AsyncMessage, Notification};
use crate::state::connection::{ConnectionState, ConnectionStateMachine, SslAction};
use crate::state::result::ResultStateMachine;

use super::stream::Stream;

/// Read one message from the stream; returns its type byte, payload in `read_buffer`.
fn read_message_into(stream: &mut Stream, read_buffer: &mut Vec<u8>) -> Result<u8> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header)?;
    let type_byte = header[0];
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

    if length < 4 {
        return Err(Error::Protocol(format!(
            "Invalid message length: {}",
            length
        )));
    }

    let payload_len = (length - 4) as usize;
    read_buffer.clear();
    read_buffer.resize(payload_len, 0);
    stream.read_exact(read_buffer)?;

    Ok(type_byte)
}

fn write_packet(stream: &mut Stream, data: &[u8]) -> Result<()> {
    stream.write_all(data)?;
    stream.flush()?;
    Ok(())
}

/// A live session with the server.
pub struct Session {
    stream: Stream,
    opts: Opts,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    status: ConnStatus,
    pending: Option<ResultStateMachine>,
    notifications: VecDeque<Notification>,
}

impl Session {
    /// Open the transport and run startup and authentication.
    pub fn connect(opts: Opts) -> Result<Self> {
        let stream = Stream::connect(&opts)?;
        Self::connect_with_stream(stream, opts)
    }

    /// Run startup over an already-open stream.
    pub fn connect_with_stream(mut stream: Stream, opts: Opts) -> Result<Self> {
        let mut read_buffer = Vec::with_capacity(8192);
        let mut state_machine = ConnectionStateMachine::new(opts.clone());

        match state_machine.start()? {
            Action::WritePacket(data) => write_packet(&mut stream, data)?,
            _ => return Err(Error::Protocol("Unexpected initial action".into())),
        }

        if state_machine.state() == ConnectionState::WaitingSslResponse {
            let mut ssl_response = [0u8; 1];
            stream.read_exact(&mut ssl_response)?;

            match state_machine.process_ssl_response(ssl_response[0])? {
                SslAction::StartHandshake => {
                    #[cfg(feature = "tls")]
                    {
                        stream = stream.upgrade_to_tls(&opts.host, opts.ssl_mode)?;
                        match state_machine.ssl_handshake_complete() {
                            Action::WritePacket(data) => write_packet(&mut stream, data)?,
                            _ => return Err(Error::Protocol("Unexpected action after TLS".into())),
                        }
                    }
                    #[cfg(not(feature = "tls"))]
                    {
                        return Err(Error::Unsupported(
                            "server accepted SSL but the \"tls\" feature is not enabled".into(),
                        ));
                    }
                }
                SslAction::SendStartup(data) => write_packet(&mut stream, data)?,
            }
        }

        loop {
            let type_byte = read_message_into(&mut stream, &mut read_buffer)?;

            match state_machine.step(RawMessage::new(type_byte, &read_buffer))? {
                Action::ReadMessage => {}
                Action::WritePacket(data) => write_packet(&mut stream, data)?,
                Action::AsyncMessage(AsyncMessage::Notice(fields)) => {
                    tracing::info!("startup notice: {}", fields);
                }
                Action::AsyncMessage(_) => {}
                Action::ResultReady => {
                    return Err(Error::Protocol("Unexpected result during startup".into()));
                }
                Action::Finished => break,
            }
        }

        tracing::info!(
            "connected to {}:{} as \"{}\"",
            opts.host,
            opts.port,
            opts.user
        );

        Ok(Self {
            stream,
            read_buffer,
            write_buffer: Vec::with_capacity(8192),
            backend_key: state_machine.backend_key().copied(),
            server_params: state_machine.take_server_params(),
            transaction_status: state_machine.transaction_status(),
            status: ConnStatus::Ok,
            pending: None,
            notifications: VecDeque::new(),
            opts,
        })
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn status(&self) -> ConnStatus {
        self.status
    }

    fn mark_bad(&mut self) {
        if self.status == ConnStatus::Ok {
            tracing::warn!("session marked bad");
        }
        self.status = ConnStatus::Bad;
        self.pending = None;
    }

    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    pub fn parameter_status(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Transaction status as reported to callers.
    pub fn transaction_status(&self) -> TransactionStatus {
        if self.status == ConnStatus::Bad {
            TransactionStatus::Unknown
        } else if self.pending.is_some() {
            TransactionStatus::Active
        } else {
            self.transaction_status
        }
    }

    /// Whether a dispatched command still has unread results.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether reading the next result would block.
    pub fn is_busy(&mut self) -> Result<bool> {
        if self.pending.is_none() {
            return Ok(false);
        }
        Ok(!self.stream.has_pending_input()?)
    }

    pub fn take_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    // === Dispatch ===

    /// Send a command without waiting for its results.
    pub fn dispatch(&mut self, mut state_machine: ResultStateMachine) -> Result<()> {
        if self.status == ConnStatus::Bad {
            return Err(Error::ConnectionBroken);
        }
        if self.pending.is_some() {
            return Err(Error::ResultsPending);
        }

        let written = match state_machine.start() {
            Action::WritePacket(data) => write_packet(&mut self.stream, data),
            _ => Err(Error::Protocol("Unexpected start action".into())),
        };
        if let Err(e) = written {
            self.mark_bad();
            return Err(e);
        }

        tracing::debug!("dispatched {:?} command", state_machine.kind());
        self.pending = Some(state_machine);
        Ok(())
    }

    pub fn send_query(&mut self, sql: &str) -> Result<()> {
        self.dispatch(ResultStateMachine::query(sql))
    }

    pub fn send_prepare(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> Result<()> {
        self.dispatch(ResultStateMachine::prepare(name, sql, param_types))
    }

    pub fn send_query_params(
        &mut self,
        sql: &str,
        param_types: &[Oid],
        params: &[Option<&str>],
    ) -> Result<()> {
        self.dispatch(ResultStateMachine::query_params(sql, param_types, params))
    }

    pub fn send_query_prepared(&mut self, name: &str, params: &[Option<&str>]) -> Result<()> {
        self.dispatch(ResultStateMachine::query_prepared(name, params))
    }

    // === Results ===

    /// Next result of the dispatched command, or `None` once the server is
    /// ready for a new command.
    pub fn get_result(&mut self) -> Result<Option<ResultData>> {
        let outcome = self.read_next_result();
        if let Err(ref e) = outcome {
            if !e.is_misuse() {
                self.mark_bad();
            }
        }
        outcome
    }

    fn read_next_result(&mut self) -> Result<Option<ResultData>> {
        let Some(state_machine) = self.pending.as_mut() else {
            return Ok(None);
        };

        loop {
            let type_byte = read_message_into(&mut self.stream, &mut self.read_buffer)?;

            match state_machine.step(RawMessage::new(type_byte, &self.read_buffer))? {
                Action::ReadMessage => {}
                Action::WritePacket(data) => write_packet(&mut self.stream, data)?,
                Action::AsyncMessage(message) => match message {
                    AsyncMessage::Notification(n) => self.notifications.push_back(n),
                    AsyncMessage::Notice(fields) => {
                        tracing::info!(
                            "{}: {}",
                            fields.severity.as_deref().unwrap_or("NOTICE"),
                            fields.message.as_deref().unwrap_or_default()
                        );
                    }
                    AsyncMessage::ParameterChanged { name, value } => {
                        match self.server_params.iter_mut().find(|(n, _)| *n == name) {
                            Some(entry) => entry.1 = value,
                            None => self.server_params.push((name, value)),
                        }
                    }
                },
                Action::ResultReady => {
                    let Some(data) = state_machine.take_result() else {
                        return Err(Error::Protocol("Result announced but missing".into()));
                    };
                    if data.is_session_fatal() {
                        // The server closes the session after a FATAL error
                        self.mark_bad();
                    }
                    return Ok(Some(data));
                }
                Action::Finished => {
                    self.transaction_status = state_machine.transaction_status();
                    self.pending = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Dispatch and wait: every result is read; the last is returned, except
    /// that the first error result wins over later ones.
    pub fn exec(&mut self, state_machine: ResultStateMachine) -> Result<Option<ResultData>> {
        self.dispatch(state_machine)?;

        let mut kept: Option<ResultData> = None;
        while let Some(data) = self.get_result()? {
            if kept.as_ref().is_some_and(|k| k.status.is_error()) {
                continue;
            }
            kept = Some(data);
        }
        Ok(kept)
    }

    /// Read and discard every remaining result; returns how many were dropped.
    pub fn drain(&mut self) -> Result<usize> {
        let mut dropped = 0;
        while self.get_result()?.is_some() {
            dropped += 1;
        }
        Ok(dropped)
    }

    // === Session control ===

    /// Replace this session with a freshly connected one using the same options.
    pub fn reset(&mut self) -> Result<()> {
        match Session::connect(self.opts.clone()) {
            Ok(fresh) => {
                // dropping the old session sends Terminate if it is still writable
                *self = fresh;
                tracing::info!("session reset");
                Ok(())
            }
            Err(e) => {
                self.mark_bad();
                Err(e)
            }
        }
    }

    /// Ask the server to cancel the command in progress, over a separate socket.
    pub fn cancel(&self) -> Result<()> {
        let key = self
            .backend_key
            .ok_or_else(|| Error::Connection("no backend key data to cancel with".into()))?;

        let mut stream = Stream::connect(&self.opts)?;
        let mut buf = Vec::with_capacity(16);
        write_cancel_request(&mut buf, key.process_id(), key.secret());
        write_packet(&mut stream, &buf)?;

        // The server closes the socket without replying
        let mut eof = [0u8; 1];
        match stream.read_exact(&mut eof) {
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {}
            Err(e) => tracing::debug!("cancel socket failed while waiting for close: {}", e),
            Ok(()) => tracing::debug!("unexpected byte {:#04x} on cancel socket", eof[0]),
        }
        Ok(())
    }

    /// Send Terminate and mark the session unusable.
    pub fn terminate(&mut self) {
        if self.status == ConnStatus::Bad {
            return;
        }
        self.write_buffer.clear();
        write_terminate(&mut self.write_buffer);
        let _ = self.stream.write_all(&self.write_buffer);
        let _ = self.stream.flush();
        self.status = ConnStatus::Bad;
        self.pending = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.terminate();
    }
}
