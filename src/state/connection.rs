//! Connection startup and authentication state machine.

use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, ParameterStatus, RawMessage,
    ReadyForQuery, msg_type,
};
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::{Action, AsyncMessage};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// Connection startup state machine.
pub struct ConnectionStateMachine {
    state: ConnectionState,
    options: Opts,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
    write_buffer: Vec<u8>,
}

impl ConnectionStateMachine {
    pub fn new(options: Opts) -> Self {
        Self {
            state: ConnectionState::Initial,
            options,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
            write_buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Backend key data for cancellation, once received.
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Parameters reported by the server during startup, in arrival order.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Start the connection process.
    ///
    /// Without TLS support compiled in, `Prefer` skips the SSLRequest and
    /// the stricter modes fail up front.
    pub fn start(&mut self) -> Result<Action<'_>> {
        self.write_buffer.clear();

        let try_tls = match self.options.ssl_mode {
            SslMode::Disable => false,
            _ if cfg!(feature = "tls") => true,
            SslMode::Prefer => false,
            mode => {
                self.state = ConnectionState::Failed;
                return Err(Error::Unsupported(format!(
                    "sslmode {:?} requires the \"tls\" feature",
                    mode
                )));
            }
        };

        if try_tls {
            write_ssl_request(&mut self.write_buffer);
            self.state = ConnectionState::WaitingSslResponse;
        } else {
            self.write_startup_message();
            self.state = ConnectionState::WaitingAuth;
        }
        Ok(Action::WritePacket(&self.write_buffer))
    }

    /// Process the single-byte SSL response ('S' or 'N').
    pub fn process_ssl_response(&mut self, response: u8) -> Result<SslAction<'_>> {
        match response {
            b'S' => {
                self.state = ConnectionState::SslHandshake;
                Ok(SslAction::StartHandshake)
            }
            b'N' => {
                if self.options.ssl_mode.requires_tls() {
                    self.state = ConnectionState::Failed;
                    return Err(Error::Connection(
                        "server does not support SSL, but SSL was required".into(),
                    ));
                }

                self.write_buffer.clear();
                self.write_startup_message();
                self.state = ConnectionState::WaitingAuth;
                Ok(SslAction::SendStartup(self.write_buffer.as_slice()))
            }
            _ => {
                self.state = ConnectionState::Failed;
                Err(Error::Protocol(format!(
                    "Unexpected SSL response: {}",
                    response
                )))
            }
        }
    }

    /// Called after the TLS handshake completes.
    pub fn ssl_handshake_complete(&mut self) -> Action<'_> {
        self.write_buffer.clear();
        self.write_startup_message();
        self.state = ConnectionState::WaitingAuth;
        Action::WritePacket(&self.write_buffer)
    }

    /// Process a message from the server.
    pub fn step(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        if msg.type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(msg.payload)?;
            self.state = ConnectionState::Failed;
            return Err(error.into_error());
        }

        // ParameterStatus during startup is part of the handshake, not a change notification
        if msg.type_byte == msg_type::PARAMETER_STATUS {
            let param = ParameterStatus::parse(msg.payload)?;
            self.server_params
                .push((param.name.to_string(), param.value.to_string()));
            return Ok(Action::ReadMessage);
        }

        if msg.is_async() {
            return Ok(Action::AsyncMessage(AsyncMessage::parse(&msg)?));
        }

        if msg.type_byte == msg_type::NEGOTIATE_PROTOCOL_VERSION {
            tracing::debug!("server negotiated a lower protocol minor version");
            return Ok(Action::ReadMessage);
        }

        match self.state {
            ConnectionState::WaitingAuth => self.handle_auth_message(msg),
            ConnectionState::SaslInProgress => self.handle_sasl_message(msg),
            ConnectionState::WaitingAuthResult => self.handle_auth_result(msg),
            ConnectionState::WaitingReady => self.handle_ready_message(msg),
            _ => Err(Error::Protocol(format!(
                "Unexpected message in state {:?}",
                self.state
            ))),
        }
    }

    fn write_startup_message(&mut self) {
        let mut params: Vec<(&str, &str)> = vec![
            ("user", &self.options.user),
            ("client_encoding", &self.options.client_encoding),
        ];

        if let Some(ref db) = self.options.database {
            params.push(("database", db));
        }

        if let Some(ref app) = self.options.application_name {
            params.push(("application_name", app));
        }

        if let Some(ref options) = self.options.options {
            params.push(("options", options));
        }

        for (name, value) in &self.options.params {
            params.push((name, value));
        }

        write_startup(&mut self.write_buffer, &params);
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("password required but none supplied".into()))
    }

    fn expect_authentication<'m>(msg: &RawMessage<'m>) -> Result<AuthenticationMessage<'m>> {
        if msg.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                msg.type_byte as char
            )));
        }
        AuthenticationMessage::parse(msg.payload)
    }

    fn handle_auth_message(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        let auth = Self::expect_authentication(&msg)?;

        match auth {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                let password = self.password()?.to_string();
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &password);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WritePacket(&self.write_buffer))
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &hashed);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WritePacket(&self.write_buffer))
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {:?}",
                        mechanisms
                    )));
                }

                let scram = ScramClient::new(self.password()?);
                let client_first = scram.client_first_message();

                self.write_buffer.clear();
                write_sasl_initial_response(
                    &mut self.write_buffer,
                    SCRAM_SHA_256,
                    client_first.as_bytes(),
                );

                self.scram_client = Some(scram);
                self.state = ConnectionState::SaslInProgress;
                Ok(Action::WritePacket(&self.write_buffer))
            }
            AuthenticationMessage::Unsupported(code) => {
                self.state = ConnectionState::Failed;
                Err(Error::Unsupported(format!(
                    "authentication method {} is not supported",
                    code
                )))
            }
            other => Err(Error::Protocol(format!(
                "Unexpected authentication message: {:?}",
                other
            ))),
        }
    }

    fn handle_sasl_message(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        let auth = Self::expect_authentication(&msg)?;

        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let scram = self
                    .scram_client
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-first-message: {}", e)))?;
                let client_final = scram.process_server_first(server_first)?;

                self.write_buffer.clear();
                write_sasl_response(&mut self.write_buffer, client_final.as_bytes());
                Ok(Action::WritePacket(&self.write_buffer))
            }
            AuthenticationMessage::SaslFinal { data } => {
                let scram = self
                    .scram_client
                    .as_ref()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-final-message: {}", e)))?;
                scram.verify_server_final(server_final)?;

                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected SASL message: {:?}",
                other
            ))),
        }
    }

    fn handle_auth_result(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        match Self::expect_authentication(&msg)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Auth(format!("Unexpected auth result: {:?}", other))),
        }
    }

    fn handle_ready_message(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        match msg.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(msg.payload)?;
                self.backend_key = Some(*key);
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(msg.payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                other as char
            ))),
        }
    }
}

/// SSL negotiation action.
#[derive(Debug)]
pub enum SslAction<'a> {
    /// Start the TLS handshake
    StartHandshake,
    /// Send the startup message over plaintext
    SendStartup(&'a [u8]),
}
