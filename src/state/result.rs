//! Result-stream state machine.
//!
//! Splits the backend messages answering one dispatched command into
//! per-statement results. Works for both the simple protocol (one Query
//! message, possibly several statements) and the extended protocol
//! (Parse/Bind/Describe/Execute/Sync).

use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, RawMessage, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_copy_fail, write_describe_portal, write_execute, write_parse, write_query,
    write_sync,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::result::{Column, ExecStatus, ResultData, RowData};

use super::action::{Action, AsyncMessage};

/// Which request produced the stream; decides what counts as a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Simple Query message
    Simple,
    /// Parse + Sync; ParseComplete yields the result
    Prepare,
    /// Bind/Describe/Execute against an unnamed portal
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Reading,
    /// COPY data is being discarded
    CopyOut,
    Finished,
}

/// Reads one command's results off the wire.
pub struct ResultStateMachine {
    kind: CommandKind,
    state: State,
    columns: Option<Vec<Column>>,
    rows: Vec<RowData>,
    ready: Option<ResultData>,
    results_seen: usize,
    transaction_status: TransactionStatus,
    write_buffer: Vec<u8>,
}

impl ResultStateMachine {
    fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            state: State::Initial,
            columns: None,
            rows: Vec::new(),
            ready: None,
            results_seen: 0,
            transaction_status: TransactionStatus::Idle,
            write_buffer: Vec::new(),
        }
    }

    /// Simple query; `sql` may hold several statements.
    pub fn query(sql: &str) -> Self {
        let mut sm = Self::new(CommandKind::Simple);
        write_query(&mut sm.write_buffer, sql);
        sm
    }

    /// Create a named prepared statement.
    pub fn prepare(name: &str, sql: &str, param_types: &[Oid]) -> Self {
        let mut sm = Self::new(CommandKind::Prepare);
        write_parse(&mut sm.write_buffer, name, sql, param_types);
        write_sync(&mut sm.write_buffer);
        sm
    }

    /// Parse, bind and execute `sql` in one round trip through the unnamed statement.
    pub fn query_params(sql: &str, param_types: &[Oid], params: &[Option<&str>]) -> Self {
        let mut sm = Self::new(CommandKind::Extended);
        write_parse(&mut sm.write_buffer, "", sql, param_types);
        sm.write_execute_unnamed_portal("", params);
        sm
    }

    /// Bind and execute a previously prepared statement.
    pub fn query_prepared(name: &str, params: &[Option<&str>]) -> Self {
        let mut sm = Self::new(CommandKind::Extended);
        sm.write_execute_unnamed_portal(name, params);
        sm
    }

    fn write_execute_unnamed_portal(&mut self, statement: &str, params: &[Option<&str>]) {
        write_bind(&mut self.write_buffer, "", statement, params);
        write_describe_portal(&mut self.write_buffer, "");
        write_execute(&mut self.write_buffer, "", 0);
        write_sync(&mut self.write_buffer);
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The request packet to send.
    pub fn start(&mut self) -> Action<'_> {
        self.state = State::Reading;
        Action::WritePacket(&self.write_buffer)
    }

    /// Whether ReadyForQuery has been seen.
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Transaction status from the closing ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Take the result announced by `Action::ResultReady`.
    pub fn take_result(&mut self) -> Option<ResultData> {
        self.ready.take()
    }

    fn finish_result(&mut self, mut data: ResultData) -> Action<'_> {
        if let Some(columns) = self.columns.take() {
            data.columns = columns;
        }
        data.rows = std::mem::take(&mut self.rows);
        self.results_seen += 1;
        self.ready = Some(data);
        Action::ResultReady
    }

    /// Process one message from the server.
    pub fn step(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        if self.state == State::Initial || self.state == State::Finished {
            return Err(Error::Protocol(format!(
                "Unexpected message '{}' with no command in progress",
                msg.type_byte as char
            )));
        }

        if msg.is_async() {
            return Ok(Action::AsyncMessage(AsyncMessage::parse(&msg)?));
        }

        if self.state == State::CopyOut {
            match msg.type_byte {
                msg_type::COPY_DATA => return Ok(Action::ReadMessage),
                msg_type::COPY_DONE => {
                    self.state = State::Reading;
                    return Ok(Action::ReadMessage);
                }
                // ErrorResponse or CommandComplete end the transfer
                _ => self.state = State::Reading,
            }
        }

        match msg.type_byte {
            msg_type::ROW_DESCRIPTION => {
                let desc = RowDescription::parse(msg.payload)?;
                self.columns = Some(desc.iter().map(Column::from).collect());
                self.rows.clear();
                Ok(Action::ReadMessage)
            }
            msg_type::DATA_ROW => {
                let Some(columns) = &self.columns else {
                    return Err(Error::Protocol(
                        "DataRow received before RowDescription".into(),
                    ));
                };
                let row = DataRow::parse(msg.payload)?;
                row.validate(columns.len())?;
                self.rows.push(RowData::from_data_row(&row));
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE | msg_type::PORTAL_SUSPENDED => {
                let tag = if msg.type_byte == msg_type::COMMAND_COMPLETE {
                    Some(CommandComplete::parse(msg.payload)?.tag.to_string())
                } else {
                    None
                };
                let status = if self.columns.is_some() {
                    ExecStatus::TuplesOk
                } else {
                    ExecStatus::CommandOk
                };
                let mut data = ResultData::new(status);
                data.tag = tag;
                Ok(self.finish_result(data))
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                Ok(self.finish_result(ResultData::new(ExecStatus::EmptyQuery)))
            }
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(msg.payload)?;
                self.columns = None;
                self.rows.clear();
                Ok(self.finish_result(ResultData::error(error.0)))
            }
            msg_type::PARSE_COMPLETE => {
                if self.kind == CommandKind::Prepare {
                    Ok(self.finish_result(ResultData::new(ExecStatus::CommandOk)))
                } else {
                    Ok(Action::ReadMessage)
                }
            }
            msg_type::BIND_COMPLETE
            | msg_type::CLOSE_COMPLETE
            | msg_type::PARAMETER_DESCRIPTION
            | msg_type::NO_DATA => Ok(Action::ReadMessage),
            msg_type::COPY_IN_RESPONSE => {
                tracing::debug!("refusing COPY FROM STDIN");
                self.write_buffer.clear();
                write_copy_fail(&mut self.write_buffer, "COPY FROM STDIN is not supported");
                if self.kind != CommandKind::Simple {
                    write_sync(&mut self.write_buffer);
                }
                Ok(Action::WritePacket(&self.write_buffer))
            }
            msg_type::COPY_OUT_RESPONSE => {
                tracing::debug!("discarding COPY TO STDOUT data");
                self.state = State::CopyOut;
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(msg.payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = State::Finished;
                if self.results_seen == 0 {
                    tracing::debug!("command finished without producing a result");
                }
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected message '{}' while reading results",
                other as char
            ))),
        }
    }
}
