//! Synchronous PostgreSQL connection.

use std::rc::Rc;

use crate::error::{Error, ErrorFields, QueryError, Result, Verbosity};
use crate::escape;
use crate::oid_cache::{OidCache, SharedCatalog};
use crate::opts::{DEFAULT_CONNINFO, Opts};
use crate::protocol::types::{ConnStatus, Oid, TransactionStatus};
use crate::result::{ExecStatus, QueryResult, ResultData};
use crate::state::action::Notification;
use crate::state::result::ResultStateMachine;

use super::large_object::LoFd;
use super::session::Session;

const TYPE_CATALOG_QUERY: &str = "SELECT oid, typname FROM pg_type";
const TYPE_LOOKUP_QUERY: &str = "SELECT oid, typname FROM pg_type WHERE oid = $1";
const TABLE_LOOKUP_QUERY: &str = "SELECT oid, relname FROM pg_class WHERE oid = $1";

/// PostgreSQL type OID of `oid`.
const OID_TYPE: Oid = 26;

/// A connection to a PostgreSQL server.
///
/// Holds at most one session. After [`close`](Connection::close) every
/// operation fails with [`Error::ConnectionClosed`]; results created earlier
/// stay readable.
pub struct Connection {
    session: Option<Session>,
    catalog: Rc<SharedCatalog>,
    tables: OidCache,
    verbosity: Verbosity,
    last_error: Option<String>,
    pub(super) last_lo_fd: Option<LoFd>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Connection");
        match &self.session {
            Some(session) => s
                .field("host", &session.opts().host)
                .field("port", &session.opts().port)
                .field("status", &session.status()),
            None => s.field("closed", &true),
        };
        s.finish()
    }
}

impl Connection {
    /// Connect using a conninfo string or URL, with `PG*` environment defaults.
    ///
    /// # Errors
    ///
    /// Every failure, including a malformed conninfo, is reported as
    /// [`Error::Connection`] carrying the server's or the OS's message.
    pub fn connect(conninfo: &str) -> Result<Self> {
        let opts = Opts::parse_with_base(conninfo, Opts::from_env())
            .map_err(|e| Error::Connection(e.to_string()))?;
        Self::connect_with(opts)
    }

    /// Connect with [`DEFAULT_CONNINFO`].
    pub fn connect_default() -> Result<Self> {
        Self::connect(DEFAULT_CONNINFO)
    }

    /// Connect with fully specified options.
    pub fn connect_with(opts: Opts) -> Result<Self> {
        let session = Session::connect(opts).map_err(|e| match e {
            Error::Server(fields) => Error::Connection(fields.render(Verbosity::Default)),
            Error::Connection(text) => Error::Connection(text),
            other => Error::Connection(other.to_string()),
        })?;

        let mut conn = Self {
            session: Some(session),
            catalog: Rc::new(SharedCatalog::default()),
            tables: OidCache::new(),
            verbosity: Verbosity::Default,
            last_error: None,
            last_lo_fd: None,
        };
        conn.prime_type_cache();
        Ok(conn)
    }

    fn prime_type_cache(&mut self) {
        match self.query(TYPE_CATALOG_QUERY) {
            Ok(Some(result)) => {
                let merged = self.catalog.merge_type_result(&result);
                tracing::debug!("type cache primed with {} entries", merged);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("could not load the type catalog: {}", e),
        }
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(Error::ConnectionClosed)
    }

    fn session_ref(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::ConnectionClosed)
    }

    /// Close the session. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        session.terminate();
        self.catalog.close();
        self.tables.clear();
        self.last_lo_fd = None;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    // === Accessors ===

    /// Host name, or the socket directory for Unix-socket sessions.
    pub fn host(&self) -> Result<&str> {
        Ok(self.session_ref()?.opts().host.as_str())
    }

    pub fn port(&self) -> Result<u16> {
        Ok(self.session_ref()?.opts().port)
    }

    pub fn dbname(&self) -> Result<&str> {
        Ok(self.session_ref()?.opts().effective_database())
    }

    pub fn user(&self) -> Result<&str> {
        Ok(self.session_ref()?.opts().user.as_str())
    }

    /// Backend command-line options given at connect time.
    pub fn options(&self) -> Result<&str> {
        Ok(self.session_ref()?.opts().options.as_deref().unwrap_or(""))
    }

    /// Process ID of the backend serving this session; 0 if the server sent none.
    pub fn backend_pid(&self) -> Result<u32> {
        Ok(self
            .session_ref()?
            .backend_key()
            .map_or(0, |key| key.process_id()))
    }

    /// A run-time parameter reported by the server (`server_version`, `TimeZone`, ...).
    pub fn parameter_status(&self, name: &str) -> Result<Option<&str>> {
        Ok(self.session_ref()?.parameter_status(name))
    }

    /// Text of the most recent error on this connection.
    pub fn last_error(&self) -> Result<Option<&str>> {
        self.session_ref()?;
        Ok(self.last_error.as_deref())
    }

    pub fn client_encoding(&self) -> Result<&str> {
        let session = self.session_ref()?;
        Ok(session
            .parameter_status("client_encoding")
            .unwrap_or(&session.opts().client_encoding))
    }

    pub fn server_version(&self) -> Result<Option<&str>> {
        self.parameter_status("server_version")
    }

    pub fn transaction_status(&self) -> Result<TransactionStatus> {
        Ok(self.session_ref()?.transaction_status())
    }

    pub fn connection_status(&self) -> Result<ConnStatus> {
        Ok(self.session_ref()?.status())
    }

    /// Whether reading the next asynchronous result would block.
    pub fn is_busy(&mut self) -> Result<bool> {
        self.session()?.is_busy()
    }

    /// Set how server errors are rendered; returns the previous setting.
    pub fn set_error_verbosity(&mut self, verbosity: Verbosity) -> Result<Verbosity> {
        self.session_ref()?;
        Ok(std::mem::replace(&mut self.verbosity, verbosity))
    }

    /// Next LISTEN/NOTIFY notification received so far.
    pub fn notifies(&mut self) -> Result<Option<Notification>> {
        Ok(self.session()?.take_notification())
    }

    // === Health ===

    /// Check the session with a trivial statement, resetting once if it is bad.
    pub fn ping(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.has_pending() {
            if let Err(e) = session.exec(ResultStateMachine::query("SELECT 1")) {
                tracing::debug!("ping failed: {}", e);
            }
        }
        if session.status() == ConnStatus::Bad {
            tracing::warn!("ping found the session bad, resetting");
            if let Err(e) = session.reset() {
                self.last_error = Some(e.to_string());
                return false;
            }
        }
        session.status() == ConnStatus::Ok
    }

    /// Re-establish the session with the original options.
    pub fn reset(&mut self) -> Result<bool> {
        let session = self.session()?;
        match session.reset() {
            Ok(()) => Ok(session.status() == ConnStatus::Ok),
            Err(e) => {
                tracing::warn!("reset failed: {}", e);
                self.last_error = Some(e.to_string());
                Ok(false)
            }
        }
    }

    // === Synchronous execution ===

    /// Run `sql` (possibly several statements) and wait for the outcome.
    ///
    /// Returns the last result; an error result takes precedence and is
    /// returned as [`Error::Query`]. `Ok(None)` means the server produced no
    /// result at all. If the session turns out to be dead, it is reset and
    /// the statement is run exactly once more.
    pub fn query(&mut self, sql: &str) -> Result<Option<QueryResult>> {
        self.run(|| ResultStateMachine::query(sql))
    }

    /// Run a single parameterized statement. `None` parameters are SQL NULL;
    /// `param_types` may be shorter than `params` (missing OIDs are inferred).
    pub fn query_params(
        &mut self,
        sql: &str,
        param_types: &[Oid],
        params: &[Option<&str>],
    ) -> Result<Option<QueryResult>> {
        self.run(|| ResultStateMachine::query_params(sql, param_types, params))
    }

    /// Create a named prepared statement.
    pub fn prepare(
        &mut self,
        name: &str,
        sql: &str,
        param_types: &[Oid],
    ) -> Result<Option<QueryResult>> {
        self.run(|| ResultStateMachine::prepare(name, sql, param_types))
    }

    /// Execute a statement created by [`prepare`](Connection::prepare).
    pub fn execute_prepared(
        &mut self,
        name: &str,
        params: &[Option<&str>],
    ) -> Result<Option<QueryResult>> {
        self.run(|| ResultStateMachine::query_prepared(name, params))
    }

    fn run(&mut self, command: impl Fn() -> ResultStateMachine) -> Result<Option<QueryResult>> {
        let outcome = {
            let session = self.session()?;
            if session.has_pending() {
                return Err(Error::ResultsPending);
            }

            let mut outcome = session.exec(command());
            if session.status() == ConnStatus::Bad {
                tracing::warn!("session lost during execution, resetting and retrying once");
                drop(outcome);
                outcome = match session.reset() {
                    Ok(()) => session.exec(command()),
                    Err(e) => Err(Error::Connection(e.to_string())),
                };
                if session.status() == ConnStatus::Bad {
                    outcome = Err(match outcome {
                        Err(Error::Connection(text)) => Error::Connection(text),
                        Err(e) => Error::Connection(e.to_string()),
                        Ok(_) => Error::Connection(
                            "server closed the connection unexpectedly".into(),
                        ),
                    });
                }
            }
            outcome
        };

        match outcome {
            Ok(Some(data)) if data.status.is_error() => Err(self.query_error(data)),
            Ok(Some(data)) => Ok(Some(self.wrap(data))),
            Ok(None) => Ok(None),
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn query_error(&mut self, data: ResultData) -> Error {
        let status = data.status;
        let fields = data.error.unwrap_or_else(|| match status {
            ExecStatus::EmptyQuery => ErrorFields::client("empty query"),
            _ => ErrorFields::client("unexpected response from server"),
        });
        self.last_error = Some(fields.render(self.verbosity));
        Error::Query(QueryError { status, fields })
    }

    fn wrap(&mut self, data: ResultData) -> QueryResult {
        if let Some(fields) = &data.error {
            self.last_error = Some(fields.render(self.verbosity));
        }
        QueryResult::new(data, Rc::clone(&self.catalog), self.verbosity)
    }

    // === Asynchronous execution ===

    /// Send `sql` without waiting; read the outcome with [`get_result`](Connection::get_result).
    pub fn send_query(&mut self, sql: &str) -> Result<()> {
        self.dispatch(|session| session.send_query(sql))
    }

    pub fn send_prepare(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> Result<()> {
        self.dispatch(|session| session.send_prepare(name, sql, param_types))
    }

    pub fn send_query_params(
        &mut self,
        sql: &str,
        param_types: &[Oid],
        params: &[Option<&str>],
    ) -> Result<()> {
        self.dispatch(|session| session.send_query_params(sql, param_types, params))
    }

    pub fn send_query_prepared(&mut self, name: &str, params: &[Option<&str>]) -> Result<()> {
        self.dispatch(|session| session.send_query_prepared(name, params))
    }

    /// Alias of [`send_query_prepared`](Connection::send_query_prepared).
    pub fn send_execute(&mut self, name: &str, params: &[Option<&str>]) -> Result<()> {
        self.send_query_prepared(name, params)
    }

    fn dispatch(&mut self, send: impl Fn(&mut Session) -> Result<()>) -> Result<()> {
        let outcome = {
            let session = self.session()?;
            if session.has_pending() {
                return Err(Error::ResultsPending);
            }
            match send(session) {
                Err(e) if session.status() == ConnStatus::Bad => {
                    tracing::warn!("dispatch failed ({}), resetting and retrying once", e);
                    session
                        .reset()
                        .and_then(|()| send(session))
                        .map_err(|e| Error::Connection(e.to_string()))
                }
                other => other,
            }
        };
        if let Err(ref e) = outcome {
            self.last_error = Some(e.to_string());
        }
        outcome
    }

    /// Next result of the dispatched command; `Ok(None)` once all were read.
    ///
    /// Error results are returned like any other, with their status.
    pub fn get_result(&mut self) -> Result<Option<QueryResult>> {
        match self.session()?.get_result() {
            Ok(data) => Ok(data.map(|data| self.wrap(data))),
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Request cancellation of the command in progress and discard its remaining results.
    pub fn cancel_query(&mut self) -> Result<()> {
        let session = self.session()?;
        if let Err(e) = session.cancel() {
            tracing::warn!("cancel request failed: {}", e);
            return Err(e);
        }
        let dropped = session.drain()?;
        tracing::debug!("discarded {} results after cancel", dropped);
        Ok(())
    }

    // === Type/OID resolution ===

    /// Name of the type `oid`, from the cache unless missing or `force` is set.
    pub fn get_field_name(&mut self, oid: Oid, force: bool) -> Result<Option<String>> {
        if !force {
            if let Some(name) = self.catalog.type_name(oid)? {
                return Ok(Some(name));
            }
        }
        let param = oid.to_string();
        let merged = match self.query_params(TYPE_LOOKUP_QUERY, &[OID_TYPE], &[Some(param.as_str())])? {
            Some(result) => self.catalog.merge_type_result(&result),
            None => 0,
        };
        if merged == 0 {
            // The type is gone from pg_type
            if let Some(stale) = self.catalog.remove_type(oid) {
                tracing::debug!("dropped stale type name \"{}\" for OID {}", stale, oid);
            }
        } else {
            tracing::debug!("refreshed type name for OID {}", oid);
        }
        self.catalog.type_name(oid)
    }

    /// Name of the table `oid`, from the cache unless missing or `force` is set.
    pub fn get_field_table(&mut self, oid: Oid, force: bool) -> Result<Option<String>> {
        self.session_ref()?;
        if !force {
            if let Some(name) = self.tables.get(oid) {
                return Ok(Some(name.to_string()));
            }
        }
        let param = oid.to_string();
        let merged = match self.query_params(TABLE_LOOKUP_QUERY, &[OID_TYPE], &[Some(param.as_str())])? {
            Some(result) => self.tables.merge_result(&result),
            None => 0,
        };
        if merged == 0 {
            if let Some(stale) = self.tables.remove(oid) {
                tracing::debug!("dropped stale table name \"{}\" for OID {}", stale, oid);
            }
        } else {
            tracing::debug!("refreshed table name for OID {}", oid);
        }
        Ok(self.tables.get(oid).map(str::to_string))
    }

    /// Table name of column `col` of `result`.
    pub fn field_table(
        &mut self,
        result: &QueryResult,
        col: usize,
        force: bool,
    ) -> Result<Option<String>> {
        let oid = result.field_table_oid(col)?;
        if oid == 0 {
            return Ok(None);
        }
        self.get_field_table(oid, force)
    }

    // === Quoting ===

    pub fn escape_literal(&self, s: &str) -> Result<String> {
        self.session_ref()?;
        escape::escape_literal(s)
    }

    pub fn escape_identifier(&self, s: &str) -> Result<String> {
        self.session_ref()?;
        escape::escape_identifier(s)
    }

    pub fn escape_bytea(&self, data: &[u8]) -> Result<String> {
        self.session_ref()?;
        Ok(escape::escape_bytea(data))
    }

    pub fn unescape_bytea(&self, text: &[u8]) -> Result<Vec<u8>> {
        self.session_ref()?;
        escape::unescape_bytea(text)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
