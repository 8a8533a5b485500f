//! Error types for pgsession.

use thiserror::Error;

use crate::result::ExecStatus;

/// Result type for pgsession operations.
pub type Result<T> = core::result::Result<T, Error>;

/// How much of a server error is rendered into error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum Verbosity {
    /// Severity and primary message only
    Terse = 0,
    /// Adds detail, hint and context lines
    #[default]
    Default = 1,
    /// Adds SQLSTATE and source location
    Verbose = 2,
}

impl Verbosity {
    /// Convert from the boundary integer constant.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Terse),
            1 => Some(Verbosity::Default),
            2 => Some(Verbosity::Verbose),
            _ => None,
        }
    }
}

/// PostgreSQL error/notice field types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Fields carrying only a client-side message.
    pub fn client(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Look up a field by its single-byte protocol code (`b'C'`, `b'M'`, ...).
    pub fn get(&self, code: u8) -> Option<String> {
        use crate::protocol::backend::error::field_type as f;
        match code {
            f::SEVERITY => self.severity.clone(),
            f::SEVERITY_NON_LOCALIZED => self.severity_non_localized.clone(),
            f::CODE => self.code.clone(),
            f::MESSAGE => self.message.clone(),
            f::DETAIL => self.detail.clone(),
            f::HINT => self.hint.clone(),
            f::POSITION => self.position.map(|p| p.to_string()),
            f::INTERNAL_POSITION => self.internal_position.map(|p| p.to_string()),
            f::INTERNAL_QUERY => self.internal_query.clone(),
            f::WHERE => self.where_.clone(),
            f::SCHEMA => self.schema.clone(),
            f::TABLE => self.table.clone(),
            f::COLUMN => self.column.clone(),
            f::DATA_TYPE => self.data_type.clone(),
            f::CONSTRAINT => self.constraint.clone(),
            f::FILE => self.file.clone(),
            f::LINE => self.line.map(|l| l.to_string()),
            f::ROUTINE => self.routine.clone(),
            _ => None,
        }
    }

    /// Render the fields the way `last_error` reports them.
    pub fn render(&self, verbosity: Verbosity) -> String {
        let mut out = String::new();
        if let Some(severity) = &self.severity {
            out.push_str(severity);
            out.push_str(":  ");
        }
        if verbosity == Verbosity::Verbose {
            if let Some(code) = &self.code {
                out.push_str(code);
                out.push_str(": ");
            }
        }
        if let Some(message) = &self.message {
            out.push_str(message);
        }
        if verbosity == Verbosity::Terse {
            return out;
        }
        if let Some(detail) = &self.detail {
            out.push_str("\nDETAIL:  ");
            out.push_str(detail);
        }
        if let Some(hint) = &self.hint {
            out.push_str("\nHINT:  ");
            out.push_str(hint);
        }
        if let Some(where_) = &self.where_ {
            out.push_str("\nCONTEXT:  ");
            out.push_str(where_);
        }
        if verbosity == Verbosity::Verbose {
            if let (Some(routine), Some(file), Some(line)) = (&self.routine, &self.file, self.line)
            {
                out.push_str(&format!("\nLOCATION:  {}, {}:{}", routine, file, line));
            }
        }
        out
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// A statement that completed with a failing execution status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    /// Execution status of the failed result
    pub status: ExecStatus,
    /// Server-reported fields (or a client message for empty/bad responses)
    pub fields: ErrorFields,
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status.as_str(), self.fields)
    }
}

/// Error type for pgsession.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not establish or keep a session
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation on a connection that was already closed
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Statement failed (empty query, bad response, or server error)
    #[error("Query error: {0}")]
    Query(QueryError),

    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Results of an earlier asynchronous dispatch have not been read
    #[error("results pending, call get_result first")]
    ResultsPending,

    /// Invalid usage (index out of range, unknown mode, ...)
    #[error("Invalid usage: {0}")]
    Misuse(String),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns true if the error indicates the session is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken => true,
            Error::Server(fields) => {
                // FATAL and PANIC errors indicate connection is broken
                matches!(fields.severity.as_deref(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Connection-level failure: connect, closed, broken or transport errors.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_)
            | Error::ConnectionClosed
            | Error::ConnectionBroken
            | Error::Io(_)
            | Error::Auth(_) => true,
            #[cfg(feature = "tls")]
            Error::Tls(_) => true,
            _ => false,
        }
    }

    /// Statement-level failure reported by the server.
    pub fn is_query_error(&self) -> bool {
        matches!(self, Error::Query(_) | Error::Server(_))
    }

    /// Caller misuse, never a server condition.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Error::ResultsPending | Error::Misuse(_))
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            Error::Query(err) => err.fields.code.as_deref(),
            _ => None,
        }
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}
