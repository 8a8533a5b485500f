//! Common PostgreSQL wire protocol types.

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// OID reported when no object applies (`InvalidOid`).
pub const INVALID_OID: Oid = 0;

/// Data format code in PostgreSQL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl From<u16> for FormatCode {
    fn from(value: u16) -> Self {
        match value {
            1 => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }
}

/// Transaction status of the session, as reported to callers.
///
/// `Idle`, `InTransaction` and `Failed` come from the server's ReadyForQuery
/// byte; `Active` and `Unknown` are derived from the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum TransactionStatus {
    /// Idle (not in transaction block)
    #[default]
    Idle = 0,
    /// A command is in progress
    Active = 1,
    /// In transaction block
    InTransaction = 2,
    /// In failed transaction block (queries will be rejected until rollback)
    Failed = 3,
    /// The session is bad
    Unknown = 4,
}

impl TransactionStatus {
    /// Decode the ReadyForQuery status byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if currently in a transaction (either active or failed).
    pub fn in_transaction(self) -> bool {
        matches!(self, TransactionStatus::InTransaction | TransactionStatus::Failed)
    }
}

/// Health of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ConnStatus {
    Ok = 0,
    Bad = 1,
}
