//! Materialized statement results.
//!
//! A [`QueryResult`] owns every row of one completed command plus a
//! "current row" cursor for streaming consumption. Rows are read through
//! `&self`; only the cursor moves, and column metadata never changes after
//! creation.

use std::cell::Cell;
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;
use std::str::FromStr;

use crate::error::{Error, ErrorFields, Result, Verbosity};
use crate::oid_cache::SharedCatalog;
use crate::protocol::backend::query::{tag_inserted_oid, tag_rows_affected};
use crate::protocol::backend::{DataRow, FieldDescription};
use crate::protocol::types::{FormatCode, Oid};

/// Execution status of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExecStatus {
    /// The query string was empty
    EmptyQuery = 0,
    /// A command that returns no rows completed
    CommandOk = 1,
    /// A row-returning command completed
    TuplesOk = 2,
    /// Copy-out transfer started
    CopyOut = 3,
    /// Copy-in transfer started
    CopyIn = 4,
    /// The server's response was not understood
    BadResponse = 5,
    /// A notice or warning occurred
    NonfatalError = 6,
    /// An error occurred
    FatalError = 7,
}

impl ExecStatus {
    /// Boundary name of the status (`PGRES_TUPLES_OK`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::EmptyQuery => "PGRES_EMPTY_QUERY",
            ExecStatus::CommandOk => "PGRES_COMMAND_OK",
            ExecStatus::TuplesOk => "PGRES_TUPLES_OK",
            ExecStatus::CopyOut => "PGRES_COPY_OUT",
            ExecStatus::CopyIn => "PGRES_COPY_IN",
            ExecStatus::BadResponse => "PGRES_BAD_RESPONSE",
            ExecStatus::NonfatalError => "PGRES_NONFATAL_ERROR",
            ExecStatus::FatalError => "PGRES_FATAL_ERROR",
        }
    }

    /// Statuses the synchronous path reports as a failure.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ExecStatus::EmptyQuery
                | ExecStatus::BadResponse
                | ExecStatus::NonfatalError
                | ExecStatus::FatalError
        )
    }
}

/// Metadata of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub table_oid: Oid,
    pub column_id: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

impl From<&FieldDescription<'_>> for Column {
    fn from(field: &FieldDescription<'_>) -> Self {
        Self {
            name: field.name.to_string(),
            table_oid: field.tail.table_oid(),
            column_id: field.tail.column_id(),
            type_oid: field.tail.type_oid(),
            type_size: field.tail.type_size(),
            type_modifier: field.tail.type_modifier(),
            format: field.tail.format(),
        }
    }
}

/// One stored row: the concatenated column bytes and each column's range.
#[derive(Debug, Clone, Default)]
pub struct RowData {
    buf: Vec<u8>,
    ranges: Vec<Option<Range<usize>>>,
}

impl RowData {
    pub fn from_data_row(row: &DataRow<'_>) -> Self {
        let mut buf = Vec::new();
        let mut ranges = Vec::with_capacity(row.len());
        for value in row.iter() {
            ranges.push(value.map(|bytes| {
                let start = buf.len();
                buf.extend_from_slice(bytes);
                start..buf.len()
            }));
        }
        Self { buf, ranges }
    }

    fn value(&self, col: usize) -> Value<'_> {
        self.ranges
            .get(col)
            .and_then(|range| range.clone())
            .map(|range| &self.buf[range])
    }

    fn values(&self) -> Vec<Value<'_>> {
        (0..self.ranges.len()).map(|i| self.value(i)).collect()
    }
}

/// Everything the protocol layer produced for one command.
#[derive(Debug, Clone)]
pub struct ResultData {
    pub status: ExecStatus,
    pub columns: Vec<Column>,
    pub rows: Vec<RowData>,
    pub tag: Option<String>,
    pub error: Option<ErrorFields>,
}

impl ResultData {
    pub fn new(status: ExecStatus) -> Self {
        Self {
            status,
            columns: Vec::new(),
            rows: Vec::new(),
            tag: None,
            error: None,
        }
    }

    pub fn error(fields: ErrorFields) -> Self {
        Self {
            error: Some(fields),
            ..Self::new(ExecStatus::FatalError)
        }
    }

    /// Severity says the session cannot continue.
    pub fn is_session_fatal(&self) -> bool {
        self.error.as_ref().is_some_and(|fields| {
            matches!(
                fields
                    .severity_non_localized
                    .as_deref()
                    .or(fields.severity.as_deref()),
                Some("FATAL") | Some("PANIC")
            )
        })
    }
}

/// A column value; `None` is SQL NULL.
pub type Value<'a> = Option<&'a [u8]>;

/// Which keys a fetched [`Record`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum FetchMode {
    /// Positional access only
    Num = 1,
    /// Access by column name only
    Assoc = 2,
    /// Both
    #[default]
    Both = 3,
}

impl FetchMode {
    fn has_index(self) -> bool {
        matches!(self, FetchMode::Num | FetchMode::Both)
    }

    fn has_name(self) -> bool {
        matches!(self, FetchMode::Assoc | FetchMode::Both)
    }
}

impl FromStr for FetchMode {
    type Err = Error;

    /// Accepts `NUM`, `ASSOC` or `BOTH`, case-insensitively, with or without a `PGSQL_` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("PGSQL_").unwrap_or(&upper) {
            "NUM" => Ok(FetchMode::Num),
            "ASSOC" => Ok(FetchMode::Assoc),
            "BOTH" => Ok(FetchMode::Both),
            _ => Err(Error::Misuse(format!("invalid result type: \"{}\"", s))),
        }
    }
}

/// One fetched row with the access paths its [`FetchMode`] allows.
#[derive(Debug, Clone)]
pub struct Record<'a> {
    mode: FetchMode,
    columns: &'a [Column],
    values: Vec<Value<'a>>,
}

impl<'a> Record<'a> {
    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of column `index`.
    pub fn get(&self, index: usize) -> Result<Value<'a>> {
        if !self.mode.has_index() {
            return Err(Error::Misuse("record was fetched without numeric keys".into()));
        }
        self.values
            .get(index)
            .copied()
            .ok_or_else(|| Error::Misuse(format!("column index {} out of range", index)))
    }

    /// Value of the last column named `name`.
    pub fn get_by_name(&self, name: &str) -> Result<Value<'a>> {
        if !self.mode.has_name() {
            return Err(Error::Misuse("record was fetched without name keys".into()));
        }
        self.columns
            .iter()
            .rposition(|c| c.name == name)
            .map(|i| self.values[i])
            .ok_or_else(|| Error::Misuse(format!("no column named \"{}\"", name)))
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value<'a>] {
        &self.values
    }
}

/// Result of one executed command.
///
/// Holds a reference-counted handle to its connection's catalog; the
/// connection may be closed while results are still alive.
pub struct QueryResult {
    data: ResultData,
    cursor: Cell<usize>,
    error_message: String,
    catalog: Rc<SharedCatalog>,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("status", &self.data.status)
            .field("num_fields", &self.data.columns.len())
            .field("num_rows", &self.data.rows.len())
            .field("cursor", &self.cursor.get())
            .field("tag", &self.data.tag)
            .finish()
    }
}

impl QueryResult {
    pub(crate) fn new(data: ResultData, catalog: Rc<SharedCatalog>, verbosity: Verbosity) -> Self {
        let error_message = data
            .error
            .as_ref()
            .map(|fields| fields.render(verbosity))
            .unwrap_or_default();
        Self {
            data,
            cursor: Cell::new(0),
            error_message,
            catalog,
        }
    }

    fn row_at(&self, row: usize) -> Option<&RowData> {
        self.data.rows.get(row)
    }

    fn column(&self, index: usize) -> Result<&Column> {
        self.data.columns.get(index).ok_or_else(|| {
            Error::Misuse(format!(
                "column index {} out of range (result has {} columns)",
                index,
                self.data.columns.len()
            ))
        })
    }

    fn checked_row(&self, row: usize) -> Result<&RowData> {
        self.row_at(row).ok_or_else(|| {
            Error::Misuse(format!(
                "row {} out of range (result has {} rows)",
                row,
                self.data.rows.len()
            ))
        })
    }

    /// Row under the cursor, advancing it.
    fn advance(&self) -> Option<&RowData> {
        let current = self.cursor.get();
        let row = self.row_at(current)?;
        self.cursor.set(current + 1);
        Some(row)
    }

    // === Streaming fetch ===

    /// Next row as positional values, or `None` once every row was read.
    pub fn fetch_row(&self) -> Option<Vec<Value<'_>>> {
        self.advance().map(RowData::values)
    }

    /// Next row keyed by column name. Later duplicate names win.
    pub fn fetch_assoc(&self) -> Option<HashMap<&str, Value<'_>>> {
        self.advance().map(|row| self.to_map(row))
    }

    /// Next row with the keys `mode` selects.
    pub fn fetch_array(&self, mode: FetchMode) -> Option<Record<'_>> {
        self.advance().map(|row| Record {
            mode,
            columns: &self.data.columns,
            values: row.values(),
        })
    }

    fn to_map<'s>(&'s self, row: &'s RowData) -> HashMap<&'s str, Value<'s>> {
        self.data
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), row.value(i)))
            .collect()
    }

    /// Every row from the first, keyed by column name. The cursor is untouched.
    pub fn fetch_all(&self) -> Vec<HashMap<&str, Value<'_>>> {
        self.data.rows.iter().map(|row| self.to_map(row)).collect()
    }

    /// One column across every row.
    pub fn fetch_all_columns(&self, col: usize) -> Result<Vec<Value<'_>>> {
        self.column(col)?;
        Ok(self.data.rows.iter().map(|row| row.value(col)).collect())
    }

    /// Move the cursor to `row`. Returns `false`, leaving the cursor alone, when out of range.
    pub fn result_seek(&self, row: usize) -> bool {
        if row >= self.data.rows.len() {
            return false;
        }
        self.cursor.set(row);
        true
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.cursor.get()
    }

    // === Metadata ===

    pub fn num_rows(&self) -> usize {
        self.data.rows.len()
    }

    pub fn num_fields(&self) -> usize {
        self.data.columns.len()
    }

    /// Rows affected (or returned) according to the command tag.
    pub fn affected_rows(&self) -> Option<u64> {
        self.data.tag.as_deref().and_then(tag_rows_affected)
    }

    pub fn status(&self) -> ExecStatus {
        self.data.status
    }

    /// Command tag such as `INSERT 0 2`.
    pub fn command_tag(&self) -> Option<&str> {
        self.data.tag.as_deref()
    }

    /// Rendered error text, empty for successful results.
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// A single error field by protocol code (`b'C'` for SQLSTATE, ...).
    pub fn error_field(&self, code: u8) -> Option<String> {
        self.data.error.as_ref().and_then(|fields| fields.get(code))
    }

    /// All error fields, if this is an error result.
    pub fn error_fields(&self) -> Option<&ErrorFields> {
        self.data.error.as_ref()
    }

    /// OID of the row inserted by a single-row `INSERT` into a table with OIDs.
    pub fn last_oid(&self) -> Option<Oid> {
        self.data.tag.as_deref().and_then(tag_inserted_oid)
    }

    pub fn columns(&self) -> &[Column] {
        &self.data.columns
    }

    pub fn field_name(&self, index: usize) -> Result<&str> {
        Ok(&self.column(index)?.name)
    }

    /// Internal storage size of the column type; negative for variable-length types.
    pub fn field_size(&self, index: usize) -> Result<i16> {
        Ok(self.column(index)?.type_size)
    }

    pub fn field_modifier(&self, index: usize) -> Result<i32> {
        Ok(self.column(index)?.type_modifier)
    }

    pub fn field_type_oid(&self, index: usize) -> Result<Oid> {
        Ok(self.column(index)?.type_oid)
    }

    pub fn field_table_oid(&self, index: usize) -> Result<Oid> {
        Ok(self.column(index)?.table_oid)
    }

    pub fn field_format(&self, index: usize) -> Result<FormatCode> {
        Ok(self.column(index)?.format)
    }

    /// Index of the first column named `name`.
    pub fn field_num(&self, name: &str) -> Option<usize> {
        self.data.columns.iter().position(|c| c.name == name)
    }

    /// Type name of column `index`, resolved through the connection's type cache.
    ///
    /// Fails with [`Error::ConnectionClosed`] once the connection is closed.
    /// OIDs missing from the cache resolve to `"unknown"`.
    pub fn field_type(&self, index: usize) -> Result<String> {
        let oid = self.column(index)?.type_oid;
        self.catalog
            .type_name(oid)
            .map(|name| name.unwrap_or_else(|| "unknown".to_string()))
    }

    // === Random access ===

    pub fn get_value(&self, row: usize, col: usize) -> Result<Value<'_>> {
        self.column(col)?;
        Ok(self.checked_row(row)?.value(col))
    }

    pub fn get_is_null(&self, row: usize, col: usize) -> Result<bool> {
        self.get_value(row, col).map(|v| v.is_none())
    }

    /// Length in bytes of a value; 0 for NULL.
    pub fn get_length(&self, row: usize, col: usize) -> Result<usize> {
        self.get_value(row, col).map(|v| v.map_or(0, <[u8]>::len))
    }

    /// Release the rows and the connection back-reference.
    pub fn free(self) {
        drop(self);
    }
}
