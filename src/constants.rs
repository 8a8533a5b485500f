//! Named integer constants visible at the crate boundary.
//!
//! The table is built once per process and never changes.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::Verbosity;
use crate::protocol::types::{ConnStatus, TransactionStatus};
use crate::result::{ExecStatus, FetchMode};

/// `lo_open` mode bit: open for writing.
pub const INV_WRITE: i32 = 0x0002_0000;
/// `lo_open` mode bit: open for reading.
pub const INV_READ: i32 = 0x0004_0000;

/// `lo_seek` whence: from the start of the object.
pub const SEEK_SET: i32 = 0;
/// `lo_seek` whence: from the current position.
pub const SEEK_CUR: i32 = 1;
/// `lo_seek` whence: from the end of the object.
pub const SEEK_END: i32 = 2;

static TABLE: LazyLock<HashMap<&'static str, i32>> = LazyLock::new(|| {
    let entries: [(&'static str, i32); 43] = [
        ("PGSQL_NUM", FetchMode::Num as i32),
        ("PGSQL_ASSOC", FetchMode::Assoc as i32),
        ("PGSQL_BOTH", FetchMode::Both as i32),
        ("PGSQL_CONNECTION_OK", ConnStatus::Ok as i32),
        ("PGSQL_CONNECTION_BAD", ConnStatus::Bad as i32),
        ("PGSQL_TRANSACTION_IDLE", TransactionStatus::Idle as i32),
        ("PGSQL_TRANSACTION_ACTIVE", TransactionStatus::Active as i32),
        ("PGSQL_TRANSACTION_INTRANS", TransactionStatus::InTransaction as i32),
        ("PGSQL_TRANSACTION_INERROR", TransactionStatus::Failed as i32),
        ("PGSQL_TRANSACTION_UNKNOWN", TransactionStatus::Unknown as i32),
        ("PGSQL_EMPTY_QUERY", ExecStatus::EmptyQuery as i32),
        ("PGSQL_COMMAND_OK", ExecStatus::CommandOk as i32),
        ("PGSQL_TUPLES_OK", ExecStatus::TuplesOk as i32),
        ("PGSQL_COPY_OUT", ExecStatus::CopyOut as i32),
        ("PGSQL_COPY_IN", ExecStatus::CopyIn as i32),
        ("PGSQL_BAD_RESPONSE", ExecStatus::BadResponse as i32),
        ("PGSQL_NONFATAL_ERROR", ExecStatus::NonfatalError as i32),
        ("PGSQL_FATAL_ERROR", ExecStatus::FatalError as i32),
        ("PGSQL_ERRORS_TERSE", Verbosity::Terse as i32),
        ("PGSQL_ERRORS_DEFAULT", Verbosity::Default as i32),
        ("PGSQL_ERRORS_VERBOSE", Verbosity::Verbose as i32),
        ("PGSQL_SEEK_SET", SEEK_SET),
        ("PGSQL_SEEK_CUR", SEEK_CUR),
        ("PGSQL_SEEK_END", SEEK_END),
        ("PGSQL_INV_READ", INV_READ),
        ("PGSQL_INV_WRITE", INV_WRITE),
        ("PGSQL_INV_READWRITE", INV_READ | INV_WRITE),
        // libpq spellings
        ("PQTRANS_IDLE", TransactionStatus::Idle as i32),
        ("PQTRANS_ACTIVE", TransactionStatus::Active as i32),
        ("PQTRANS_INTRANS", TransactionStatus::InTransaction as i32),
        ("PQTRANS_INERROR", TransactionStatus::Failed as i32),
        ("PQTRANS_UNKNOWN", TransactionStatus::Unknown as i32),
        ("PGRES_EMPTY_QUERY", ExecStatus::EmptyQuery as i32),
        ("PGRES_COMMAND_OK", ExecStatus::CommandOk as i32),
        ("PGRES_TUPLES_OK", ExecStatus::TuplesOk as i32),
        ("PGRES_COPY_OUT", ExecStatus::CopyOut as i32),
        ("PGRES_COPY_IN", ExecStatus::CopyIn as i32),
        ("PGRES_BAD_RESPONSE", ExecStatus::BadResponse as i32),
        ("PGRES_NONFATAL_ERROR", ExecStatus::NonfatalError as i32),
        ("PGRES_FATAL_ERROR", ExecStatus::FatalError as i32),
        ("PQERRORS_TERSE", Verbosity::Terse as i32),
        ("PQERRORS_DEFAULT", Verbosity::Default as i32),
        ("PQERRORS_VERBOSE", Verbosity::Verbose as i32),
    ];
    entries.into_iter().collect()
});

/// Look up a constant by name. The `PGSQL_` prefix is optional.
pub fn lookup(name: &str) -> Option<i32> {
    TABLE.get(name).copied().or_else(|| {
        let prefixed = format!("PGSQL_{}", name);
        TABLE.get(prefixed.as_str()).copied()
    })
}

/// Every constant, sorted by name.
pub fn all() -> Vec<(&'static str, i32)> {
    let mut entries: Vec<_> = TABLE.iter().map(|(&k, &v)| (k, v)).collect();
    entries.sort_unstable_by_key(|&(name, _)| name);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(lookup("PGSQL_NUM"), Some(1));
        assert_eq!(lookup("PGSQL_BOTH"), Some(3));
        assert_eq!(lookup("PGSQL_CONNECTION_BAD"), Some(1));
        assert_eq!(lookup("PGSQL_TRANSACTION_INERROR"), Some(3));
        assert_eq!(lookup("PGSQL_FATAL_ERROR"), Some(7));
        assert_eq!(lookup("PGSQL_ERRORS_VERBOSE"), Some(2));
        assert_eq!(lookup("PGSQL_INV_READWRITE"), Some(0x0006_0000));
    }

    #[test]
    fn libpq_names_resolve() {
        assert_eq!(lookup("CONNECTION_OK"), Some(0));
        assert_eq!(lookup("CONNECTION_BAD"), Some(1));
        assert_eq!(lookup("PQTRANS_IDLE"), Some(0));
        assert_eq!(lookup("PQTRANS_INERROR"), lookup("PGSQL_TRANSACTION_INERROR"));
        assert_eq!(lookup("PQTRANS_UNKNOWN"), Some(4));
        assert_eq!(lookup("PGRES_TUPLES_OK"), Some(2));
        assert_eq!(lookup("PGRES_FATAL_ERROR"), lookup("PGSQL_FATAL_ERROR"));
        assert_eq!(lookup("PQERRORS_TERSE"), Some(0));
        assert_eq!(lookup("PQERRORS_VERBOSE"), Some(2));
        assert_eq!(lookup("SEEK_END"), Some(2));
        assert_eq!(lookup("INV_WRITE"), Some(0x0002_0000));
    }

    #[test]
    fn status_names_match_their_enums() {
        for status in [ExecStatus::EmptyQuery, ExecStatus::TuplesOk, ExecStatus::FatalError] {
            assert_eq!(lookup(status.as_str()), Some(status as i32));
        }
    }

    #[test]
    fn prefix_is_optional() {
        assert_eq!(lookup("TUPLES_OK"), lookup("PGSQL_TUPLES_OK"));
        assert_eq!(lookup("NO_SUCH_THING"), None);
    }

    #[test]
    fn table_is_stable() {
        let first = all();
        assert_eq!(first, all());
        assert_eq!(first.len(), 43);
        assert!(first.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
