//! Per-connection OID name caches.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::protocol::types::Oid;
use crate::result::QueryResult;

/// OID → name map, filled on demand and never evicted.
#[derive(Debug, Clone, Default)]
pub struct OidCache {
    names: HashMap<Oid, String>,
}

impl OidCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, oid: Oid) -> Option<&str> {
        self.names.get(&oid).map(String::as_str)
    }

    pub fn insert(&mut self, oid: Oid, name: String) {
        self.names.insert(oid, name);
    }

    /// Forget `oid`; returns the name it had.
    pub fn remove(&mut self, oid: Oid) -> Option<String> {
        self.names.remove(&oid)
    }

    /// Add or overwrite entries; existing entries not mentioned are kept.
    pub fn merge(&mut self, entries: impl IntoIterator<Item = (Oid, String)>) {
        self.names.extend(entries);
    }

    /// Merge the `(oid, name)` rows of a catalog query.
    ///
    /// Rows whose first column is not a valid OID or whose name is NULL are skipped.
    pub fn merge_result(&mut self, result: &QueryResult) -> usize {
        let mut merged = 0;
        for row in 0..result.num_rows() {
            let (Ok(Some(oid)), Ok(Some(name))) =
                (result.get_value(row, 0), result.get_value(row, 1))
            else {
                continue;
            };
            let Some(oid) = std::str::from_utf8(oid)
                .ok()
                .and_then(|s| s.parse::<Oid>().ok())
            else {
                continue;
            };
            self.insert(oid, String::from_utf8_lossy(name).into_owned());
            merged += 1;
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}

/// Connection state shared with every live [`QueryResult`].
#[derive(Debug, Default)]
pub struct SharedCatalog {
    closed: Cell<bool>,
    types: RefCell<OidCache>,
}

impl SharedCatalog {
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Mark the owning connection closed and drop the cached names.
    pub fn close(&self) {
        self.closed.set(true);
        self.types.borrow_mut().clear();
    }

    pub fn type_name(&self, oid: Oid) -> Result<Option<String>> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        Ok(self.types.borrow().get(oid).map(str::to_string))
    }

    pub fn merge_types(&self, entries: impl IntoIterator<Item = (Oid, String)>) {
        self.types.borrow_mut().merge(entries);
    }

    pub fn remove_type(&self, oid: Oid) -> Option<String> {
        self.types.borrow_mut().remove(oid)
    }

    pub fn merge_type_result(&self, result: &QueryResult) -> usize {
        self.types.borrow_mut().merge_result(result)
    }

    pub fn type_count(&self) -> usize {
        self.types.borrow().len()
    }
}
