// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! redb-backed [`Store`]: one embedded database file, one redb table per
//! logical table name. Reads against tables that were never written return
//! empty rather than erroring, so callers need no create-before-read dance.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, TableError, TableHandle};

use crate::error::{BridgeError, Result};
use crate::store::Store;

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(BridgeError::storage)?;
        Ok(Self { db })
    }
}

fn def(table: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(table)
}

impl Store for RedbStore {
    fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(BridgeError::storage)?;
        let t = match txn.open_table(def(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(BridgeError::storage(e)),
        };
        let value = t.get(key).map_err(BridgeError::storage)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.put_all(table, &[(key, value)])
    }

    fn put_all(&self, table: &str, entries: &[(&str, &[u8])]) -> Result<()> {
        let txn = self.db.begin_write().map_err(BridgeError::storage)?;
        {
            let mut t = txn.open_table(def(table)).map_err(BridgeError::storage)?;
            for (key, value) in entries {
                t.insert(*key, *value).map_err(BridgeError::storage)?;
            }
        }
        txn.commit().map_err(BridgeError::storage)
    }

    fn remove(&self, table: &str, key: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(BridgeError::storage)?;
        {
            let mut t = match txn.open_table(def(table)) {
                Ok(t) => t,
                Err(TableError::TableDoesNotExist(_)) => return Ok(()),
                Err(e) => return Err(BridgeError::storage(e)),
            };
            t.remove(key).map_err(BridgeError::storage)?;
        }
        txn.commit().map_err(BridgeError::storage)
    }

    fn scan(&self, table: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(BridgeError::storage)?;
        let t = match txn.open_table(def(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(BridgeError::storage(e)),
        };
        let mut entries = Vec::new();
        for item in t.iter().map_err(BridgeError::storage)? {
            let (key, value) = item.map_err(BridgeError::storage)?;
            entries.push((key.value().to_owned(), value.value().to_vec()));
        }
        Ok(entries)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(BridgeError::storage)?;
        match txn.delete_table(def(table)) {
            Ok(_) => {}
            Err(TableError::TableDoesNotExist(_)) => {}
            Err(e) => return Err(BridgeError::storage(e)),
        }
        txn.commit().map_err(BridgeError::storage)
    }

    fn tables(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read().map_err(BridgeError::storage)?;
        let names = txn
            .list_tables()
            .map_err(BridgeError::storage)?
            .map(|handle| handle.name().to_owned())
            .collect();
        Ok(names)
    }
}

#[cfg(test)]
#[path = "redb_store_tests.rs"]
mod tests;
