// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`Store`] backend for tests and ephemeral runs.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::store::Store;

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tables.read().get(table).and_then(|t| t.get(key).cloned()))
    }

    fn put(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.tables
            .write()
            .entry(table.to_owned())
            .or_default()
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn put_all(&self, table: &str, entries: &[(&str, &[u8])]) -> Result<()> {
        let mut tables = self.tables.write();
        let t = tables.entry(table.to_owned()).or_default();
        for (key, value) in entries {
            t.insert((*key).to_owned(), value.to_vec());
        }
        Ok(())
    }

    fn remove(&self, table: &str, key: &str) -> Result<()> {
        if let Some(t) = self.tables.write().get_mut(table) {
            t.remove(key);
        }
        Ok(())
    }

    fn scan(&self, table: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.tables.write().remove(table);
        Ok(())
    }

    fn tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }
}
