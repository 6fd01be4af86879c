//! In-memory store used by tests and lightweight tooling.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::{Column, KeyValueStore, StoreError, WriteBatch, WriteOp};

type ColumnMap = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
pub struct MemoryStore {
    columns: RwLock<HashMap<Column, ColumnMap>>,
    /// When set, the next write_batch fails without applying anything.
    fail_next_batch: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `write_batch` call fail, for flush-failure tests.
    pub fn fail_next_batch(&self) {
        *self.fail_next_batch.write().expect("lock poisoned") = true;
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let columns = self.columns.read().expect("lock poisoned");
        Ok(columns
            .get(&column)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut columns = self.columns.write().expect("lock poisoned");
        columns
            .entry(column)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let mut columns = self.columns.write().expect("lock poisoned");
        if let Some(entries) = columns.get_mut(&column) {
            entries.remove(key);
        }
        Ok(())
    }

    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let columns = self.columns.read().expect("lock poisoned");
        let Some(entries) = columns.get(&column) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        {
            let mut fail = self.fail_next_batch.write().expect("lock poisoned");
            if *fail {
                *fail = false;
                return Err(StoreError::Backend("injected batch failure".into()));
            }
        }
        let mut columns = self.columns.write().expect("lock poisoned");
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    columns
                        .entry(*column)
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                WriteOp::Delete { column, key } => {
                    if let Some(entries) = columns.get_mut(column) {
                        entries.remove(key);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"key".to_vec(), b"one".to_vec());
        batch.put(Column::Meta, b"key".to_vec(), b"two".to_vec());
        batch.delete(Column::Meta, b"gone".to_vec());
        store.write_batch(batch).expect("commit");
        assert_eq!(
            store.get(Column::Meta, b"key").expect("get"),
            Some(b"two".to_vec())
        );
    }

    #[test]
    fn scan_prefix_respects_bounds() {
        let store = MemoryStore::new();
        store.put(Column::Coins, b"aa1", b"x").expect("put");
        store.put(Column::Coins, b"aa2", b"y").expect("put");
        store.put(Column::Coins, b"ab1", b"z").expect("put");
        let hits = store.scan_prefix(Column::Coins, b"aa").expect("scan");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(key, _)| key.starts_with(b"aa")));
    }

    #[test]
    fn injected_failure_leaves_store_untouched() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"key", b"old").expect("put");
        store.fail_next_batch();
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"key".to_vec(), b"new".to_vec());
        assert!(store.write_batch(batch).is_err());
        assert_eq!(
            store.get(Column::Meta, b"key").expect("get"),
            Some(b"old".to_vec())
        );
    }
}
