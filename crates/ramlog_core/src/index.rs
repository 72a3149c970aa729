//! Key index: `(table, key)` to the handle of the entry that currently
//! represents the key (an object, or a tombstone during recovery).

use crate::types::{LogEntryHandle, TableId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps keys to log entries.
pub trait ObjectIndex: Send + Sync {
    /// Handle currently indexed for the key.
    fn lookup(&self, table_id: TableId, key: &[u8]) -> Option<LogEntryHandle>;

    /// Indexes `handle` for the key and returns the previous handle.
    fn replace(&self, table_id: TableId, key: &[u8], handle: LogEntryHandle)
        -> Option<LogEntryHandle>;

    /// Removes the key and returns the handle it mapped to.
    fn remove(&self, table_id: TableId, key: &[u8]) -> Option<LogEntryHandle>;

    /// Replaces the handle only if the key still maps to `expected`.
    fn replace_if(
        &self,
        table_id: TableId,
        key: &[u8],
        expected: LogEntryHandle,
        handle: LogEntryHandle,
    ) -> bool;

    /// Removes every entry matching `predicate`; returns how many were removed.
    fn remove_where(&self, predicate: &mut dyn FnMut(TableId, &[u8], LogEntryHandle) -> bool)
        -> usize;

    /// Number of indexed keys.
    fn len(&self) -> usize;

    /// Returns true if no key is indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hash-map backed index.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    tables: RwLock<HashMap<TableId, HashMap<Vec<u8>, LogEntryHandle>>>,
}

impl MemoryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectIndex for MemoryIndex {
    fn lookup(&self, table_id: TableId, key: &[u8]) -> Option<LogEntryHandle> {
        self.tables.read().get(&table_id)?.get(key).copied()
    }

    fn replace(
        &self,
        table_id: TableId,
        key: &[u8],
        handle: LogEntryHandle,
    ) -> Option<LogEntryHandle> {
        self.tables
            .write()
            .entry(table_id)
            .or_default()
            .insert(key.to_vec(), handle)
    }

    fn remove(&self, table_id: TableId, key: &[u8]) -> Option<LogEntryHandle> {
        let mut tables = self.tables.write();
        let table = tables.get_mut(&table_id)?;
        let removed = table.remove(key);
        if table.is_empty() {
            tables.remove(&table_id);
        }
        removed
    }

    fn replace_if(
        &self,
        table_id: TableId,
        key: &[u8],
        expected: LogEntryHandle,
        handle: LogEntryHandle,
    ) -> bool {
        let mut tables = self.tables.write();
        match tables.get_mut(&table_id).and_then(|t| t.get_mut(key)) {
            Some(current) if *current == expected => {
                *current = handle;
                true
            }
            _ => false,
        }
    }

    fn remove_where(
        &self,
        predicate: &mut dyn FnMut(TableId, &[u8], LogEntryHandle) -> bool,
    ) -> usize {
        let mut tables = self.tables.write();
        let mut removed = 0;
        for (&table_id, table) in tables.iter_mut() {
            table.retain(|key, handle| {
                let drop = predicate(table_id, key, *handle);
                if drop {
                    removed += 1;
                }
                !drop
            });
        }
        tables.retain(|_, table| !table.is_empty());
        removed
    }

    fn len(&self) -> usize {
        self.tables.read().values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogEntryType;

    fn handle(segment: u64, offset: u32) -> LogEntryHandle {
        LogEntryHandle::new(segment, offset, LogEntryType::Object)
    }

    #[test]
    fn replace_and_lookup() {
        let index = MemoryIndex::new();
        let table = TableId::new(1);
        assert!(index.is_empty());
        assert_eq!(index.replace(table, b"a", handle(1, 10)), None);
        assert_eq!(index.replace(table, b"a", handle(1, 20)), Some(handle(1, 10)));
        assert_eq!(index.lookup(table, b"a"), Some(handle(1, 20)));
        assert_eq!(index.lookup(TableId::new(2), b"a"), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn replace_if_checks_current_handle() {
        let index = MemoryIndex::new();
        let table = TableId::new(1);
        index.replace(table, b"k", handle(1, 10));
        assert!(!index.replace_if(table, b"k", handle(9, 9), handle(2, 0)));
        assert!(index.replace_if(table, b"k", handle(1, 10), handle(2, 0)));
        assert_eq!(index.lookup(table, b"k"), Some(handle(2, 0)));
        assert!(!index.replace_if(table, b"missing", handle(1, 10), handle(2, 0)));
    }

    #[test]
    fn remove_where_filters_by_type() {
        let index = MemoryIndex::new();
        let table = TableId::new(4);
        index.replace(table, b"obj", handle(1, 1));
        index.replace(
            table,
            b"tomb",
            LogEntryHandle::new(1, 2, LogEntryType::ObjectTombstone),
        );
        let removed = index.remove_where(&mut |_, _, h| {
            h.entry_type() == LogEntryType::ObjectTombstone
        });
        assert_eq!(removed, 1);
        assert!(index.lookup(table, b"tomb").is_none());
        assert!(index.lookup(table, b"obj").is_some());
    }

    #[test]
    fn remove_key() {
        let index = MemoryIndex::new();
        let table = TableId::new(1);
        index.replace(table, b"k", handle(1, 1));
        assert_eq!(index.remove(table, b"k"), Some(handle(1, 1)));
        assert_eq!(index.remove(table, b"k"), None);
        assert!(index.is_empty());
    }
}
