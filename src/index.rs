/// Per-table value index: value -> rows currently holding it.
///
/// Null is an ordinary key, so nullable columns index like any other.

use crate::row::Row;
use crate::value::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub(crate) struct ValueIndex {
    entries: HashMap<Value, HashSet<Row>>,
}

impl ValueIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, value: Value, row: &Row) {
        self.entries.entry(value).or_default().insert(row.clone());
    }

    pub(crate) fn remove(&mut self, value: &Value, row: &Row) {
        if let Some(rows) = self.entries.get_mut(value) {
            rows.remove(row);
            if rows.is_empty() {
                self.entries.remove(value);
            }
        }
    }

    /// Swaps a row from one key to another: remove first, then insert.
    pub(crate) fn replace(&mut self, old: &Value, new: Value, row: &Row) {
        self.remove(old, row);
        self.insert(new, row);
    }

    pub(crate) fn rows(&self, value: &Value) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .entries
            .get(value)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(Row::id);
        rows
    }

    /// True if some row other than `row` holds `value`.
    pub(crate) fn conflicts(&self, value: &Value, row: &Row) -> bool {
        self.entries
            .get(value)
            .map_or(false, |rows| rows.iter().any(|other| other != row))
    }

    #[cfg(test)]
    pub(crate) fn key_count(&self) -> usize {
        self.entries.len()
    }
}
