/// The seam between the synchronizer and a concrete SQL database.

use crate::error::{Error, Result};
use crate::sync::dialect::SqlDialect;
use crate::sync::mapping::SchemaMapping;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Concurrency token assigned by the database on every insert and update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowVersion(pub i64);

/// One row read from SQL, keyed by SQL column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRecord {
    pub values: HashMap<String, Value>,
    pub version: Option<RowVersion>,
}

impl SqlRecord {
    pub fn get(&self, sql_name: &str) -> Value {
        self.values.get(sql_name).cloned().unwrap_or(Value::Null)
    }
}

/// Column values for a write, in mapping order, keyed by SQL column name.
/// Foreign keys are already replaced by the parent's key value.
pub type SqlValues = Vec<(String, Value)>;

/// Issues the four statements the synchronizer needs, inside a transaction
/// the synchronizer opens and closes.
pub trait SqlProvider {
    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn select_all(&mut self, mapping: &SchemaMapping) -> Result<Vec<SqlRecord>>;

    /// Returns the version assigned to the new row.
    fn insert(&mut self, mapping: &SchemaMapping, values: &SqlValues) -> Result<RowVersion>;

    /// Updates the row with primary key `key`. With `expected` set, only a
    /// row still at that version matches. `None` means no row matched.
    fn update(
        &mut self,
        mapping: &SchemaMapping,
        key: &Value,
        expected: Option<RowVersion>,
        values: &SqlValues,
    ) -> Result<Option<RowVersion>>;

    /// `false` means no row matched.
    fn delete(&mut self, mapping: &SchemaMapping, key: &Value, expected: Option<RowVersion>) -> Result<bool>;
}

type StoredTable = Vec<(Value, SqlRecord)>;

/// An in-memory database. Every statement is rendered with a dialect and
/// logged, which makes it useful for inspecting what a write would send.
#[derive(Debug)]
pub struct MemoryProvider {
    dialect: SqlDialect,
    tables: HashMap<String, StoredTable>,
    snapshot: Option<HashMap<String, StoredTable>>,
    statements: Vec<String>,
    next_version: i64,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(SqlDialect::SqlServer)
    }
}

impl MemoryProvider {
    pub fn new(dialect: SqlDialect) -> Self {
        MemoryProvider {
            dialect,
            tables: HashMap::new(),
            snapshot: None,
            statements: Vec::new(),
            next_version: 1,
        }
    }

    /// Statements executed so far, oldest first. Rolled back statements stay.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn clear_statements(&mut self) {
        self.statements.clear();
    }

    pub fn rows(&self, sql_table: &str) -> Vec<SqlRecord> {
        self.tables
            .get(sql_table)
            .map(|rows| rows.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Stores a row directly, as another client would.
    pub fn seed(&mut self, sql_table: &str, key: Value, values: SqlValues) -> RowVersion {
        let version = self.bump();
        let record = SqlRecord {
            values: values.into_iter().collect(),
            version: Some(version),
        };
        let rows = self.tables.entry(sql_table.to_string()).or_default();
        rows.retain(|(k, _)| *k != key);
        rows.push((key, record));
        version
    }

    /// Bumps a row's version as a concurrent writer would.
    pub fn touch(&mut self, sql_table: &str, key: &Value) -> Option<RowVersion> {
        let version = self.bump();
        let record = self.find_mut(sql_table, key)?;
        record.version = Some(version);
        Some(version)
    }

    fn bump(&mut self) -> RowVersion {
        let version = RowVersion(self.next_version);
        self.next_version += 1;
        version
    }

    fn find_mut(&mut self, sql_table: &str, key: &Value) -> Option<&mut SqlRecord> {
        self.tables
            .get_mut(sql_table)?
            .iter_mut()
            .find(|(k, _)| *k == *key)
            .map(|(_, r)| r)
    }

    fn log(&mut self, sql: String, params: &[Value]) {
        let rendered: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        self.statements.push(format!("{} -- [{}]", sql, rendered.join(", ")));
    }

    fn matches(record: &SqlRecord, expected: Option<RowVersion>) -> bool {
        expected.map_or(true, |v| record.version == Some(v))
    }
}

impl SqlProvider for MemoryProvider {
    fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::Provider("a transaction is already open".to_string()));
        }
        self.snapshot = Some(self.tables.clone());
        self.statements.push("BEGIN TRANSACTION".to_string());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot
            .take()
            .ok_or_else(|| Error::Provider("no open transaction".to_string()))?;
        self.statements.push("COMMIT".to_string());
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.tables = self
            .snapshot
            .take()
            .ok_or_else(|| Error::Provider("no open transaction".to_string()))?;
        self.statements.push("ROLLBACK".to_string());
        Ok(())
    }

    fn select_all(&mut self, mapping: &SchemaMapping) -> Result<Vec<SqlRecord>> {
        let sql = self.dialect.select_all(mapping);
        self.log(sql, &[]);
        Ok(self.rows(mapping.sql_table()))
    }

    fn insert(&mut self, mapping: &SchemaMapping, values: &SqlValues) -> Result<RowVersion> {
        let names: Vec<String> = values.iter().map(|(n, _)| n.clone()).collect();
        let params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        let sql = self.dialect.insert(mapping, &names);
        self.log(sql, &params);

        let key_name = mapping.primary_key()?.sql_name().to_string();
        let key = values
            .iter()
            .find(|(n, _)| *n == key_name)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null);
        if self.find_mut(mapping.sql_table(), &key).is_some() {
            return Err(Error::Provider(format!(
                "duplicate key {} in '{}'",
                key,
                mapping.sql_table()
            )));
        }
        Ok(self.seed(mapping.sql_table(), key, values.clone()))
    }

    fn update(
        &mut self,
        mapping: &SchemaMapping,
        key: &Value,
        expected: Option<RowVersion>,
        values: &SqlValues,
    ) -> Result<Option<RowVersion>> {
        let names: Vec<String> = values.iter().map(|(n, _)| n.clone()).collect();
        let mut params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        params.push(key.clone());
        if let Some(version) = expected {
            params.push(Value::Int64(version.0));
        }
        let sql = self.dialect.update(mapping, &names, expected.is_some());
        self.log(sql, &params);

        let version = self.bump();
        let Some(record) = self.find_mut(mapping.sql_table(), key) else {
            return Ok(None);
        };
        if !Self::matches(record, expected) {
            return Ok(None);
        }
        for (name, value) in values {
            record.values.insert(name.clone(), value.clone());
        }
        record.version = Some(version);
        Ok(Some(version))
    }

    fn delete(&mut self, mapping: &SchemaMapping, key: &Value, expected: Option<RowVersion>) -> Result<bool> {
        let mut params = vec![key.clone()];
        if let Some(version) = expected {
            params.push(Value::Int64(version.0));
        }
        let sql = self.dialect.delete(mapping, expected.is_some());
        self.log(sql, &params);

        let Some(rows) = self.tables.get_mut(mapping.sql_table()) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|(k, record)| !(*k == *key && Self::matches(record, expected)));
        Ok(rows.len() != before)
    }
}
