/// SQLite-backed provider.
///
/// GUIDs and timestamps are stored as text; booleans as integers. The
/// concurrency token is an integer column bumped by every write.

use crate::error::{Error, Result};
use crate::sync::dialect::SqlDialect;
use crate::sync::mapping::SchemaMapping;
use crate::sync::provider::{RowVersion, SqlProvider, SqlRecord, SqlValues};
use crate::value::Value;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

const DIALECT: SqlDialect = SqlDialect::Sqlite;

pub struct SqliteProvider {
    conn: Connection,
}

impl SqliteProvider {
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteProvider { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Creates the table `mapping` describes.
    pub fn create_table(&self, mapping: &SchemaMapping) -> Result<()> {
        let sql = DIALECT.create_table(mapping)?;
        log::debug!("{}", sql);
        self.conn.execute_batch(&sql)?;
        Ok(())
    }
}

fn to_sql(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Value::Int32(v) => SqlValue::Integer(i64::from(*v)),
        Value::Int64(v) => SqlValue::Integer(*v),
        Value::Float64(v) => SqlValue::Real(*v),
        Value::String(v) => SqlValue::Text(v.clone()),
        Value::Guid(_) | Value::DateTime(_) => SqlValue::Text(value.to_text().unwrap_or_default()),
        Value::Row(_) => return Err(Error::Provider("row references must be resolved to keys".to_string())),
    })
}

fn from_sql(value: SqlValue) -> Result<Value> {
    Ok(match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Int64(v),
        SqlValue::Real(v) => Value::Float64(v),
        SqlValue::Text(v) => Value::String(v),
        SqlValue::Blob(_) => return Err(Error::Provider("blob columns are not supported".to_string())),
    })
}

fn params(values: impl IntoIterator<Item = Value>) -> Result<Vec<SqlValue>> {
    values.into_iter().map(|v| to_sql(&v)).collect()
}

impl SqlProvider for SqliteProvider {
    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn select_all(&mut self, mapping: &SchemaMapping) -> Result<Vec<SqlRecord>> {
        let sql = DIALECT.select_all(mapping);
        log::debug!("{}", sql);
        let names: Vec<String> = mapping.columns().iter().map(|m| m.sql_name().to_string()).collect();
        let mut statement = self.conn.prepare(&sql)?;
        let mut rows = statement.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = HashMap::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                values.insert(name.clone(), from_sql(row.get::<_, SqlValue>(i)?)?);
            }
            let version: Option<i64> = row.get(names.len())?;
            records.push(SqlRecord {
                values,
                version: version.map(RowVersion),
            });
        }
        Ok(records)
    }

    fn insert(&mut self, mapping: &SchemaMapping, values: &SqlValues) -> Result<RowVersion> {
        let names: Vec<String> = values.iter().map(|(n, _)| n.clone()).collect();
        let sql = DIALECT.insert(mapping, &names);
        log::debug!("{}", sql);
        let params = params(values.iter().map(|(_, v)| v.clone()))?;
        let version: i64 = self.conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(RowVersion(version))
    }

    fn update(
        &mut self,
        mapping: &SchemaMapping,
        key: &Value,
        expected: Option<RowVersion>,
        values: &SqlValues,
    ) -> Result<Option<RowVersion>> {
        let names: Vec<String> = values.iter().map(|(n, _)| n.clone()).collect();
        let sql = DIALECT.update(mapping, &names, expected.is_some());
        log::debug!("{}", sql);
        let mut all: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        all.push(key.clone());
        all.extend(expected.map(|v| Value::Int64(v.0)));
        let version: Option<i64> = self
            .conn
            .query_row(&sql, params_from_iter(params(all)?), |row| row.get(0))
            .optional()?;
        Ok(version.map(RowVersion))
    }

    fn delete(&mut self, mapping: &SchemaMapping, key: &Value, expected: Option<RowVersion>) -> Result<bool> {
        let sql = DIALECT.delete(mapping, expected.is_some());
        log::debug!("{}", sql);
        let mut all = vec![key.clone()];
        all.extend(expected.map(|v| Value::Int64(v.0)));
        let affected = self.conn.execute(&sql, params_from_iter(params(all)?))?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataContext;
    use crate::schema::TableSchema;
    use crate::sync::context::DataSyncContext;
    use crate::value::ColumnType;
    use chrono::NaiveDate;

    #[test]
    fn test_round_trip_through_sqlite() {
        let schema = TableSchema::new("Events");
        let id = schema.add_value_column("Id", ColumnType::Guid, Value::Null).unwrap();
        schema.set_primary_key(Some(&id)).unwrap();
        schema.add_value_column("Title", ColumnType::String, "").unwrap();
        schema.add_value_column("Public", ColumnType::Bool, false).unwrap();
        schema.add_value_column("At", ColumnType::DateTime, Value::Null).unwrap();

        let context = DataContext::new();
        let table = context.create_table(&schema).unwrap();
        let mut sync = DataSyncContext::new(&context);
        let mapping = SchemaMapping::new(&schema).unwrap();
        let mut provider = SqliteProvider::open_in_memory().unwrap();
        provider.create_table(&mapping).unwrap();
        sync.add_mapping(mapping).unwrap();

        let at = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(9, 30, 0).unwrap();
        let launch = table
            .add_row_with([("Title", Value::from("Launch")), ("Public", Value::from(true)), ("At", Value::from(at))])
            .unwrap();
        sync.write_data(&mut provider).unwrap();
        let synchronizer = sync.synchronizer(&table).unwrap();
        assert_eq!(synchronizer.version(&launch), Some(RowVersion(1)));

        launch.set("Title", "Launch day").unwrap();
        sync.write_data(&mut provider).unwrap();
        assert_eq!(synchronizer.version(&launch), Some(RowVersion(2)));

        let other = DataContext::new();
        let copy = other.create_table(&schema).unwrap();
        let mut reader = DataSyncContext::new(&other);
        reader.add_all_tables().unwrap();
        reader.read_data(&mut provider).unwrap();
        let row = copy.row(0).unwrap();
        assert_eq!(row.get("Id").unwrap(), launch.get("Id").unwrap());
        assert_eq!(row.get("Title").unwrap(), Value::from("Launch day"));
        assert_eq!(row.get("Public").unwrap(), Value::Bool(true));
        assert_eq!(row.get("At").unwrap(), Value::from(at));

        // the reader now holds version 2; a stale writer loses
        provider
            .connection()
            .execute_batch("UPDATE \"Events\" SET \"RowVersion\" = \"RowVersion\" + 1")
            .unwrap();
        row.set("Title", "Mine").unwrap();
        assert!(reader.write_data(&mut provider).unwrap_err().is_concurrency_conflict());

        launch.remove().unwrap();
        assert!(sync.write_data(&mut provider).unwrap_err().is_concurrency_conflict());
    }
}
