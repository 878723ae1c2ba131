/// Binding between a schema and an external SQL table.
///
/// Calculated columns never map. The mapping follows schema changes: added
/// columns are mapped under their own name, removed columns are dropped, and
/// renamed columns keep their SQL name.

use crate::column::Column;
use crate::error::{Error, Result, ValidationKind};
use crate::events::{SchemaEvent, SubscriptionId};
use crate::schema::TableSchema;
use crate::value::{ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

fn default_version_column() -> String {
    "RowVersion".to_string()
}

/// Declarative mapping settings, typically loaded from JSON:
///
/// ```
/// use singularity::sync::MappingConfig;
///
/// let config = MappingConfig::from_json(r#"{
///     "table": "tblPeople",
///     "schema": "dbo",
///     "columns": { "FirstName": "first_name" },
///     "exclude": ["Notes"]
/// }"#).unwrap();
/// assert_eq!(config.version_column, "RowVersion");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// SQL table name.
    pub table: String,
    /// SQL schema (e.g. `dbo`), if any.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_version_column")]
    pub version_column: String,
    /// Column name to SQL column name, for columns whose names differ.
    #[serde(default)]
    pub columns: HashMap<String, String>,
    /// Columns that stay in memory only.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl MappingConfig {
    pub fn new(table: &str) -> Self {
        MappingConfig {
            table: table.to_string(),
            schema: None,
            version_column: default_version_column(),
            columns: HashMap::new(),
            exclude: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One mapped column.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    column: Column,
    sql_name: String,
}

impl ColumnMapping {
    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn sql_name(&self) -> &str {
        &self.sql_name
    }

    /// The SQL type of the column; foreign keys take their parent's key type.
    pub fn sql_type(&self) -> Result<ColumnType> {
        if let Some(column_type) = self.column.column_type() {
            return Ok(column_type);
        }
        let foreign = self
            .column
            .foreign_schema()
            .ok_or_else(|| Error::invalid(format!("'{}' refers to a removed schema", self.column.name())))?;
        foreign
            .primary_key()
            .and_then(|key| key.column_type())
            .ok_or_else(|| Error::invalid(format!("schema '{}' has no primary key", foreign.name())))
    }

    /// Converts a value read from SQL to the column's in-memory type. Foreign
    /// keys convert to the parent's key type; resolving the row is left to the
    /// caller.
    pub fn from_sql(&self, value: Value) -> Result<Value> {
        let target = self.sql_type()?;
        convert(value, target).map_err(|message| {
            Error::validation(&self.column.name(), ValidationKind::TypeMismatch, message)
        })
    }
}

fn convert(value: Value, target: ColumnType) -> std::result::Result<Value, String> {
    if value.is_null() || value.column_type() == Some(target) {
        return Ok(value);
    }
    match (target, &value) {
        (ColumnType::Bool, Value::Int32(_) | Value::Int64(_)) => Ok(Value::Bool(value.as_i64() != Some(0))),
        (_, Value::String(text)) => Value::parse(target, text).map_err(|e| e.to_string()),
        _ => value
            .clone()
            .coerce(target)
            .ok_or_else(|| format!("cannot read {:?} as {:?}", value, target)),
    }
}

struct MappingInner {
    schema: TableSchema,
    sql_table: String,
    sql_schema: Option<String>,
    version_column: String,
    excluded: HashSet<String>,
    columns: Rc<RefCell<Vec<ColumnMapping>>>,
    subscription: Cell<Option<SubscriptionId>>,
}

/// Maps a schema's columns to an SQL table.
#[derive(Clone)]
pub struct SchemaMapping(Rc<MappingInner>);

impl SchemaMapping {
    /// Maps every non-calculated column under its own name to a table named
    /// after the schema.
    pub fn new(schema: &TableSchema) -> Result<Self> {
        Self::from_config(schema, &MappingConfig::new(&schema.name()))
    }

    pub fn from_config(schema: &TableSchema, config: &MappingConfig) -> Result<Self> {
        let primary_key = schema.primary_key().ok_or_else(|| {
            Error::invalid(format!("schema '{}' needs a primary key to be mapped", schema.name()))
        })?;
        let excluded: HashSet<String> = config.exclude.iter().cloned().collect();
        if excluded.contains(&primary_key.name()) {
            return Err(Error::invalid(format!(
                "primary key '{}' cannot be excluded from the mapping",
                primary_key.name()
            )));
        }
        for name in config.columns.keys().chain(&config.exclude) {
            if schema.column(name).is_none() {
                return Err(Error::invalid(format!(
                    "mapping refers to unknown column '{}.{}'",
                    schema.name(),
                    name
                )));
            }
        }

        let columns: Vec<ColumnMapping> = schema
            .columns()
            .into_iter()
            .filter(|c| !c.is_calculated() && !excluded.contains(&c.name()))
            .map(|column| ColumnMapping {
                sql_name: config.columns.get(&column.name()).cloned().unwrap_or_else(|| column.name()),
                column,
            })
            .collect();
        let columns = Rc::new(RefCell::new(columns));

        let tracked = Rc::downgrade(&columns);
        let skip = excluded.clone();
        let subscription = schema.subscribe(move |event| {
            let Some(columns) = tracked.upgrade() else { return };
            match event {
                SchemaEvent::ColumnAdded(column) if !column.is_calculated() && !skip.contains(&column.name()) => {
                    columns.borrow_mut().push(ColumnMapping {
                        column: column.clone(),
                        sql_name: column.name(),
                    });
                }
                SchemaEvent::ColumnRemoved(column) => columns.borrow_mut().retain(|m| m.column != *column),
                _ => {}
            }
        });

        log::debug!("mapped schema '{}' to SQL table '{}'", schema.name(), config.table);
        Ok(SchemaMapping(Rc::new(MappingInner {
            schema: schema.clone(),
            sql_table: config.table.clone(),
            sql_schema: config.schema.clone(),
            version_column: config.version_column.clone(),
            excluded,
            columns,
            subscription: Cell::new(Some(subscription)),
        })))
    }

    pub fn schema(&self) -> &TableSchema {
        &self.0.schema
    }

    pub fn sql_table(&self) -> &str {
        &self.0.sql_table
    }

    pub fn sql_schema(&self) -> Option<&str> {
        self.0.sql_schema.as_deref()
    }

    pub fn version_column(&self) -> &str {
        &self.0.version_column
    }

    pub fn columns(&self) -> Vec<ColumnMapping> {
        self.0.columns.borrow().clone()
    }

    pub fn column(&self, column: &Column) -> Option<ColumnMapping> {
        self.0.columns.borrow().iter().find(|m| m.column == *column).cloned()
    }

    pub fn is_mapped(&self, column: &Column) -> bool {
        self.0.columns.borrow().iter().any(|m| m.column == *column)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.0.excluded.contains(name)
    }

    pub fn primary_key(&self) -> Result<ColumnMapping> {
        self.0
            .schema
            .primary_key()
            .and_then(|key| self.column(&key))
            .ok_or_else(|| Error::invalid(format!("schema '{}' has no mapped primary key", self.0.schema.name())))
    }
}

impl Drop for MappingInner {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.schema.unsubscribe(id);
        }
    }
}

impl fmt::Debug for SchemaMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaMapping")
            .field("schema", &self.0.schema.name())
            .field("sql_table", &self.0.sql_table)
            .field("columns", &self.0.columns.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> TableSchema {
        let schema = TableSchema::new("People");
        let id = schema.add_value_column("Id", ColumnType::Int32, 0).unwrap();
        schema.set_primary_key(Some(&id)).unwrap();
        schema.add_value_column("FirstName", ColumnType::String, "").unwrap();
        schema.add_value_column("Notes", ColumnType::String, Value::Null).unwrap();
        schema.add_calculated_column("Greeting", ColumnType::String, "'Hi ' + FirstName").unwrap();
        schema
    }

    fn sql_names(mapping: &SchemaMapping) -> Vec<String> {
        mapping.columns().iter().map(|m| m.sql_name().to_string()).collect()
    }

    #[test]
    fn test_default_mapping_skips_calculated() {
        let mapping = SchemaMapping::new(&people()).unwrap();
        assert_eq!(mapping.sql_table(), "People");
        assert_eq!(sql_names(&mapping), ["Id", "FirstName", "Notes"]);
        assert_eq!(mapping.primary_key().unwrap().sql_name(), "Id");
    }

    #[test]
    fn test_config() {
        let schema = people();
        let config = MappingConfig::from_json(
            r#"{"table": "tblPeople", "schema": "dbo", "columns": {"FirstName": "first_name"}, "exclude": ["Notes"]}"#,
        )
        .unwrap();
        let mapping = SchemaMapping::from_config(&schema, &config).unwrap();
        assert_eq!(mapping.sql_schema(), Some("dbo"));
        assert_eq!(sql_names(&mapping), ["Id", "first_name"]);

        let mut bad = config.clone();
        bad.exclude.push("Id".to_string());
        assert!(SchemaMapping::from_config(&schema, &bad).is_err());
        bad.exclude = vec!["Missing".to_string()];
        assert!(SchemaMapping::from_config(&schema, &bad).is_err());
        assert!(MappingConfig::from_json("{").is_err());
        assert_eq!(MappingConfig::from_json(&config.to_json().unwrap()).unwrap(), config);
    }

    #[test]
    fn test_mapping_follows_schema() {
        let schema = people();
        let mapping = SchemaMapping::new(&schema).unwrap();
        let email = schema.add_value_column("Email", ColumnType::String, Value::Null).unwrap();
        assert!(mapping.is_mapped(&email));
        schema.column("FirstName").unwrap().set_name("GivenName").unwrap();
        assert_eq!(sql_names(&mapping), ["Id", "FirstName", "Notes", "Email"]);
        schema.remove_column(&email).unwrap();
        assert!(!mapping.is_mapped(&email));
        assert!(SchemaMapping::new(&TableSchema::new("NoKey")).is_err());
    }

    #[test]
    fn test_from_sql() {
        let schema = TableSchema::new("T");
        let id = schema.add_value_column("Id", ColumnType::Guid, Value::Null).unwrap();
        schema.set_primary_key(Some(&id)).unwrap();
        schema.add_value_column("Flag", ColumnType::Bool, false).unwrap();
        schema.add_value_column("Small", ColumnType::Int32, 0).unwrap();
        let mapping = SchemaMapping::new(&schema).unwrap();
        let by_name = |name: &str| mapping.column(&schema.column(name).unwrap()).unwrap();

        assert_eq!(by_name("Flag").from_sql(Value::Int64(1)).unwrap(), Value::Bool(true));
        assert_eq!(by_name("Small").from_sql(Value::Int64(7)).unwrap(), Value::Int32(7));
        assert!(by_name("Small").from_sql(Value::Int64(i64::MAX)).is_err());
        let guid = uuid::Uuid::new_v4();
        assert_eq!(
            by_name("Id").from_sql(Value::from(guid.to_string())).unwrap(),
            Value::Guid(guid)
        );
        assert_eq!(by_name("Id").from_sql(Value::Null).unwrap(), Value::Null);
    }
}
