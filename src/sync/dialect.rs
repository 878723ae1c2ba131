/// SQL text for the statements a synchronizer issues.
///
/// SQL Server reads the new version back with `OUTPUT INSERTED.[RowVersion]`
/// from a `rowversion` column; SQLite keeps an integer counter that every
/// write bumps, read back with `RETURNING`.

use crate::error::Result;
use crate::sync::mapping::SchemaMapping;
use crate::value::ColumnType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlDialect {
    SqlServer,
    Sqlite,
}

impl SqlDialect {
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            SqlDialect::SqlServer => format!("[{}]", identifier.replace(']', "]]")),
            SqlDialect::Sqlite => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }

    /// Marker for the zero-based parameter `index`.
    pub fn param(&self, index: usize) -> String {
        match self {
            SqlDialect::SqlServer => format!("@p{}", index),
            SqlDialect::Sqlite => format!("?{}", index + 1),
        }
    }

    pub fn table_name(&self, mapping: &SchemaMapping) -> String {
        match mapping.sql_schema() {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(mapping.sql_table())),
            None => self.quote(mapping.sql_table()),
        }
    }

    fn version(&self, mapping: &SchemaMapping) -> String {
        self.quote(mapping.version_column())
    }

    fn returning(&self, mapping: &SchemaMapping) -> String {
        match self {
            SqlDialect::SqlServer => format!(" OUTPUT INSERTED.{}", self.version(mapping)),
            SqlDialect::Sqlite => format!(" RETURNING {}", self.version(mapping)),
        }
    }

    fn key_clause(&self, mapping: &SchemaMapping, first_param: usize, versioned: bool) -> String {
        let key = mapping
            .primary_key()
            .map(|k| self.quote(k.sql_name()))
            .unwrap_or_default();
        let mut clause = format!(" WHERE {} = {}", key, self.param(first_param));
        if versioned {
            clause.push_str(&format!(" AND {} = {}", self.version(mapping), self.param(first_param + 1)));
        }
        clause
    }

    pub fn select_all(&self, mapping: &SchemaMapping) -> String {
        let mut columns: Vec<String> = mapping.columns().iter().map(|m| self.quote(m.sql_name())).collect();
        columns.push(self.version(mapping));
        format!("SELECT {} FROM {}", columns.join(", "), self.table_name(mapping))
    }

    /// Parameters are the values of `columns`, in order.
    pub fn insert(&self, mapping: &SchemaMapping, columns: &[String]) -> String {
        let mut names: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        let mut params: Vec<String> = (0..columns.len()).map(|i| self.param(i)).collect();
        match self {
            SqlDialect::SqlServer => format!(
                "INSERT INTO {} ({}){} VALUES ({})",
                self.table_name(mapping),
                names.join(", "),
                self.returning(mapping),
                params.join(", ")
            ),
            SqlDialect::Sqlite => {
                names.push(self.version(mapping));
                params.push("1".to_string());
                format!(
                    "INSERT INTO {} ({}) VALUES ({}){}",
                    self.table_name(mapping),
                    names.join(", "),
                    params.join(", "),
                    self.returning(mapping)
                )
            }
        }
    }

    /// Parameters are the values of `columns`, then the key, then the
    /// expected version when `versioned`.
    pub fn update(&self, mapping: &SchemaMapping, columns: &[String], versioned: bool) -> String {
        let mut assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", self.quote(c), self.param(i)))
            .collect();
        let key_clause = self.key_clause(mapping, columns.len(), versioned);
        match self {
            SqlDialect::SqlServer => format!(
                "UPDATE {} SET {}{}{}",
                self.table_name(mapping),
                assignments.join(", "),
                self.returning(mapping),
                key_clause
            ),
            SqlDialect::Sqlite => {
                let version = self.version(mapping);
                assignments.push(format!("{} = {} + 1", version, version));
                format!(
                    "UPDATE {} SET {}{}{}",
                    self.table_name(mapping),
                    assignments.join(", "),
                    key_clause,
                    self.returning(mapping)
                )
            }
        }
    }

    /// Parameters are the key, then the expected version when `versioned`.
    pub fn delete(&self, mapping: &SchemaMapping, versioned: bool) -> String {
        format!(
            "DELETE FROM {}{}",
            self.table_name(mapping),
            self.key_clause(mapping, 0, versioned)
        )
    }

    pub fn type_name(&self, column_type: ColumnType) -> &'static str {
        match (self, column_type) {
            (SqlDialect::SqlServer, ColumnType::Bool) => "BIT",
            (SqlDialect::SqlServer, ColumnType::Int32) => "INT",
            (SqlDialect::SqlServer, ColumnType::Int64) => "BIGINT",
            (SqlDialect::SqlServer, ColumnType::Float64) => "FLOAT",
            (SqlDialect::SqlServer, ColumnType::String) => "NVARCHAR(MAX)",
            (SqlDialect::SqlServer, ColumnType::Guid) => "UNIQUEIDENTIFIER",
            (SqlDialect::SqlServer, ColumnType::DateTime) => "DATETIME2",
            (SqlDialect::Sqlite, ColumnType::Bool | ColumnType::Int32 | ColumnType::Int64) => "INTEGER",
            (SqlDialect::Sqlite, ColumnType::Float64) => "REAL",
            (SqlDialect::Sqlite, _) => "TEXT",
        }
    }

    /// DDL for a table matching `mapping`.
    pub fn create_table(&self, mapping: &SchemaMapping) -> Result<String> {
        let key = mapping.primary_key()?;
        let mut columns = Vec::new();
        for m in mapping.columns() {
            let nullable = if m.column() == key.column() || !m.column().allow_nulls() {
                " NOT NULL"
            } else {
                ""
            };
            columns.push(format!("{} {}{}", self.quote(m.sql_name()), self.type_name(m.sql_type()?), nullable));
        }
        let version_type = match self {
            SqlDialect::SqlServer => "ROWVERSION",
            SqlDialect::Sqlite => "INTEGER NOT NULL DEFAULT 1",
        };
        columns.push(format!("{} {}", self.version(mapping), version_type));
        columns.push(format!("PRIMARY KEY ({})", self.quote(key.sql_name())));
        Ok(format!("CREATE TABLE {} ({})", self.table_name(mapping), columns.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use crate::sync::mapping::MappingConfig;
    use crate::value::Value;

    fn mapping() -> SchemaMapping {
        let schema = TableSchema::new("People");
        let id = schema.add_value_column("Id", ColumnType::Int32, 0).unwrap();
        schema.set_primary_key(Some(&id)).unwrap();
        schema.add_value_column("Name", ColumnType::String, Value::Null).unwrap();
        let mut config = MappingConfig::new("tblPeople");
        config.schema = Some("dbo".to_string());
        SchemaMapping::from_config(&schema, &config).unwrap()
    }

    fn columns() -> Vec<String> {
        vec!["Id".to_string(), "Name".to_string()]
    }

    #[test]
    fn test_sql_server() {
        let m = mapping();
        let d = SqlDialect::SqlServer;
        assert_eq!(d.quote("a]b"), "[a]]b]");
        assert_eq!(d.select_all(&m), "SELECT [Id], [Name], [RowVersion] FROM [dbo].[tblPeople]");
        assert_eq!(
            d.insert(&m, &columns()),
            "INSERT INTO [dbo].[tblPeople] ([Id], [Name]) OUTPUT INSERTED.[RowVersion] VALUES (@p0, @p1)"
        );
        assert_eq!(
            d.update(&m, &["Name".to_string()], true),
            "UPDATE [dbo].[tblPeople] SET [Name] = @p0 OUTPUT INSERTED.[RowVersion] WHERE [Id] = @p1 AND [RowVersion] = @p2"
        );
        assert_eq!(d.delete(&m, false), "DELETE FROM [dbo].[tblPeople] WHERE [Id] = @p0");
    }

    #[test]
    fn test_sqlite() {
        let m = mapping();
        let d = SqlDialect::Sqlite;
        assert_eq!(
            d.insert(&m, &columns()),
            "INSERT INTO \"dbo\".\"tblPeople\" (\"Id\", \"Name\", \"RowVersion\") VALUES (?1, ?2, 1) RETURNING \"RowVersion\""
        );
        assert_eq!(
            d.update(&m, &["Name".to_string()], true),
            "UPDATE \"dbo\".\"tblPeople\" SET \"Name\" = ?1, \"RowVersion\" = \"RowVersion\" + 1 WHERE \"Id\" = ?2 AND \"RowVersion\" = ?3 RETURNING \"RowVersion\""
        );
        assert_eq!(
            d.delete(&m, true),
            "DELETE FROM \"dbo\".\"tblPeople\" WHERE \"Id\" = ?1 AND \"RowVersion\" = ?2"
        );
        assert_eq!(
            d.create_table(&m).unwrap(),
            "CREATE TABLE \"dbo\".\"tblPeople\" (\"Id\" INTEGER NOT NULL, \"Name\" TEXT, \"RowVersion\" INTEGER NOT NULL DEFAULT 1, PRIMARY KEY (\"Id\"))"
        );
    }
}
