//! Singularity - Live Relational Data Engine
//!
//! An embedded, single-threaded relational store: typed schemas, rows that
//! validate every write, calculated columns kept current by a dependency
//! engine, unique indices, parent/child navigation through foreign keys and
//! filtered views that stay equal to their predicate's result as data
//! changes. A `DataContext` groups the tables of a model; it can be
//! snapshotted to XML and synchronized with SQL databases with optimistic
//! concurrency.
//!
//! ```
//! use singularity::{ColumnType, DataContext, FilteredTable, TableSchema, Value};
//!
//! let families = TableSchema::new("Families");
//! let id = families.add_value_column("Id", ColumnType::Int32, 0).unwrap();
//! families.set_primary_key(Some(&id)).unwrap();
//! families.add_value_column("LastName", ColumnType::String, "").unwrap();
//!
//! let people = TableSchema::new("People");
//! people.add_value_column("FirstName", ColumnType::String, "").unwrap();
//! people.add_foreign_key("Family", &families, "Members").unwrap();
//! people
//!     .add_calculated_column("FullName", ColumnType::String, "FirstName + ' ' + Family.LastName")
//!     .unwrap();
//!
//! let context = DataContext::new();
//! let family_table = context.create_table(&families).unwrap();
//! let people_table = context.create_table(&people).unwrap();
//!
//! let smiths = family_table
//!     .add_row_with([("Id", Value::from(1)), ("LastName", Value::from("Smith"))])
//!     .unwrap();
//! let ann = people_table
//!     .add_row_with([("FirstName", Value::from("Ann")), ("Family", Value::from(&smiths))])
//!     .unwrap();
//! assert_eq!(ann.get("FullName").unwrap(), Value::from("Ann Smith"));
//!
//! let smith_view = FilteredTable::new(&people_table, "Family.LastName == 'Smith'").unwrap();
//! assert_eq!(smith_view.len(), 1);
//!
//! smiths.set("LastName", "Jones").unwrap();
//! assert_eq!(ann.get("FullName").unwrap(), Value::from("Ann Jones"));
//! assert_eq!(smith_view.len(), 0);
//! ```

pub mod error;
pub mod value;
pub mod events;
pub mod column;
pub mod schema;
pub mod row;
mod index;
pub mod table;
pub mod relation;
pub mod expr;
pub mod dependency;
mod calculated;
pub mod filtered;
pub mod context;
pub mod typed;
pub mod xml;
pub mod sync;

pub use error::{Error, Result, ValidationKind};
pub use value::{ColumnType, Value};
pub use events::{SchemaEvent, SubscriptionId, TableEvent};
pub use column::{AsColumn, Column, ColumnKind, DeleteRule};
pub use schema::TableSchema;
pub use row::Row;
pub use table::{LoadScope, Table};
pub use relation::{ChildRelation, ChildRowCollection};
pub use expr::{parse_expr, Expr};
pub use dependency::{DependencySpec, HopSpec};
pub use filtered::FilteredTable;
pub use context::{ContextLoadScope, DataContext};
pub use typed::{FromValue, TypedRow, TypedTable};
pub use xml::{read_xml, to_xml_string, write_xml};
