//! Synchronization between in-memory tables and SQL databases.
//!
//! A [`SchemaMapping`] binds a schema to an SQL table. A [`TableSynchronizer`]
//! records the changes made to one table and replays them through a
//! [`SqlProvider`], detecting concurrent edits with row versions. A
//! [`DataSyncContext`] does the same for every table of a
//! [`DataContext`](crate::DataContext), ordering statements so foreign keys
//! always hold.

mod context;
mod dialect;
mod mapping;
mod provider;
#[cfg(feature = "sqlite")]
mod sqlite;
mod synchronizer;

pub use context::DataSyncContext;
pub use dialect::SqlDialect;
pub use mapping::{ColumnMapping, MappingConfig, SchemaMapping};
pub use provider::{MemoryProvider, RowVersion, SqlProvider, SqlRecord, SqlValues};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteProvider;
pub use synchronizer::{ChangeKind, RowChange, TableSynchronizer};
