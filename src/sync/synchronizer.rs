/// Change tracking and SQL replay for one table.
///
/// The synchronizer listens to its table and keeps at most one pending
/// change per row, collapsing sequences as they arrive:
///
/// | pending  | observed | result    |
/// |----------|----------|-----------|
/// | Added    | Changed  | Added     |
/// | Added    | Removed  | (nothing) |
/// | Changed  | Removed  | Removed   |
/// | Removed  | Added    | Changed   |
///
/// Events raised while the table is inside a load scope are ignored, which
/// covers the synchronizer's own reads and the cascades they cause.

use crate::column::Column;
use crate::context::DataContext;
use crate::error::{Error, Result, ValidationKind};
use crate::events::{SubscriptionId, TableEvent};
use crate::row::Row;
use crate::sync::mapping::{ColumnMapping, SchemaMapping};
use crate::sync::provider::{RowVersion, SqlProvider, SqlRecord, SqlValues};
use crate::table::Table;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// A pending change awaiting synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub row: Row,
    pub kind: ChangeKind,
}

/// Parent rows by key, per foreign key column id.
type ParentLookups = HashMap<u64, HashMap<Value, Row>>;

/// Versions produced by a write, applied once the transaction commits.
pub(crate) type StagedVersions = Vec<(Row, Option<RowVersion>)>;

struct SyncInner {
    table: Table,
    mapping: SchemaMapping,
    /// Keyed by row, so a row can never have two pending entries. The
    /// sequence number keeps write order stable.
    changes: RefCell<HashMap<Row, (u64, ChangeKind)>>,
    next_seq: Cell<u64>,
    /// Rows known to exist in the database, with their last seen version.
    versions: RefCell<HashMap<Row, Option<RowVersion>>>,
    subscription: Cell<Option<SubscriptionId>>,
}

#[derive(Clone)]
pub struct TableSynchronizer(Rc<SyncInner>);

impl TableSynchronizer {
    /// Starts tracking `table`. The mapping must be for the table's schema.
    pub fn new(table: &Table, mapping: SchemaMapping) -> Result<Self> {
        if *mapping.schema() != table.schema() {
            return Err(Error::invalid(format!(
                "mapping for '{}' cannot synchronize table of '{}'",
                mapping.schema().name(),
                table.schema().name()
            )));
        }
        let inner = Rc::new(SyncInner {
            table: table.clone(),
            mapping,
            changes: RefCell::new(HashMap::new()),
            next_seq: Cell::new(0),
            versions: RefCell::new(HashMap::new()),
            subscription: Cell::new(None),
        });
        let weak = Rc::downgrade(&inner);
        let id = table.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.observe(event);
            }
        });
        inner.subscription.set(Some(id));
        Ok(TableSynchronizer(inner))
    }

    pub fn table(&self) -> &Table {
        &self.0.table
    }

    pub fn mapping(&self) -> &SchemaMapping {
        &self.0.mapping
    }

    /// Pending changes in the order they were first recorded.
    pub fn changes(&self) -> Vec<RowChange> {
        let mut entries: Vec<(u64, RowChange)> = self
            .0
            .changes
            .borrow()
            .iter()
            .map(|(row, (seq, kind))| {
                (
                    *seq,
                    RowChange {
                        row: row.clone(),
                        kind: *kind,
                    },
                )
            })
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, change)| change).collect()
    }

    pub fn pending(&self, row: &Row) -> Option<ChangeKind> {
        self.0.changes.borrow().get(row).map(|(_, kind)| *kind)
    }

    pub fn has_changes(&self) -> bool {
        !self.0.changes.borrow().is_empty()
    }

    pub fn version(&self, row: &Row) -> Option<RowVersion> {
        self.0.versions.borrow().get(row).copied().flatten()
    }

    /// Reconciles the table with the database by primary key. Existing rows
    /// are updated in place, new ones created, and rows missing from the
    /// result removed. Foreign keys resolve against the parent tables of the
    /// table's `DataContext`, which must be read first. Rows added locally
    /// but not yet written are kept, and rows removed locally stay removed.
    ///
    /// Every record is resolved and the resulting unique values checked
    /// before the table is touched, so a failed read changes nothing. The
    /// whole context is held in a load scope, which keeps cascades into
    /// other tables out of their changelogs.
    pub fn read_data(&self, provider: &mut dyn SqlProvider) -> Result<()> {
        let records = provider.select_all(&self.0.mapping)?;
        let table = &self.0.table;
        let key = self.0.mapping.primary_key()?;
        let columns = self.0.mapping.columns();
        let parents = self.parent_lookups()?;

        let mut existing: HashMap<Value, Row> = HashMap::new();
        for row in table.rows() {
            existing.insert(row.raw_value(key.column()), row);
        }
        let mut removed_locally: HashMap<Value, Row> = self
            .changes()
            .into_iter()
            .filter(|change| change.kind == ChangeKind::Removed)
            .map(|change| (change.row.raw_value(key.column()), change.row))
            .collect();

        let mut updates: Vec<(Row, Record)> = Vec::new();
        let mut creates: Vec<Record> = Vec::new();
        let mut refreshed: Vec<(Row, Option<RowVersion>)> = Vec::new();
        for record in &records {
            let key_value = self.resolve(&key, record, &parents)?;
            // the pending delete goes out against the version just read
            if let Some(row) = removed_locally.remove(&key_value) {
                refreshed.push((row, record.version));
                continue;
            }
            let mut values = Vec::with_capacity(columns.len());
            for mapping in &columns {
                values.push((mapping.column().clone(), self.resolve(mapping, record, &parents)?));
            }
            let planned = Record {
                values,
                version: record.version,
            };
            match existing.remove(&key_value) {
                Some(row) => updates.push((row, planned)),
                None => creates.push(planned),
            }
        }

        // rows added locally and not yet written are not stale
        existing.retain(|_, row| self.pending(row) != Some(ChangeKind::Added));
        let stale: Vec<Row> = existing.into_values().collect();
        self.check_unique_outcome(&updates, &creates, &stale)?;

        let _context_load = table.context().map(|context| context.begin_load());
        let _load = table.begin_load();
        for row in &stale {
            if table.contains(row) {
                table.remove(row)?;
            }
        }

        let (updated, created) = (updates.len(), creates.len());
        let updated_rows: Vec<Row> = updates.iter().map(|(row, _)| row.clone()).collect();
        table.release_unique_keys(&updated_rows);
        let applied = self.apply_updates(updates, &mut creates);
        table.restore_unique_keys(&updated_rows);
        applied?;
        for planned in creates {
            let row = Row::new(&table.schema());
            assign_all(&row, planned.values)?;
            table.add(&row)?;
            self.0.versions.borrow_mut().insert(row, planned.version);
        }

        {
            let mut versions = self.0.versions.borrow_mut();
            let mut changes = self.0.changes.borrow_mut();
            for (row, version) in refreshed {
                versions.insert(row, version);
            }
            // gone from the database: nothing left to write
            for row in stale.iter().chain(removed_locally.values()) {
                versions.remove(row);
                changes.remove(row);
            }
        }
        self.forget_detached();
        log::debug!(
            "read '{}': {} updated, {} created, {} removed",
            self.0.mapping.sql_table(),
            updated,
            created,
            stale.len()
        );
        Ok(())
    }

    /// Converts one column of `record`, looking foreign keys up among the
    /// parent rows.
    fn resolve(&self, mapping: &ColumnMapping, record: &SqlRecord, parents: &ParentLookups) -> Result<Value> {
        let value = mapping.from_sql(record.get(mapping.sql_name()))?;
        match parents.get(&mapping.column().id()) {
            Some(lookup) if !value.is_null() => lookup.get(&value).cloned().map(Value::Row).ok_or_else(|| {
                Error::invalid(format!(
                    "'{}.{}' refers to missing parent {}",
                    self.0.mapping.sql_table(),
                    mapping.sql_name(),
                    value
                ))
            }),
            _ => Ok(value),
        }
    }

    /// Assigns read values to matched rows. A row cascaded away while stale
    /// rows were removed is recreated instead.
    fn apply_updates(&self, updates: Vec<(Row, Record)>, creates: &mut Vec<Record>) -> Result<()> {
        for (row, planned) in updates {
            if !self.0.table.contains(&row) {
                creates.push(planned);
                continue;
            }
            assign_all(&row, planned.values)?;
            self.0.versions.borrow_mut().insert(row, planned.version);
        }
        Ok(())
    }

    /// Fails if the table would hold a duplicate in a mapped unique column
    /// once the read is applied. Values may move between rows freely.
    fn check_unique_outcome(&self, updates: &[(Row, Record)], creates: &[Record], stale: &[Row]) -> Result<()> {
        let unique: Vec<Column> = self
            .0
            .mapping
            .columns()
            .into_iter()
            .map(|m| m.column().clone())
            .filter(Column::is_unique)
            .collect();
        if unique.is_empty() {
            return Ok(());
        }
        let replaced: HashSet<&Row> = updates.iter().map(|(row, _)| row).chain(stale).collect();
        let untouched: Vec<Row> = self
            .0
            .table
            .rows()
            .into_iter()
            .filter(|row| !replaced.contains(row))
            .collect();
        for column in &unique {
            let mut seen = HashSet::new();
            let incoming = updates.iter().map(|(_, planned)| planned).chain(creates);
            let values = untouched
                .iter()
                .map(|row| row.raw_value(column))
                .chain(incoming.filter_map(|planned| planned.value(column)));
            for value in values {
                if !seen.insert(value.clone()) {
                    return Err(Error::validation(
                        &column.name(),
                        ValidationKind::Duplicate,
                        format!(
                            "reading '{}' would duplicate {}",
                            self.0.mapping.sql_table(),
                            value
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Drops bookkeeping for rows no longer in the table, except pending
    /// deletes.
    fn forget_detached(&self) {
        let table = &self.0.table;
        let mut changes = self.0.changes.borrow_mut();
        changes.retain(|row, (_, kind)| *kind == ChangeKind::Removed || table.contains(row));
        self.0
            .versions
            .borrow_mut()
            .retain(|row, _| table.contains(row) || changes.contains_key(row));
    }

    /// Writes this table's pending changes in one transaction.
    pub fn write_data(&self, provider: &mut dyn SqlProvider) -> Result<()> {
        provider.begin()?;
        let mut staged = StagedVersions::new();
        if let Err(err) = self.write_all(provider, &mut staged) {
            if let Err(rollback) = provider.rollback() {
                log::warn!("rollback failed: {}", rollback);
            }
            return Err(err);
        }
        provider.commit()?;
        self.complete(staged);
        Ok(())
    }

    fn write_all(&self, provider: &mut dyn SqlProvider, staged: &mut StagedVersions) -> Result<()> {
        for kind in [ChangeKind::Added, ChangeKind::Changed, ChangeKind::Removed] {
            self.write_kind(provider, kind, staged)?;
        }
        Ok(())
    }

    /// Issues every pending change of `kind`, staging the resulting versions.
    pub(crate) fn write_kind(
        &self,
        provider: &mut dyn SqlProvider,
        kind: ChangeKind,
        staged: &mut StagedVersions,
    ) -> Result<()> {
        let mapping = &self.0.mapping;
        let key = mapping.primary_key()?;
        for change in self.changes().into_iter().filter(|c| c.kind == kind) {
            let row = &change.row;
            let key_value = row.raw_value(key.column());
            let expected = self.version(row);
            match kind {
                ChangeKind::Added => {
                    let version = provider.insert(mapping, &self.sql_values(row, true)?)?;
                    staged.push((row.clone(), Some(version)));
                }
                ChangeKind::Changed => {
                    match provider.update(mapping, &key_value, expected, &self.sql_values(row, false)?)? {
                        Some(version) => staged.push((row.clone(), Some(version))),
                        None => return Err(self.conflict(&key_value)),
                    }
                }
                ChangeKind::Removed => {
                    if !provider.delete(mapping, &key_value, expected)? {
                        return Err(self.conflict(&key_value));
                    }
                    staged.push((row.clone(), None));
                }
            }
        }
        Ok(())
    }

    /// Applies staged versions and clears the changelog after a commit.
    pub(crate) fn complete(&self, staged: StagedVersions) {
        let mut versions = self.0.versions.borrow_mut();
        for (row, version) in staged {
            match version {
                Some(version) => {
                    versions.insert(row, Some(version));
                }
                None => {
                    versions.remove(&row);
                }
            }
        }
        self.0.changes.borrow_mut().clear();
    }

    fn conflict(&self, key: &Value) -> Error {
        log::warn!(
            "concurrency conflict on '{}' for key {}",
            self.0.mapping.sql_table(),
            key
        );
        Error::Concurrency {
            table: self.0.mapping.sql_table().to_string(),
            key: key.to_string(),
        }
    }

    fn sql_values(&self, row: &Row, include_key: bool) -> Result<SqlValues> {
        let key = self.0.mapping.primary_key()?;
        let mut values = SqlValues::new();
        for mapping in self.0.mapping.columns() {
            if !include_key && mapping.column() == key.column() {
                continue;
            }
            let value = match row.raw_value(mapping.column()) {
                Value::Row(parent) => parent_key(&parent)?,
                other => other,
            };
            values.push((mapping.sql_name().to_string(), value));
        }
        Ok(values)
    }

    /// Parent rows by key, for every mapped foreign key.
    fn parent_lookups(&self) -> Result<ParentLookups> {
        let mut lookups = HashMap::new();
        let foreign_keys: Vec<Column> = self
            .0
            .mapping
            .columns()
            .into_iter()
            .map(|m| m.column().clone())
            .filter(Column::is_foreign_key)
            .collect();
        if foreign_keys.is_empty() {
            return Ok(lookups);
        }
        let context: DataContext = self.0.table.context().ok_or_else(|| {
            Error::invalid("reading foreign keys requires the table to belong to a DataContext")
        })?;
        for fk in foreign_keys {
            let foreign = fk
                .foreign_schema()
                .ok_or_else(|| Error::invalid(format!("'{}' refers to a removed schema", fk.name())))?;
            let parent_table = context
                .table(&foreign)
                .ok_or_else(|| Error::invalid(format!("data context has no table for '{}'", foreign.name())))?;
            let parent_key = foreign
                .primary_key()
                .ok_or_else(|| Error::invalid(format!("schema '{}' has no primary key", foreign.name())))?;
            let lookup: HashMap<Value, Row> = parent_table
                .rows()
                .into_iter()
                .map(|row| (row.raw_value(&parent_key), row))
                .collect();
            lookups.insert(fk.id(), lookup);
        }
        Ok(lookups)
    }
}

/// One database record resolved to column values.
struct Record {
    values: Vec<(Column, Value)>,
    version: Option<RowVersion>,
}

impl Record {
    fn value(&self, column: &Column) -> Option<Value> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, v)| v.clone())
    }
}

fn assign_all(row: &Row, values: Vec<(Column, Value)>) -> Result<()> {
    for (column, value) in values {
        row.assign(&column, value, true)?;
    }
    Ok(())
}

fn parent_key(parent: &Row) -> Result<Value> {
    let schema = parent.schema();
    let key = schema
        .primary_key()
        .ok_or_else(|| Error::invalid(format!("schema '{}' has no primary key", schema.name())))?;
    Ok(parent.raw_value(&key))
}

impl SyncInner {
    fn observe(&self, event: &TableEvent) {
        if self.table.is_loading() {
            return;
        }
        match event {
            TableEvent::RowAdded { row, .. } => self.record(row, ChangeKind::Added),
            TableEvent::ValueChanged { row, column } if self.mapping.is_mapped(column) => {
                self.record(row, ChangeKind::Changed)
            }
            TableEvent::RowRemoved { row, .. } => self.record(row, ChangeKind::Removed),
            _ => {}
        }
    }

    fn record(&self, row: &Row, observed: ChangeKind) {
        let mut changes = self.changes.borrow_mut();
        let pending = changes.get(row).map(|(_, kind)| *kind);
        let in_database = self.versions.borrow().contains_key(row);
        let next = match (pending, observed) {
            (Some(ChangeKind::Added), ChangeKind::Removed) => None,
            (Some(ChangeKind::Added), _) => Some(ChangeKind::Added),
            (Some(ChangeKind::Removed), ChangeKind::Added) => Some(ChangeKind::Changed),
            (Some(_), ChangeKind::Removed) => Some(ChangeKind::Removed),
            (Some(kind), _) => Some(kind),
            (None, ChangeKind::Added) if in_database => Some(ChangeKind::Changed),
            (None, kind) => Some(kind),
        };
        match next {
            Some(kind) => {
                let seq = match changes.get(row) {
                    Some((seq, _)) => *seq,
                    None => {
                        let seq = self.next_seq.get();
                        self.next_seq.set(seq + 1);
                        seq
                    }
                };
                changes.insert(row.clone(), (seq, kind));
            }
            None => {
                changes.remove(row);
            }
        }
        log::trace!("changelog for row {}: {:?} -> {:?}", row.id(), pending, next);
    }
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.table.unsubscribe(id);
        }
    }
}

impl fmt::Debug for TableSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSynchronizer")
            .field("table", &self.0.mapping.sql_table())
            .field("pending", &self.0.changes.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use crate::sync::provider::MemoryProvider;
    use crate::value::ColumnType;

    fn people() -> (Table, TableSynchronizer) {
        let schema = TableSchema::new("People");
        let id = schema.add_value_column("Id", ColumnType::Int32, 0).unwrap();
        schema.set_primary_key(Some(&id)).unwrap();
        schema.add_value_column("Name", ColumnType::String, "").unwrap();
        schema.add_calculated_column("Shout", ColumnType::String, "Name + '!'").unwrap();
        let table = Table::new(&schema);
        let sync = TableSynchronizer::new(&table, SchemaMapping::new(&schema).unwrap()).unwrap();
        (table, sync)
    }

    fn add(table: &Table, id: i32, name: &str) -> Row {
        table.add_row_with([("Id", Value::from(id)), ("Name", Value::from(name))]).unwrap()
    }

    #[test]
    fn test_added_then_changed_stays_added() {
        let (table, sync) = people();
        let row = add(&table, 1, "Ann");
        row.set("Name", "Anne").unwrap();
        assert_eq!(sync.changes(), vec![RowChange { row, kind: ChangeKind::Added }]);
    }

    #[test]
    fn test_added_then_removed_issues_nothing() {
        let (table, sync) = people();
        let row = add(&table, 1, "Ann");
        row.remove().unwrap();
        assert!(!sync.has_changes());

        let mut provider = MemoryProvider::default();
        sync.write_data(&mut provider).unwrap();
        assert_eq!(provider.statements(), ["BEGIN TRANSACTION", "COMMIT"]);
    }

    #[test]
    fn test_calculated_invalidation_is_not_a_change() {
        let (table, sync) = people();
        let row = add(&table, 1, "Ann");
        let mut provider = MemoryProvider::default();
        sync.write_data(&mut provider).unwrap();
        assert_eq!(row.get("Shout").unwrap(), Value::from("Ann!"));
        assert!(!sync.has_changes());
        row.set("Name", "Bo").unwrap();
        assert_eq!(sync.pending(&row), Some(ChangeKind::Changed));
    }

    #[test]
    fn test_write_then_reattach_and_remove() {
        let (table, sync) = people();
        let mut provider = MemoryProvider::default();
        let row = add(&table, 1, "Ann");
        sync.write_data(&mut provider).unwrap();
        let first = sync.version(&row).unwrap();

        table.remove(&row).unwrap();
        assert_eq!(sync.pending(&row), Some(ChangeKind::Removed));
        table.add(&row).unwrap();
        assert_eq!(sync.pending(&row), Some(ChangeKind::Changed));
        sync.write_data(&mut provider).unwrap();
        assert!(sync.version(&row).unwrap() > first);

        row.set("Name", "Changed").unwrap();
        row.remove().unwrap();
        assert_eq!(sync.pending(&row), Some(ChangeKind::Removed));
        sync.write_data(&mut provider).unwrap();
        assert!(provider.rows("People").is_empty());
        assert_eq!(sync.version(&row), None);
    }

    #[test]
    fn test_concurrency_conflict_keeps_changelog() {
        let (table, sync) = people();
        let mut provider = MemoryProvider::default();
        let row = add(&table, 1, "Ann");
        sync.write_data(&mut provider).unwrap();
        let version = sync.version(&row);

        provider.touch("People", &Value::Int32(1));
        row.set("Name", "Mine").unwrap();
        let err = sync.write_data(&mut provider).unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(sync.pending(&row), Some(ChangeKind::Changed));
        assert_eq!(sync.version(&row), version);
        assert_eq!(provider.statements().last().unwrap(), "ROLLBACK");

        sync.read_data(&mut provider).unwrap();
        assert_eq!(row.get("Name").unwrap(), Value::from("Ann"));
        row.set("Name", "Mine").unwrap();
        sync.write_data(&mut provider).unwrap();
        assert_eq!(provider.rows("People")[0].get("Name"), Value::from("Mine"));
    }

    #[test]
    fn test_read_reconciles_by_key() {
        let (table, sync) = people();
        let mut provider = MemoryProvider::default();
        provider.seed(
            "People",
            Value::Int32(1),
            vec![("Id".to_string(), Value::Int64(1)), ("Name".to_string(), Value::from("Ann"))],
        );
        provider.seed(
            "People",
            Value::Int32(2),
            vec![("Id".to_string(), Value::Int64(2)), ("Name".to_string(), Value::from("Bo"))],
        );
        let kept = add(&table, 1, "stale");
        let gone = add(&table, 9, "gone");
        sync.write_data(&mut MemoryProvider::default()).unwrap();

        sync.read_data(&mut provider).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.row(0).unwrap(), kept);
        assert_eq!(kept.get("Name").unwrap(), Value::from("Ann"));
        assert!(!gone.is_attached());
        assert_eq!(table.row(1).unwrap().get("Id").unwrap(), Value::Int32(2));
        assert!(!sync.has_changes());
        assert!(sync.version(&kept).is_some());
    }

    #[test]
    fn test_read_keeps_local_removals() {
        let (table, sync) = people();
        let mut provider = MemoryProvider::default();
        let ann = add(&table, 1, "Ann");
        let bo = add(&table, 2, "Bo");
        sync.write_data(&mut provider).unwrap();

        ann.remove().unwrap();
        bo.remove().unwrap();
        provider.touch("People", &Value::Int32(1));
        provider.delete(sync.mapping(), &Value::Int32(2), None).unwrap();

        sync.read_data(&mut provider).unwrap();
        assert!(table.is_empty());
        assert_eq!(sync.pending(&ann), Some(ChangeKind::Removed));
        assert_eq!(sync.pending(&bo), None);

        sync.write_data(&mut provider).unwrap();
        assert!(provider.rows("People").is_empty());
        assert!(table.is_empty());
        assert!(!sync.has_changes());
    }

    fn items() -> (Table, TableSynchronizer) {
        let schema = TableSchema::new("Items");
        let id = schema.add_value_column("Id", ColumnType::Int32, 0).unwrap();
        schema.set_primary_key(Some(&id)).unwrap();
        let code = schema.add_value_column("Code", ColumnType::Int32, 0).unwrap();
        code.set_unique(true).unwrap();
        let table = Table::new(&schema);
        let sync = TableSynchronizer::new(&table, SchemaMapping::new(&schema).unwrap()).unwrap();
        (table, sync)
    }

    fn seed_item(provider: &mut MemoryProvider, id: i32, code: i64) {
        provider.seed(
            "Items",
            Value::Int32(id),
            vec![("Id".to_string(), Value::Int64(i64::from(id))), ("Code".to_string(), Value::Int64(code))],
        );
    }

    #[test]
    fn test_read_swaps_unique_values() {
        let (table, sync) = items();
        let mut provider = MemoryProvider::default();
        let first = table.add_row_with([("Id", 1), ("Code", 10)]).unwrap();
        let second = table.add_row_with([("Id", 2), ("Code", 20)]).unwrap();
        sync.write_data(&mut provider).unwrap();

        seed_item(&mut provider, 1, 20);
        seed_item(&mut provider, 2, 10);
        sync.read_data(&mut provider).unwrap();
        assert_eq!(first.get("Code").unwrap(), Value::Int32(20));
        assert_eq!(second.get("Code").unwrap(), Value::Int32(10));
        assert!(!sync.has_changes());

        let err = table.add_row_with([("Id", 3), ("Code", 10)]).unwrap_err();
        assert_eq!(err.validation_kind(), Some(ValidationKind::Duplicate));
        table.add_row_with([("Id", 3), ("Code", 30)]).unwrap();
    }

    #[test]
    fn test_read_with_duplicate_changes_nothing() {
        let (table, sync) = items();
        let mut provider = MemoryProvider::default();
        let first = table.add_row_with([("Id", 1), ("Code", 10)]).unwrap();
        table.add_row_with([("Id", 2), ("Code", 20)]).unwrap();
        sync.write_data(&mut provider).unwrap();

        seed_item(&mut provider, 1, 30);
        seed_item(&mut provider, 3, 20);
        let err = sync.read_data(&mut provider).unwrap_err();
        assert_eq!(err.validation_kind(), Some(ValidationKind::Duplicate));
        assert_eq!(table.len(), 2);
        assert_eq!(first.get("Code").unwrap(), Value::Int32(10));
    }

    #[test]
    fn test_mapping_must_match_table() {
        let (table, _) = people();
        let other = TableSchema::new("Other");
        let id = other.add_value_column("Id", ColumnType::Int32, 0).unwrap();
        other.set_primary_key(Some(&id)).unwrap();
        assert!(TableSynchronizer::new(&table, SchemaMapping::new(&other).unwrap()).is_err());
    }
}
