/// Singularity Table Implementation
///
/// A Table is an ordered, mutable sequence of rows of one schema. Order is
/// significant: it is the iteration order, filtered views and child
/// collections preserve it, and it decides where a row lands when view
/// membership changes.
///
/// Tables own the per-column value indices and raise `TableEvent`s after each
/// mutation has completed.
///
/// # Examples
///
/// ```
/// use singularity::{ColumnType, Table, TableSchema, Value};
///
/// let schema = TableSchema::new("Members");
/// schema.add_value_column("Name", ColumnType::String, "").unwrap();
/// let code = schema.add_value_column("Code", ColumnType::Int32, 0).unwrap();
/// code.set_unique(true).unwrap();
///
/// let table = Table::new(&schema);
/// table.add_row_with([("Name", Value::from("Alice")), ("Code", Value::from(1))]).unwrap();
/// assert!(table.add_row_with([("Code", Value::from(1))]).is_err());
/// assert_eq!(table.len(), 1);
/// assert_eq!(table.find("Code", 1).unwrap().len(), 1);
/// ```

use crate::column::{AsColumn, Column, ColumnId};
use crate::context::{ContextInner, DataContext};
use crate::dependency;
use crate::error::{Error, Result, ValidationKind};
use crate::events::{EventHandlers, SubscriptionId, TableEvent};
use crate::index::ValueIndex;
use crate::relation;
use crate::row::Row;
use crate::schema::TableSchema;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

pub type TableId = u64;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Runs a deferred callback on the caller's execution context.
pub type Dispatcher = Rc<dyn Fn(Box<dyn FnOnce()>)>;

pub(crate) struct TableInner {
    id: TableId,
    schema: TableSchema,
    rows: RefCell<Vec<Row>>,
    /// Built lazily on first use, then maintained on every attach, detach
    /// and value change.
    indices: RefCell<HashMap<ColumnId, ValueIndex>>,
    context: RefCell<Weak<ContextInner>>,
    handlers: EventHandlers<TableEvent>,
    load_depth: Cell<usize>,
    dispatcher: RefCell<Option<Dispatcher>>,
}

/// Handle to a table. Clones share the same rows.
#[derive(Clone)]
pub struct Table(pub(crate) Rc<TableInner>);

impl Table {
    pub fn new(schema: &TableSchema) -> Self {
        Table(Rc::new(TableInner {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            schema: schema.clone(),
            rows: RefCell::new(Vec::new()),
            indices: RefCell::new(HashMap::new()),
            context: RefCell::new(Weak::new()),
            handlers: EventHandlers::new(),
            load_depth: Cell::new(0),
            dispatcher: RefCell::new(None),
        }))
    }

    pub fn id(&self) -> TableId {
        self.0.id
    }

    pub fn schema(&self) -> TableSchema {
        self.0.schema.clone()
    }

    pub fn len(&self) -> usize {
        self.0.rows.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.rows.borrow().is_empty()
    }

    /// Snapshot of the rows in table order.
    pub fn rows(&self) -> Vec<Row> {
        self.0.rows.borrow().clone()
    }

    pub fn row(&self, index: usize) -> Option<Row> {
        self.0.rows.borrow().get(index).cloned()
    }

    pub fn index_of(&self, row: &Row) -> Option<usize> {
        self.0.rows.borrow().iter().position(|r| r == row)
    }

    pub fn contains(&self, row: &Row) -> bool {
        row.table().as_ref() == Some(self)
    }

    /// The `DataContext` this table belongs to, if any.
    pub fn context(&self) -> Option<DataContext> {
        self.0.context.borrow().upgrade().map(DataContext)
    }

    pub(crate) fn set_context(&self, context: Weak<ContextInner>) {
        *self.0.context.borrow_mut() = context;
    }

    /// Creates a row seeded with defaults and appends it.
    pub fn add_row(&self) -> Result<Row> {
        let row = Row::new(&self.0.schema);
        self.add(&row)?;
        Ok(row)
    }

    /// Creates a row, assigns `values` while it is still detached, then
    /// appends it. Nothing is added if any value is rejected.
    pub fn add_row_with<I, C, V>(&self, values: I) -> Result<Row>
    where
        I: IntoIterator<Item = (C, V)>,
        C: AsColumn,
        V: Into<Value>,
    {
        let row = Row::new(&self.0.schema);
        for (column, value) in values {
            row.set(column, value)?;
        }
        self.add(&row)?;
        Ok(row)
    }

    /// Appends a detached row.
    pub fn add(&self, row: &Row) -> Result<()> {
        self.insert(self.len(), row)
    }

    /// Inserts a detached row at `index`.
    pub fn insert(&self, index: usize, row: &Row) -> Result<()> {
        if row.schema() != self.0.schema {
            return Err(Error::validation(
                &row.schema().name(),
                ValidationKind::WrongSchema,
                format!("row does not belong to schema '{}'", self.0.schema.name()),
            ));
        }
        if row.is_attached() {
            return Err(Error::invalid("row already belongs to a table"));
        }
        let len = self.len();
        if index > len {
            return Err(Error::invalid(format!("index {} out of range [0, {}]", index, len)));
        }
        for column in self.0.schema.columns() {
            if column.is_calculated() {
                continue;
            }
            let value = row.raw_value(&column);
            if value.is_null() && !column.allow_nulls() {
                return Err(Error::validation(
                    &column.name(),
                    ValidationKind::NullNotAllowed,
                    "null is not allowed",
                ));
            }
            self.check_unique(&column, &value, row)?;
        }

        self.0.rows.borrow_mut().insert(index, row.clone());
        row.attach(self);
        self.index_row(row);
        relation::attach_to_parents(row, self);
        dependency::notify_structure_changed(row);
        log::trace!("attached row {} to '{}' at {}", row.id(), self.0.schema.name(), index);
        self.emit(TableEvent::RowAdded {
            row: row.clone(),
            index,
        });
        Ok(())
    }

    /// Removes a row. Child rows in the same `DataContext` are orphaned or
    /// removed according to their foreign key's delete rule.
    pub fn remove(&self, row: &Row) -> Result<()> {
        if !self.contains(row) {
            return Err(Error::invalid("row does not belong to this table"));
        }
        relation::release_children(row)?;
        // Releasing children may have cascaded back into this table.
        let Some(index) = self.index_of(row) else {
            return Ok(());
        };

        self.0.rows.borrow_mut().remove(index);
        self.unindex_row(row);
        relation::detach_from_parents(row);
        row.detach();
        dependency::notify_structure_changed(row);
        log::trace!("detached row {} from '{}'", row.id(), self.0.schema.name());
        self.emit(TableEvent::RowRemoved {
            row: row.clone(),
            index,
        });
        Ok(())
    }

    pub fn remove_at(&self, index: usize) -> Result<Row> {
        let row = self
            .row(index)
            .ok_or_else(|| Error::invalid(format!("index {} out of range [0, {})", index, self.len())))?;
        self.remove(&row)?;
        Ok(row)
    }

    /// Removes every row, last to first.
    pub fn clear(&self) -> Result<()> {
        loop {
            let last = self.0.rows.borrow().last().cloned();
            let Some(row) = last else {
                return Ok(());
            };
            self.remove(&row)?;
        }
    }

    /// Rows holding `value` in `column`, in table order. Uses the column's
    /// index when it has one.
    pub fn find<C: AsColumn>(&self, column: C, value: impl Into<Value>) -> Result<Vec<Row>> {
        let column = column.resolve(&self.0.schema)?;
        let value = value.into();
        if column.has_index() {
            self.ensure_index(&column);
            let mut hits = self
                .0
                .indices
                .borrow()
                .get(&column.id())
                .map(|index| index.rows(&value))
                .unwrap_or_default();
            let order = self.0.rows.borrow();
            hits.sort_by_key(|row| order.iter().position(|r| r == row));
            return Ok(hits);
        }
        let mut hits = Vec::new();
        for row in self.rows() {
            if row.value(&column)? == value {
                hits.push(row);
            }
        }
        Ok(hits)
    }

    /// Looks a row up by primary key.
    pub fn find_by_key(&self, key: impl Into<Value>) -> Result<Option<Row>> {
        let primary_key = self.0.schema.primary_key().ok_or_else(|| {
            Error::invalid(format!("schema '{}' has no primary key", self.0.schema.name()))
        })?;
        Ok(self.find(&primary_key, key)?.into_iter().next())
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TableEvent) + 'static,
    {
        self.0.handlers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.0.handlers.unsubscribe(id)
    }

    /// Starts a bulk-load scope. Consumers that track changes ignore events
    /// until the outermost scope is dropped, then receive `LoadCompleted`.
    pub fn begin_load(&self) -> LoadScope {
        self.0.load_depth.set(self.0.load_depth.get() + 1);
        LoadScope { table: self.clone() }
    }

    pub fn is_loading(&self) -> bool {
        self.0.load_depth.get() > 0
    }

    /// Routes `LoadCompleted` through `dispatcher` instead of raising it on
    /// the stack that closed the load scope.
    pub fn set_completion_dispatcher<F>(&self, dispatcher: F)
    where
        F: Fn(Box<dyn FnOnce()>) + 'static,
    {
        *self.0.dispatcher.borrow_mut() = Some(Rc::new(dispatcher));
    }

    fn end_load(&self) {
        let depth = self.0.load_depth.get().saturating_sub(1);
        self.0.load_depth.set(depth);
        if depth > 0 {
            return;
        }
        let dispatcher = self.0.dispatcher.borrow().clone();
        match dispatcher {
            Some(dispatch) => {
                let table = self.clone();
                dispatch(Box::new(move || table.emit(TableEvent::LoadCompleted)));
            }
            None => self.emit(TableEvent::LoadCompleted),
        }
    }

    pub(crate) fn emit(&self, event: TableEvent) {
        self.0.handlers.emit(&event);
    }

    pub(crate) fn emit_value_changed(&self, row: &Row, column: &Column) {
        self.emit(TableEvent::ValueChanged {
            row: row.clone(),
            column: column.clone(),
        });
    }

    /// Fails if a row other than `row` holds `value` in a unique column.
    pub(crate) fn check_unique(&self, column: &Column, value: &Value, row: &Row) -> Result<()> {
        if !column.is_unique() {
            return Ok(());
        }
        self.ensure_index(column);
        let conflict = self
            .0
            .indices
            .borrow()
            .get(&column.id())
            .map_or(false, |index| index.conflicts(value, row));
        if conflict {
            return Err(Error::validation(
                &column.name(),
                ValidationKind::Duplicate,
                format!("value {} already exists in '{}'", value, self.0.schema.name()),
            ));
        }
        Ok(())
    }

    /// Builds the index for `column` from every current row if missing.
    pub(crate) fn ensure_index(&self, column: &Column) {
        if self.0.indices.borrow().contains_key(&column.id()) {
            return;
        }
        let mut index = ValueIndex::new();
        for row in self.0.rows.borrow().iter() {
            index.insert(row.raw_value(column), row);
        }
        log::trace!("built index on '{}.{}'", self.0.schema.name(), column.name());
        self.0.indices.borrow_mut().insert(column.id(), index);
    }

    pub(crate) fn update_index(&self, row: &Row, column: &Column, old: &Value, new: &Value) {
        if let Some(index) = self.0.indices.borrow_mut().get_mut(&column.id()) {
            index.replace(old, new.clone(), row);
        }
    }

    /// Takes `rows` out of every unique index so they can exchange values
    /// without colliding. Pair with [`Table::restore_unique_keys`].
    pub(crate) fn release_unique_keys(&self, rows: &[Row]) {
        for column in self.0.schema.columns().iter().filter(|c| c.is_unique()) {
            self.ensure_index(column);
            if let Some(index) = self.0.indices.borrow_mut().get_mut(&column.id()) {
                for row in rows {
                    index.remove(&row.raw_value(column), row);
                }
            }
        }
    }

    /// Re-indexes the rows of `rows` still in the table under their current
    /// values.
    pub(crate) fn restore_unique_keys(&self, rows: &[Row]) {
        let mut indices = self.0.indices.borrow_mut();
        for column in self.0.schema.columns().iter().filter(|c| c.is_unique()) {
            if let Some(index) = indices.get_mut(&column.id()) {
                for row in rows.iter().filter(|row| self.contains(row)) {
                    index.insert(row.raw_value(column), row);
                }
            }
        }
    }

    fn index_row(&self, row: &Row) {
        let mut indices = self.0.indices.borrow_mut();
        for column in self.0.schema.columns() {
            if let Some(index) = indices.get_mut(&column.id()) {
                index.insert(row.raw_value(&column), row);
            }
        }
    }

    fn unindex_row(&self, row: &Row) {
        let mut indices = self.0.indices.borrow_mut();
        for column in self.0.schema.columns() {
            if let Some(index) = indices.get_mut(&column.id()) {
                index.remove(&row.raw_value(&column), row);
            }
        }
    }
}

impl Drop for TableInner {
    fn drop(&mut self) {
        // Parent rows cache child collections that hold their children; break
        // that cycle for rows that outlive the table.
        for row in self.rows.get_mut().iter() {
            row.drop_child_collections();
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Table {}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Table {{ schema: '{}', rows: {} }}",
            self.0.schema.name(),
            self.len()
        )
    }
}

/// Guard returned by [`Table::begin_load`].
pub struct LoadScope {
    table: Table,
}

impl Drop for LoadScope {
    fn drop(&mut self) {
        self.table.end_load();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ColumnType;

    fn numbers() -> (TableSchema, Column, Column) {
        let schema = TableSchema::new("Numbers");
        let a = schema.add_value_column("A", ColumnType::Int32, 2).unwrap();
        let b = schema.add_value_column("B", ColumnType::Int32, 0).unwrap();
        (schema, a, b)
    }

    fn recorded(table: &Table) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        table.subscribe(move |event| {
            let entry = match event {
                TableEvent::RowAdded { index, .. } => format!("added@{}", index),
                TableEvent::RowRemoved { index, .. } => format!("removed@{}", index),
                TableEvent::ValueChanged { column, .. } => format!("changed:{}", column.name()),
                TableEvent::LoadCompleted => "loaded".to_string(),
            };
            sink.borrow_mut().push(entry);
        });
        log
    }

    #[test]
    fn test_unique_scenario() {
        let (schema, _, b) = numbers();
        let table = Table::new(&schema);
        for i in 0..10 {
            table.add_row_with([("B", i)]).unwrap();
        }
        b.set_unique(true).unwrap();

        let err = table.add_row_with([("B", 3)]).unwrap_err();
        assert_eq!(err.validation_kind(), Some(ValidationKind::Duplicate));
        assert_eq!(table.len(), 10);

        let row = table.row(0).unwrap();
        let err = row.set(&b, 5).unwrap_err();
        assert_eq!(err.validation_kind(), Some(ValidationKind::Duplicate));
        assert_eq!(row.get(&b).unwrap(), Value::Int32(0));
        row.set(&b, 0).unwrap();
        row.set(&b, 42).unwrap();
        row.set(&b, 0).unwrap();
    }

    #[test]
    fn test_insert_and_remove_positions() {
        let (schema, _, _) = numbers();
        let table = Table::new(&schema);
        let log = recorded(&table);
        let first = table.add_row().unwrap();
        let last = table.add_row().unwrap();
        let middle = Row::new(&schema);
        table.insert(1, &middle).unwrap();

        assert_eq!(table.rows(), vec![first.clone(), middle.clone(), last]);
        table.remove(&middle).unwrap();
        assert!(!middle.is_attached());
        assert_eq!(table.index_of(&middle), None);
        assert_eq!(*log.borrow(), vec!["added@0", "added@1", "added@1", "removed@1"]);

        assert!(table.remove(&middle).is_err());
        assert!(table.insert(5, &middle).is_err());
    }

    #[test]
    fn test_rejected_write_fires_no_event() {
        let (schema, a, _) = numbers();
        let table = Table::new(&schema);
        let row = table.add_row().unwrap();
        let log = recorded(&table);

        assert!(row.set(&a, "text").is_err());
        row.set(&a, 2).unwrap();
        assert!(log.borrow().is_empty());
        row.set(&a, 3).unwrap();
        assert_eq!(*log.borrow(), vec!["changed:A"]);
    }

    #[test]
    fn test_row_belongs_to_one_table() {
        let (schema, _, _) = numbers();
        let first = Table::new(&schema);
        let second = Table::new(&schema);
        let row = first.add_row().unwrap();
        assert!(matches!(second.add(&row), Err(Error::InvalidOperation(_))));

        let other = TableSchema::new("Other");
        let stranger = Row::new(&other);
        let err = first.add(&stranger).unwrap_err();
        assert_eq!(err.validation_kind(), Some(ValidationKind::WrongSchema));
    }

    #[test]
    fn test_lazy_index_covers_existing_rows() {
        let (schema, a, _) = numbers();
        let table = Table::new(&schema);
        for i in 0..5 {
            table.add_row_with([("A", i % 2)]).unwrap();
        }
        a.add_index().unwrap();
        assert_eq!(table.find(&a, 1).unwrap().len(), 2);

        let row = table.row(0).unwrap();
        row.set(&a, 1).unwrap();
        let hits = table.find(&a, 1).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0], row);
        table.remove(&row).unwrap();
        assert_eq!(table.find(&a, 1).unwrap().len(), 2);
    }

    #[test]
    fn test_find_by_key() {
        let schema = TableSchema::new("Keyed");
        let id = schema.add_value_column("Id", ColumnType::Int32, 0).unwrap();
        schema.set_primary_key(Some(&id)).unwrap();
        let table = Table::new(&schema);
        let row = table.add_row_with([("Id", 7)]).unwrap();
        assert_eq!(table.find_by_key(7).unwrap(), Some(row));
        assert_eq!(table.find_by_key(8).unwrap(), None);
    }

    #[test]
    fn test_load_scope_emits_once() {
        let (schema, _, _) = numbers();
        let table = Table::new(&schema);
        let log = recorded(&table);
        {
            let _outer = table.begin_load();
            {
                let _inner = table.begin_load();
                table.add_row().unwrap();
            }
            assert!(table.is_loading());
        }
        assert!(!table.is_loading());
        assert_eq!(*log.borrow(), vec!["added@0", "loaded"]);
    }

    #[test]
    fn test_load_completion_dispatcher() {
        let (schema, _, _) = numbers();
        let table = Table::new(&schema);
        let queue: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Vec::new()));
        let pending = queue.clone();
        table.set_completion_dispatcher(move |job| pending.borrow_mut().push(job));
        let log = recorded(&table);

        drop(table.begin_load());
        assert!(log.borrow().is_empty());
        let jobs: Vec<_> = queue.borrow_mut().drain(..).collect();
        for job in jobs {
            job();
        }
        assert_eq!(*log.borrow(), vec!["loaded"]);
    }

    #[test]
    fn test_clear_removes_from_the_end() {
        let (schema, _, _) = numbers();
        let table = Table::new(&schema);
        table.add_row().unwrap();
        table.add_row().unwrap();
        let log = recorded(&table);
        table.clear().unwrap();
        assert!(table.is_empty());
        assert_eq!(*log.borrow(), vec!["removed@1", "removed@0"]);
    }
}
