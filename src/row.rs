/// Rows: a mutable bag of column values belonging to exactly one schema.
///
/// A row is either detached (no table; calculated columns report their
/// default, child relations are unavailable) or attached to exactly one
/// `Table`. Writes validate first and mutate second, so a rejected write leaves
/// no trace and fires no event.

use crate::column::{AsColumn, Column, ColumnId, ColumnKind};
use crate::dependency;
use crate::error::{Error, Result, ValidationKind};
use crate::relation::{self, ChildRelation, ChildRowCollection, RelationId};
use crate::schema::TableSchema;
use crate::table::{Table, TableInner};
use crate::typed::FromValue;
use crate::value::{ColumnType, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

pub type RowId = u64;

static NEXT_ROW_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct RowInner {
    id: RowId,
    schema: TableSchema,
    /// Value and foreign-key column slots.
    values: RefCell<HashMap<ColumnId, Value>>,
    /// Calculated values; a missing entry means "not computed yet".
    calculated: RefCell<HashMap<ColumnId, Value>>,
    evaluating: RefCell<Vec<ColumnId>>,
    table: RefCell<Weak<TableInner>>,
    children: RefCell<HashMap<RelationId, ChildRowCollection>>,
}

/// Handle to a row. Clones share the same storage.
#[derive(Clone)]
pub struct Row(pub(crate) Rc<RowInner>);

impl Row {
    /// Creates a detached row seeded with every column's default value.
    ///
    /// A GUID primary key without a default receives a fresh identifier.
    pub fn new(schema: &TableSchema) -> Row {
        let mut values = HashMap::new();
        for column in schema.columns() {
            if !column.is_calculated() {
                values.insert(column.id(), column.default_value());
            }
        }
        if let Some(key) = schema.primary_key() {
            let unset = values.get(&key.id()).map_or(true, |v| v.is_null() || *v == Value::Guid(Uuid::nil()));
            if key.column_type() == Some(ColumnType::Guid) && unset {
                values.insert(key.id(), Value::Guid(Uuid::new_v4()));
            }
        }
        let row = Row(Rc::new(RowInner {
            id: NEXT_ROW_ID.fetch_add(1, Ordering::Relaxed),
            schema: schema.clone(),
            values: RefCell::new(values),
            calculated: RefCell::new(HashMap::new()),
            evaluating: RefCell::new(Vec::new()),
            table: RefCell::new(Weak::new()),
            children: RefCell::new(HashMap::new()),
        }));
        schema.register_row(&row);
        row
    }

    pub fn id(&self) -> RowId {
        self.0.id
    }

    pub fn schema(&self) -> TableSchema {
        self.0.schema.clone()
    }

    /// The owning table, if attached.
    pub fn table(&self) -> Option<Table> {
        self.0.table.borrow().upgrade().map(Table)
    }

    pub fn is_attached(&self) -> bool {
        self.0.table.borrow().strong_count() > 0
    }

    /// Reads a value. Calculated columns are evaluated on first read and
    /// cached until one of their dependencies changes.
    pub fn get<C: AsColumn>(&self, column: C) -> Result<Value> {
        let column = column.resolve(&self.0.schema)?;
        self.value(&column)
    }

    /// Reads a value converted to a Rust type.
    pub fn get_as<T: FromValue, C: AsColumn>(&self, column: C) -> Result<T> {
        let column = column.resolve(&self.0.schema)?;
        let value = self.value(&column)?;
        T::from_value(&value).ok_or_else(|| {
            Error::validation(
                &column.name(),
                ValidationKind::TypeMismatch,
                format!("cannot convert {:?} to {}", value, std::any::type_name::<T>()),
            )
        })
    }

    /// Writes a value. A write of the current value is a no-op.
    pub fn set<C: AsColumn>(&self, column: C, value: impl Into<Value>) -> Result<()> {
        let column = column.resolve(&self.0.schema)?;
        self.assign(&column, value.into(), false)
    }

    /// The parent row referenced by a foreign-key column.
    pub fn parent<C: AsColumn>(&self, foreign_key: C) -> Result<Option<Row>> {
        let column = foreign_key.resolve(&self.0.schema)?;
        if !column.is_foreign_key() {
            return Err(Error::invalid(format!("'{}' is not a foreign key", column.name())));
        }
        Ok(self.raw_value(&column).as_row().cloned())
    }

    /// The live collection of child rows for a relation of this row's schema.
    ///
    /// Requires the row to be attached to a table inside a `DataContext` that
    /// holds a table for the child schema.
    pub fn children(&self, relation: &ChildRelation) -> Result<ChildRowCollection> {
        if relation.parent_schema().as_ref() != Some(&self.0.schema) {
            return Err(Error::invalid(format!(
                "relation '{}' does not belong to schema '{}'",
                relation.name(),
                self.0.schema.name()
            )));
        }
        if let Some(existing) = self.cached_children(relation) {
            return Ok(existing);
        }
        let table = self
            .table()
            .ok_or_else(|| Error::invalid("child relations are unavailable on detached rows"))?;
        let context = table
            .context()
            .ok_or_else(|| Error::invalid("child relations require the table to belong to a DataContext"))?;
        let child_schema = relation
            .child_schema()
            .ok_or_else(|| Error::invalid(format!("relation '{}' was removed", relation.name())))?;
        let child_table = context.table(&child_schema).ok_or_else(|| {
            Error::invalid(format!(
                "data context has no table for schema '{}'",
                child_schema.name()
            ))
        })?;
        let collection = ChildRowCollection::build(self, relation, &child_table);
        self.0
            .children
            .borrow_mut()
            .insert(relation.id(), collection.clone());
        Ok(collection)
    }

    pub fn children_by_name(&self, relation: &str) -> Result<ChildRowCollection> {
        let relation = self.0.schema.child_relation(relation).ok_or_else(|| {
            Error::invalid(format!(
                "schema '{}' has no child relation '{}'",
                self.0.schema.name(),
                relation
            ))
        })?;
        self.children(&relation)
    }

    /// Removes this row from its table.
    pub fn remove(&self) -> Result<()> {
        let table = self
            .table()
            .ok_or_else(|| Error::invalid("cannot remove a detached row"))?;
        table.remove(self)
    }

    pub(crate) fn value(&self, column: &Column) -> Result<Value> {
        match column.calculated() {
            Some(state) => self.calculated_value(column, state),
            None => Ok(self.raw_value(column)),
        }
    }

    /// The stored value of a value or foreign-key column.
    pub(crate) fn raw_value(&self, column: &Column) -> Value {
        self.0
            .values
            .borrow()
            .get(&column.id())
            .cloned()
            .unwrap_or_else(|| column.default_value())
    }

    fn calculated_value(&self, column: &Column, state: &crate::calculated::CalculatedState) -> Result<Value> {
        if !self.is_attached() {
            return Ok(column.default_value());
        }
        if let Some(cached) = self.0.calculated.borrow().get(&column.id()) {
            return Ok(cached.clone());
        }
        if self.0.evaluating.borrow().contains(&column.id()) {
            return Err(Error::invalid(format!(
                "calculated column '{}' depends on itself",
                column.name()
            )));
        }
        self.0.evaluating.borrow_mut().push(column.id());
        let result = state.evaluate(column, self);
        self.0.evaluating.borrow_mut().retain(|id| *id != column.id());
        let value = result?;
        if self.is_attached() {
            self.0
                .calculated
                .borrow_mut()
                .insert(column.id(), value.clone());
        }
        Ok(value)
    }

    /// Validates and stores a value, then runs the change reactions.
    pub(crate) fn assign(&self, column: &Column, value: Value, allow_read_only: bool) -> Result<()> {
        if column.is_calculated() || (column.is_read_only() && !allow_read_only) {
            return Err(Error::validation(
                &column.name(),
                ValidationKind::ReadOnly,
                "column is read-only",
            ));
        }
        let old = self.raw_value(column);
        if old == value {
            return Ok(());
        }
        column.validate_value_type(&value)?;
        let table = self.table();
        if let Some(table) = &table {
            table.check_unique(column, &value, self)?;
        }
        self.0.values.borrow_mut().insert(column.id(), value.clone());
        if let Some(table) = table {
            self.after_value_changed(&table, column, &old, &value);
        }
        Ok(())
    }

    /// Reactions to a validated change of an attached row, in order: index
    /// maintenance, child collection maintenance, dependency invalidation,
    /// table notification.
    pub(crate) fn after_value_changed(&self, table: &Table, column: &Column, old: &Value, new: &Value) {
        match column.kind() {
            ColumnKind::Value => table.update_index(self, column, old, new),
            ColumnKind::ForeignKey => relation::move_between_parents(self, column, old, new),
            ColumnKind::Calculated => {}
        }
        relation::notify_sibling_collections(self, column);
        dependency::notify_value_changed(column, self, old, new);
        table.emit_value_changed(self, column);
    }

    /// Drops a cached calculated value so the next read recomputes it.
    pub(crate) fn invalidate_calculated(&self, column: &Column) {
        let removed = self.0.calculated.borrow_mut().remove(&column.id());
        if let (Some(old), Some(table)) = (removed, self.table()) {
            log::trace!("invalidated '{}' on row {}", column.name(), self.id());
            self.after_value_changed(&table, column, &old, &Value::Null);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_calculated_cached(&self, column: &Column) -> bool {
        self.0.calculated.borrow().contains_key(&column.id())
    }

    pub(crate) fn seed_value(&self, column: &Column) {
        self.0
            .values
            .borrow_mut()
            .insert(column.id(), column.default_value());
    }

    pub(crate) fn forget_column(&self, column: &Column) {
        self.0.values.borrow_mut().remove(&column.id());
        self.0.calculated.borrow_mut().remove(&column.id());
    }

    pub(crate) fn cached_children(&self, relation: &ChildRelation) -> Option<ChildRowCollection> {
        self.0.children.borrow().get(&relation.id()).cloned()
    }

    pub(crate) fn drop_child_collection(&self, relation: &ChildRelation) {
        self.0.children.borrow_mut().remove(&relation.id());
    }

    pub(crate) fn drop_child_collections(&self) {
        let dropped: Vec<ChildRowCollection> = self.0.children.borrow_mut().drain().map(|(_, c)| c).collect();
        drop(dropped);
    }

    /// Marks the row as owned by `table`. Calculated values start uncomputed.
    pub(crate) fn attach(&self, table: &Table) {
        *self.0.table.borrow_mut() = Rc::downgrade(&table.0);
        self.0.calculated.borrow_mut().clear();
    }

    /// Clears the owning table; calculated columns fall back to defaults.
    pub(crate) fn detach(&self) {
        *self.0.table.borrow_mut() = Weak::new();
        self.0.calculated.borrow_mut().clear();
        self.drop_child_collections();
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Row {}

impl Hash for Row {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Row {{ id: {}, schema: '{}', attached: {} }}",
            self.0.id,
            self.0.schema.name(),
            self.is_attached()
        )
    }
}
