/// Table schemas: the ordered set of column definitions shared by every row
/// (and every table) of one logical record type.
///
/// # Examples
///
/// ```
/// use singularity::{ColumnType, TableSchema, Table};
///
/// let schema = TableSchema::new("Pledges");
/// schema.add_value_column("Amount", ColumnType::Float64, 0.0).unwrap();
/// schema.add_value_column("Note", ColumnType::String, "").unwrap();
/// schema.add_calculated_column("Doubled", ColumnType::Float64, "Amount * 2").unwrap();
///
/// let table = Table::new(&schema);
/// let row = table.add_row().unwrap();
/// row.set("Amount", 18.0).unwrap();
/// assert_eq!(row.get("Doubled").unwrap().as_f64(), Some(36.0));
/// ```

use crate::calculated::{CalculatedState, Formula};
use crate::column::{Column, ColumnId, ColumnKind, KindState};
use crate::dependency::DependencySpec;
use crate::error::{Error, Result};
use crate::events::{EventHandlers, SchemaEvent, SubscriptionId};
use crate::expr::parse_expr;
use crate::relation::ChildRelation;
use crate::row::{Row, RowId, RowInner};
use crate::value::{ColumnType, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

pub type SchemaId = u64;

static NEXT_SCHEMA_ID: AtomicU64 = AtomicU64::new(1);

const INITIAL_PRUNE_THRESHOLD: usize = 64;

pub(crate) struct SchemaInner {
    id: SchemaId,
    name: RefCell<String>,
    columns: RefCell<Vec<Column>>,
    relations: RefCell<Vec<ChildRelation>>,
    primary_key: RefCell<Option<Column>>,
    /// Every live row constructed for this schema, attached or not.
    rows: RefCell<HashMap<RowId, Weak<RowInner>>>,
    prune_at: Cell<usize>,
    handlers: EventHandlers<SchemaEvent>,
}

/// Handle to a schema.
#[derive(Clone)]
pub struct TableSchema(pub(crate) Rc<SchemaInner>);

impl TableSchema {
    pub fn new(name: &str) -> Self {
        TableSchema(Rc::new(SchemaInner {
            id: NEXT_SCHEMA_ID.fetch_add(1, Ordering::Relaxed),
            name: RefCell::new(name.to_string()),
            columns: RefCell::new(Vec::new()),
            relations: RefCell::new(Vec::new()),
            primary_key: RefCell::new(None),
            rows: RefCell::new(HashMap::new()),
            prune_at: Cell::new(INITIAL_PRUNE_THRESHOLD),
            handlers: EventHandlers::new(),
        }))
    }

    pub fn id(&self) -> SchemaId {
        self.0.id
    }

    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.0.name.borrow_mut() = name.to_string();
    }

    pub fn columns(&self) -> Vec<Column> {
        self.0.columns.borrow().clone()
    }

    pub fn column(&self, name: &str) -> Option<Column> {
        self.0
            .columns
            .borrow()
            .iter()
            .find(|c| *c.0.name.borrow() == name)
            .cloned()
    }

    pub fn contains_column(&self, column: &Column) -> bool {
        self.0.columns.borrow().iter().any(|c| c == column)
    }

    pub fn foreign_keys(&self) -> Vec<Column> {
        self.columns_of_kind(ColumnKind::ForeignKey)
    }

    pub fn calculated_columns(&self) -> Vec<Column> {
        self.columns_of_kind(ColumnKind::Calculated)
    }

    fn columns_of_kind(&self, kind: ColumnKind) -> Vec<Column> {
        self.0
            .columns
            .borrow()
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    /// Relations in which this schema is the parent.
    pub fn child_relations(&self) -> Vec<ChildRelation> {
        self.0.relations.borrow().clone()
    }

    pub fn child_relation(&self, name: &str) -> Option<ChildRelation> {
        self.0
            .relations
            .borrow()
            .iter()
            .find(|r| r.name() == name)
            .cloned()
    }

    pub fn primary_key(&self) -> Option<Column> {
        self.0.primary_key.borrow().clone()
    }

    /// Designates a value column as primary key; this makes it unique.
    pub fn set_primary_key(&self, column: Option<&Column>) -> Result<()> {
        if let Some(column) = column {
            if !self.contains_column(column) || column.kind() != ColumnKind::Value {
                return Err(Error::schema(format!(
                    "primary key '{}' must be a value column of schema '{}'",
                    column.name(),
                    self.name()
                )));
            }
            column.make_unique(false)?;
        }
        *self.0.primary_key.borrow_mut() = column.cloned();
        self.emit(SchemaEvent::PrimaryKeyChanged(column.cloned()));
        Ok(())
    }

    /// Adds a plain scalar column. The column allows nulls iff its default is null.
    pub fn add_value_column(
        &self,
        name: &str,
        column_type: ColumnType,
        default: impl Into<Value>,
    ) -> Result<Column> {
        let default = default.into();
        self.check_name_available(name, None)?;
        if !default.is_null() && default.column_type() != Some(column_type) {
            return Err(Error::schema(format!(
                "default {:?} of column '{}' is not a {:?}",
                default, name, column_type
            )));
        }
        let allow_nulls = default.is_null();
        let column = Column::create(
            name,
            default,
            allow_nulls,
            KindState::Value {
                column_type,
                unique: Cell::new(false),
                indexed: Cell::new(false),
            },
        );
        self.attach_column(&column);
        Ok(column)
    }

    /// Adds a foreign key to `foreign` and registers the reverse navigation
    /// as `relation_name` on the foreign schema.
    pub fn add_foreign_key(&self, name: &str, foreign: &TableSchema, relation_name: &str) -> Result<Column> {
        self.check_name_available(name, None)?;
        foreign.check_name_available(relation_name, None)?;
        if foreign == self && name == relation_name {
            return Err(Error::schema(format!("'{}' is used twice in schema '{}'", name, self.name())));
        }
        let column = Column::create(
            name,
            Value::Null,
            true,
            KindState::ForeignKey {
                foreign: Rc::downgrade(&foreign.0),
                relation: RefCell::new(None),
                delete_rule: Cell::new(None),
            },
        );
        let relation = ChildRelation::new(relation_name, &column, foreign, self);
        if let KindState::ForeignKey { relation: slot, .. } = &column.0.kind {
            *slot.borrow_mut() = Some(relation.clone());
        }
        foreign.0.relations.borrow_mut().push(relation.clone());
        self.attach_column(&column);
        if foreign != self {
            foreign.emit(SchemaEvent::RelationAdded(relation));
        }
        Ok(column)
    }

    /// Adds a calculated column whose formula is an expression such as
    /// `"Amount * 2"` or `"SUM(Pledges.Amount)"`. Dependencies are derived
    /// from the expression and resolved on first evaluation.
    pub fn add_calculated_column(&self, name: &str, column_type: ColumnType, expression: &str) -> Result<Column> {
        let expr = parse_expr(expression)?;
        let dependencies = expr.dependencies();
        self.add_calculated(name, column_type, Formula::Expr(expr), dependencies)
    }

    /// Adds a calculated column backed by a native function. `dependencies`
    /// declares what the function reads; names are resolved lazily so they may
    /// refer to relations that are declared later.
    pub fn add_native_calculated_column<F>(
        &self,
        name: &str,
        column_type: ColumnType,
        dependencies: DependencySpec,
        func: F,
    ) -> Result<Column>
    where
        F: Fn(&Row) -> Result<Value> + 'static,
    {
        self.add_calculated(name, column_type, Formula::Native(Rc::new(func)), dependencies)
    }

    fn add_calculated(
        &self,
        name: &str,
        column_type: ColumnType,
        formula: Formula,
        dependencies: DependencySpec,
    ) -> Result<Column> {
        self.check_name_available(name, None)?;
        let column = Column::create(
            name,
            Value::Null,
            true,
            KindState::Calculated(CalculatedState::new(column_type, formula, dependencies)),
        );
        self.attach_column(&column);
        Ok(column)
    }

    fn attach_column(&self, column: &Column) {
        *column.0.schema.borrow_mut() = Rc::downgrade(&self.0);
        self.0.columns.borrow_mut().push(column.clone());
        if !column.is_calculated() {
            for row in self.live_rows() {
                row.seed_value(column);
            }
        }
        log::debug!("added column '{}' to schema '{}'", column.name(), self.name());
        self.emit(SchemaEvent::ColumnAdded(column.clone()));
    }

    /// Removes a column. Removing a foreign key also removes its child
    /// relation from the parent schema; cached child collections raise
    /// `RowRemoved` for each of their rows and are dropped.
    pub fn remove_column(&self, column: &Column) -> Result<()> {
        let position = self
            .0
            .columns
            .borrow()
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| Error::schema(format!("column '{}' is not in schema '{}'", column.name(), self.name())))?;
        self.0.columns.borrow_mut().remove(position);
        *column.0.schema.borrow_mut() = Weak::new();

        let was_key = self.primary_key().as_ref() == Some(column);
        if was_key {
            *self.0.primary_key.borrow_mut() = None;
        }
        for row in self.live_rows() {
            row.forget_column(column);
        }
        if let Some(state) = column.calculated() {
            state.reset();
        }
        if let (Some(relation), Some(foreign)) = (column.child_relation(), column.foreign_schema()) {
            foreign.0.relations.borrow_mut().retain(|r| *r != relation);
            for parent in foreign.live_rows() {
                if let Some(collection) = parent.cached_children(&relation) {
                    collection.release();
                }
                parent.drop_child_collection(&relation);
            }
            if foreign != *self {
                foreign.emit(SchemaEvent::RelationRemoved(relation));
            }
        }
        log::debug!("removed column '{}' from schema '{}'", column.name(), self.name());
        self.emit(SchemaEvent::ColumnRemoved(column.clone()));
        Ok(())
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SchemaEvent) + 'static,
    {
        self.0.handlers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.0.handlers.unsubscribe(id)
    }

    pub(crate) fn emit(&self, event: SchemaEvent) {
        self.0.handlers.emit(&event);
    }

    /// Column names and child relation names share one namespace.
    pub(crate) fn check_name_available(&self, name: &str, exclude: Option<ColumnId>) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::schema("names cannot be empty"));
        }
        let taken_by_column = self
            .0
            .columns
            .borrow()
            .iter()
            .any(|c| Some(c.id()) != exclude && *c.0.name.borrow() == name);
        let taken_by_relation = self.0.relations.borrow().iter().any(|r| r.name() == name);
        if taken_by_column || taken_by_relation {
            return Err(Error::schema(format!(
                "schema '{}' already has a column or relation named '{}'",
                self.name(),
                name
            )));
        }
        Ok(())
    }

    pub(crate) fn register_row(&self, row: &Row) {
        let mut rows = self.0.rows.borrow_mut();
        if rows.len() >= self.0.prune_at.get() {
            rows.retain(|_, weak| weak.strong_count() > 0);
            self.0.prune_at.set((rows.len() * 2).max(INITIAL_PRUNE_THRESHOLD));
        }
        rows.insert(row.id(), Rc::downgrade(&row.0));
    }

    /// Every live row of this schema, attached or detached.
    pub(crate) fn live_rows(&self) -> Vec<Row> {
        let mut rows = self.0.rows.borrow_mut();
        rows.retain(|_, weak| weak.strong_count() > 0);
        let mut live: Vec<Row> = rows.values().filter_map(Weak::upgrade).map(Row).collect();
        live.sort_by_key(|row| row.id());
        live
    }

    /// Rows of this schema currently attached to any table.
    pub(crate) fn attached_rows(&self) -> Vec<Row> {
        self.live_rows().into_iter().filter(|r| r.is_attached()).collect()
    }
}

impl PartialEq for TableSchema {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TableSchema {}

impl Hash for TableSchema {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TableSchema {{ name: '{}', columns: {} }}",
            self.name(),
            self.0.columns.borrow().len()
        )
    }
}
