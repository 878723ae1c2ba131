/// Singularity Column Definitions
///
/// A Column is a named, typed slot that rows of one schema hold a value for.
/// Columns come in three kinds:
///
/// - value columns: plain scalars, optionally nullable, unique or indexed
/// - foreign-key columns: hold a parent `Row` and own a `ChildRelation`
///   registered on the parent schema
/// - calculated columns: read-only, derived lazily from a formula and cached
///   per row until a dependency changes
///
/// A column belongs to exactly one schema from the moment it is added until it
/// is removed. Column handles are cheap to clone and compare by identity.

use crate::calculated::CalculatedState;
use crate::dependency::WatchPoint;
use crate::error::{Error, Result, ValidationKind};
use crate::events::SchemaEvent;
use crate::relation::ChildRelation;
use crate::schema::{SchemaInner, TableSchema};
use crate::value::{ColumnType, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

pub type ColumnId = u64;

static NEXT_COLUMN_ID: AtomicU64 = AtomicU64::new(1);

/// Which variant a column is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Value,
    ForeignKey,
    Calculated,
}

/// What happens to child rows when their parent row is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteRule {
    /// Set the foreign key to null.
    Orphan,
    /// Remove the child row as well.
    Cascade,
}

pub(crate) enum KindState {
    Value {
        column_type: ColumnType,
        unique: Cell<bool>,
        indexed: Cell<bool>,
    },
    ForeignKey {
        foreign: Weak<SchemaInner>,
        relation: RefCell<Option<ChildRelation>>,
        delete_rule: Cell<Option<DeleteRule>>,
    },
    Calculated(CalculatedState),
}

pub(crate) struct ColumnInner {
    pub(crate) id: ColumnId,
    pub(crate) name: RefCell<String>,
    pub(crate) schema: RefCell<Weak<SchemaInner>>,
    pub(crate) default: RefCell<Value>,
    pub(crate) read_only: Cell<bool>,
    pub(crate) allow_nulls: Cell<bool>,
    pub(crate) watchers: RefCell<Vec<Weak<WatchPoint>>>,
    pub(crate) kind: KindState,
}

/// Handle to a column definition.
#[derive(Clone)]
pub struct Column(pub(crate) Rc<ColumnInner>);

impl Column {
    pub(crate) fn create(name: &str, default: Value, allow_nulls: bool, kind: KindState) -> Column {
        let read_only = matches!(kind, KindState::Calculated(_));
        Column(Rc::new(ColumnInner {
            id: NEXT_COLUMN_ID.fetch_add(1, Ordering::Relaxed),
            name: RefCell::new(name.to_string()),
            schema: RefCell::new(Weak::new()),
            default: RefCell::new(default),
            read_only: Cell::new(read_only),
            allow_nulls: Cell::new(allow_nulls),
            watchers: RefCell::new(Vec::new()),
            kind,
        }))
    }

    pub fn id(&self) -> ColumnId {
        self.0.id
    }

    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    /// Renames the column. The name must stay unique among the schema's
    /// columns and child relations.
    pub fn set_name(&self, name: &str) -> Result<()> {
        let old_name = self.name();
        if old_name == name {
            return Ok(());
        }
        let schema = self.owning_schema()?;
        schema.check_name_available(name, Some(self.id()))?;
        *self.0.name.borrow_mut() = name.to_string();
        log::debug!("renamed column '{}' to '{}' in schema '{}'", old_name, name, schema.name());
        schema.emit(SchemaEvent::ColumnRenamed {
            column: self.clone(),
            old_name,
        });
        Ok(())
    }

    pub fn kind(&self) -> ColumnKind {
        match self.0.kind {
            KindState::Value { .. } => ColumnKind::Value,
            KindState::ForeignKey { .. } => ColumnKind::ForeignKey,
            KindState::Calculated(_) => ColumnKind::Calculated,
        }
    }

    pub fn is_calculated(&self) -> bool {
        self.kind() == ColumnKind::Calculated
    }

    pub fn is_foreign_key(&self) -> bool {
        self.kind() == ColumnKind::ForeignKey
    }

    /// The schema that owns this column; `None` once removed.
    pub fn schema(&self) -> Option<TableSchema> {
        self.0.schema.borrow().upgrade().map(TableSchema)
    }

    pub(crate) fn owning_schema(&self) -> Result<TableSchema> {
        self.schema()
            .ok_or_else(|| Error::invalid(format!("column '{}' does not belong to a schema", self.name())))
    }

    /// The scalar type of the column; `None` for foreign keys.
    pub fn column_type(&self) -> Option<ColumnType> {
        match &self.0.kind {
            KindState::Value { column_type, .. } => Some(*column_type),
            KindState::ForeignKey { .. } => None,
            KindState::Calculated(state) => Some(state.column_type),
        }
    }

    pub fn default_value(&self) -> Value {
        self.0.default.borrow().clone()
    }

    pub fn set_default_value(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if !self.is_calculated() {
            self.validate_value_type(&value)?;
        } else if !value.is_null() && value.column_type() != self.column_type() {
            return Err(Error::validation(
                &self.name(),
                ValidationKind::TypeMismatch,
                format!("default {:?} does not match {:?}", value, self.column_type()),
            ));
        }
        *self.0.default.borrow_mut() = value;
        self.notify_changed();
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.0.read_only.get()
    }

    pub fn set_read_only(&self, read_only: bool) -> Result<()> {
        if self.is_calculated() && !read_only {
            return Err(Error::schema(format!(
                "calculated column '{}' is always read-only",
                self.name()
            )));
        }
        if self.0.read_only.replace(read_only) != read_only {
            self.notify_changed();
        }
        Ok(())
    }

    pub fn allow_nulls(&self) -> bool {
        self.0.allow_nulls.get()
    }

    /// Changes nullability. Disallowing nulls fails while any attached row
    /// holds a null in this column.
    pub fn set_allow_nulls(&self, allow: bool) -> Result<()> {
        if self.is_calculated() {
            return Err(Error::schema("calculated columns have no nullability constraint"));
        }
        if self.allow_nulls() == allow {
            return Ok(());
        }
        if !allow {
            let schema = self.owning_schema()?;
            let has_null = schema
                .attached_rows()
                .iter()
                .any(|row| row.raw_value(self).is_null());
            if has_null {
                return Err(Error::schema(format!(
                    "column '{}' contains null values",
                    self.name()
                )));
            }
        }
        self.0.allow_nulls.set(allow);
        self.notify_changed();
        Ok(())
    }

    pub fn is_unique(&self) -> bool {
        match &self.0.kind {
            KindState::Value { unique, .. } => unique.get(),
            _ => false,
        }
    }

    /// Makes the column unique. Fails if two attached rows share a value;
    /// once unique, a column can never be made non-unique again.
    pub fn set_unique(&self, make_unique: bool) -> Result<()> {
        if make_unique {
            return self.make_unique(true);
        }
        if self.is_unique() {
            return Err(Error::schema(format!(
                "column '{}' is unique and cannot be made non-unique",
                self.name()
            )));
        }
        match &self.0.kind {
            KindState::Value { .. } => Ok(()),
            _ => Err(Error::schema(format!(
                "only value columns can be unique ('{}')",
                self.name()
            ))),
        }
    }

    /// Turns uniqueness on. `notify` is false when the caller raises its
    /// own schema event for the same mutation.
    pub(crate) fn make_unique(&self, notify: bool) -> Result<()> {
        let KindState::Value { unique, indexed, .. } = &self.0.kind else {
            return Err(Error::schema(format!(
                "only value columns can be unique ('{}')",
                self.name()
            )));
        };
        if unique.get() {
            return Ok(());
        }
        let schema = self.owning_schema()?;
        let mut seen = std::collections::HashSet::new();
        for row in schema.attached_rows() {
            let value = row.raw_value(self);
            if !seen.insert(value.clone()) {
                return Err(Error::schema(format!(
                    "column '{}' has duplicate value {}",
                    self.name(),
                    value
                )));
            }
        }
        unique.set(true);
        indexed.set(true);
        log::debug!("column '{}' is now unique", self.name());
        if notify {
            self.notify_changed();
        }
        Ok(())
    }

    pub fn has_index(&self) -> bool {
        match &self.0.kind {
            KindState::Value { indexed, .. } => indexed.get(),
            _ => false,
        }
    }

    /// Requests a value index. Tables build it on first use from all of their
    /// current rows.
    pub fn add_index(&self) -> Result<()> {
        let KindState::Value { indexed, .. } = &self.0.kind else {
            return Err(Error::schema(format!(
                "only value columns can be indexed ('{}')",
                self.name()
            )));
        };
        if !indexed.replace(true) {
            self.notify_changed();
        }
        Ok(())
    }

    /// For foreign keys: the parent schema.
    pub fn foreign_schema(&self) -> Option<TableSchema> {
        match &self.0.kind {
            KindState::ForeignKey { foreign, .. } => foreign.upgrade().map(TableSchema),
            _ => None,
        }
    }

    /// For foreign keys: the relation registered on the parent schema.
    pub fn child_relation(&self) -> Option<ChildRelation> {
        match &self.0.kind {
            KindState::ForeignKey { relation, .. } => relation.borrow().clone(),
            _ => None,
        }
    }

    /// For foreign keys: the rule applied when a parent row is removed.
    pub fn delete_rule(&self) -> Option<DeleteRule> {
        match &self.0.kind {
            KindState::ForeignKey { delete_rule, .. } => Some(delete_rule.get().unwrap_or(
                if self.allow_nulls() {
                    DeleteRule::Orphan
                } else {
                    DeleteRule::Cascade
                },
            )),
            _ => None,
        }
    }

    pub fn set_delete_rule(&self, rule: DeleteRule) -> Result<()> {
        match &self.0.kind {
            KindState::ForeignKey { delete_rule, .. } => {
                delete_rule.set(Some(rule));
                Ok(())
            }
            _ => Err(Error::schema("delete rules apply to foreign keys only")),
        }
    }

    pub(crate) fn calculated(&self) -> Option<&CalculatedState> {
        match &self.0.kind {
            KindState::Calculated(state) => Some(state),
            _ => None,
        }
    }

    /// Checks type and nullability of a candidate value.
    pub(crate) fn validate_value_type(&self, value: &Value) -> Result<()> {
        let name = self.name();
        if value.is_null() {
            if !self.allow_nulls() {
                return Err(Error::validation(&name, ValidationKind::NullNotAllowed, "null is not allowed"));
            }
            return Ok(());
        }
        match &self.0.kind {
            KindState::Value { column_type, .. } => {
                if value.column_type() != Some(*column_type) {
                    return Err(Error::validation(
                        &name,
                        ValidationKind::TypeMismatch,
                        format!("expected {:?}, got {:?}", column_type, value),
                    ));
                }
                Ok(())
            }
            KindState::ForeignKey { foreign, .. } => match value {
                Value::Row(parent) => {
                    let expected = foreign.upgrade().map(TableSchema);
                    if expected.as_ref() != Some(&parent.schema()) {
                        return Err(Error::validation(
                            &name,
                            ValidationKind::WrongSchema,
                            format!("row of schema '{}' cannot be a parent here", parent.schema().name()),
                        ));
                    }
                    Ok(())
                }
                other => Err(Error::validation(
                    &name,
                    ValidationKind::TypeMismatch,
                    format!("expected a parent row, got {:?}", other),
                )),
            },
            KindState::Calculated(_) => Err(Error::validation(
                &name,
                ValidationKind::ReadOnly,
                "calculated columns cannot be assigned",
            )),
        }
    }

    pub(crate) fn add_watcher(&self, point: &Rc<WatchPoint>) {
        self.0.watchers.borrow_mut().push(Rc::downgrade(point));
    }

    /// Live dependency registrations on this column.
    pub(crate) fn live_watchers(&self) -> Vec<Rc<WatchPoint>> {
        let mut watchers = self.0.watchers.borrow_mut();
        watchers.retain(|w| w.strong_count() > 0);
        watchers.iter().filter_map(Weak::upgrade).collect()
    }

    fn notify_changed(&self) {
        if let Some(schema) = self.schema() {
            schema.emit(SchemaEvent::ColumnChanged(self.clone()));
        }
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Column {}

impl Hash for Column {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Column {{ name: '{}', kind: {:?} }}", self.name(), self.kind())
    }
}

/// Anything that names a column of a schema: a handle or a column name.
pub trait AsColumn {
    fn resolve(&self, schema: &TableSchema) -> Result<Column>;
}

impl AsColumn for Column {
    fn resolve(&self, schema: &TableSchema) -> Result<Column> {
        <&Column as AsColumn>::resolve(&self, schema)
    }
}

impl AsColumn for &Column {
    fn resolve(&self, schema: &TableSchema) -> Result<Column> {
        if self.schema().as_ref() != Some(schema) {
            return Err(Error::validation(
                &self.name(),
                ValidationKind::WrongSchema,
                format!("column does not belong to schema '{}'", schema.name()),
            ));
        }
        Ok((*self).clone())
    }
}

impl AsColumn for &str {
    fn resolve(&self, schema: &TableSchema) -> Result<Column> {
        schema
            .column(self)
            .ok_or_else(|| Error::invalid(format!("schema '{}' has no column '{}'", schema.name(), self)))
    }
}

impl AsColumn for String {
    fn resolve(&self, schema: &TableSchema) -> Result<Column> {
        self.as_str().resolve(schema)
    }
}
