/// Parent/child navigation implied by foreign keys.
///
/// A `ChildRelation` is the schema-level edge; a `ChildRowCollection` is its
/// per-parent-row realization, built lazily by scanning the child table and
/// then maintained incrementally by foreign-key writes and row attach/detach.

use crate::column::{Column, ColumnInner, DeleteRule};
use crate::error::Result;
use crate::events::{EventHandlers, SubscriptionId, TableEvent};
use crate::filtered::merge_position;
use crate::row::{Row, RowInner};
use crate::schema::{SchemaInner, TableSchema};
use crate::table::{Table, TableInner};
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

pub type RelationId = u64;

static NEXT_RELATION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct RelationInner {
    id: RelationId,
    name: String,
    foreign_key: Weak<ColumnInner>,
    parent: Weak<SchemaInner>,
    child: Weak<SchemaInner>,
}

/// A named edge from a parent schema to a child schema through one
/// foreign-key column.
#[derive(Clone)]
pub struct ChildRelation(pub(crate) Rc<RelationInner>);

impl ChildRelation {
    pub(crate) fn new(name: &str, foreign_key: &Column, parent: &TableSchema, child: &TableSchema) -> Self {
        ChildRelation(Rc::new(RelationInner {
            id: NEXT_RELATION_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            foreign_key: Rc::downgrade(&foreign_key.0),
            parent: Rc::downgrade(&parent.0),
            child: Rc::downgrade(&child.0),
        }))
    }

    pub fn id(&self) -> RelationId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The foreign-key column in the child schema.
    pub fn foreign_key(&self) -> Option<Column> {
        self.0.foreign_key.upgrade().map(Column)
    }

    pub fn parent_schema(&self) -> Option<TableSchema> {
        self.0.parent.upgrade().map(TableSchema)
    }

    pub fn child_schema(&self) -> Option<TableSchema> {
        self.0.child.upgrade().map(TableSchema)
    }
}

impl PartialEq for ChildRelation {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ChildRelation {}

impl fmt::Debug for ChildRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChildRelation {{ name: '{}' }}", self.0.name)
    }
}

pub(crate) struct CollectionInner {
    parent: Weak<RowInner>,
    relation: ChildRelation,
    child_table: Weak<TableInner>,
    rows: RefCell<Vec<Row>>,
    handlers: EventHandlers<TableEvent>,
}

/// The live, order-preserving list of child rows whose foreign key currently
/// equals one parent row.
#[derive(Clone)]
pub struct ChildRowCollection(pub(crate) Rc<CollectionInner>);

impl ChildRowCollection {
    pub(crate) fn build(parent: &Row, relation: &ChildRelation, child_table: &Table) -> Self {
        let key = Value::Row(parent.clone());
        let rows = match relation.foreign_key() {
            Some(fk) => child_table
                .rows()
                .into_iter()
                .filter(|child| child.raw_value(&fk) == key)
                .collect(),
            None => Vec::new(),
        };
        log::trace!(
            "materialized '{}' for row {} ({} rows)",
            relation.name(),
            parent.id(),
            rows.len()
        );
        ChildRowCollection(Rc::new(CollectionInner {
            parent: Rc::downgrade(&parent.0),
            relation: relation.clone(),
            child_table: Rc::downgrade(&child_table.0),
            rows: RefCell::new(rows),
            handlers: EventHandlers::new(),
        }))
    }

    pub fn parent(&self) -> Option<Row> {
        self.0.parent.upgrade().map(Row)
    }

    pub fn relation(&self) -> ChildRelation {
        self.0.relation.clone()
    }

    pub fn child_table(&self) -> Option<Table> {
        self.0.child_table.upgrade().map(Table)
    }

    pub fn len(&self) -> usize {
        self.0.rows.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.rows.borrow().is_empty()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.0.rows.borrow().clone()
    }

    pub fn row(&self, index: usize) -> Option<Row> {
        self.0.rows.borrow().get(index).cloned()
    }

    pub fn contains(&self, row: &Row) -> bool {
        self.0.rows.borrow().contains(row)
    }

    pub fn index_of(&self, row: &Row) -> Option<usize> {
        self.0.rows.borrow().iter().position(|r| r == row)
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

    fn is_for_table(&self, table: &Table) -> bool {
        self.0
            .child_table
            .upgrade()
            .map_or(false, |inner| Rc::ptr_eq(&inner, &table.0))
    }

    fn insert_row(&self, row: &Row) {
        if self.contains(row) {
            return;
        }
        let index = match self.child_table() {
            Some(table) => merge_position(&table.rows(), &self.0.rows.borrow(), row),
            None => self.len(),
        };
        self.0.rows.borrow_mut().insert(index, row.clone());
        self.0.handlers.emit(&TableEvent::RowAdded {
            row: row.clone(),
            index,
        });
    }

    fn remove_row(&self, row: &Row) {
        let Some(index) = self.index_of(row) else {
            return;
        };
        self.0.rows.borrow_mut().remove(index);
        self.0.handlers.emit(&TableEvent::RowRemoved {
            row: row.clone(),
            index,
        });
    }

    /// Empties the collection, last row first, raising RowRemoved for each.
    pub(crate) fn release(&self) {
        loop {
            let last = self.0.rows.borrow().last().cloned();
            match last {
                Some(row) => self.remove_row(&row),
                None => break,
            }
        }
    }

    fn forward_value_changed(&self, row: &Row, column: &Column) {
        if self.contains(row) {
            self.0.handlers.emit(&TableEvent::ValueChanged {
                row: row.clone(),
                column: column.clone(),
            });
        }
    }
}

impl fmt::Debug for ChildRowCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChildRowCollection {{ relation: '{}', rows: {} }}",
            self.0.relation.name(),
            self.len()
        )
    }
}

/// Materialized collection of `parent` for the relation owned by `fk`.
fn cached_collection(parent: &Value, fk: &Column) -> Option<ChildRowCollection> {
    let parent = parent.as_row()?;
    let relation = fk.child_relation()?;
    parent.cached_children(&relation)
}

/// Adds a freshly attached row to its parents' materialized collections.
pub(crate) fn attach_to_parents(row: &Row, table: &Table) {
    for fk in row.schema().foreign_keys() {
        if let Some(collection) = cached_collection(&row.raw_value(&fk), &fk) {
            if collection.is_for_table(table) {
                collection.insert_row(row);
            }
        }
    }
}

/// Removes a row being detached from its parents' materialized collections.
pub(crate) fn detach_from_parents(row: &Row) {
    for fk in row.schema().foreign_keys() {
        if let Some(collection) = cached_collection(&row.raw_value(&fk), &fk) {
            collection.remove_row(row);
        }
    }
}

/// Foreign-key write: leave the old parent's collection, join the new one.
/// Neither side is materialized by this.
pub(crate) fn move_between_parents(row: &Row, fk: &Column, old: &Value, new: &Value) {
    if let Some(collection) = cached_collection(old, fk) {
        collection.remove_row(row);
    }
    let Some(table) = row.table() else {
        return;
    };
    if let Some(collection) = cached_collection(new, fk) {
        if collection.is_for_table(&table) {
            collection.insert_row(row);
        }
    }
}

/// Makes a write to `column` visible through every other parent's
/// collection holding this row.
pub(crate) fn notify_sibling_collections(row: &Row, column: &Column) {
    for fk in row.schema().foreign_keys() {
        if fk == *column {
            continue;
        }
        if let Some(collection) = cached_collection(&row.raw_value(&fk), &fk) {
            collection.forward_value_changed(row, column);
        }
    }
}

/// Applies each child relation's delete rule to the children of a parent
/// row that is about to be removed. Rows outside a `DataContext` have no
/// reachable children.
pub(crate) fn release_children(parent: &Row) -> Result<()> {
    let Some(context) = parent.table().and_then(|table| table.context()) else {
        return Ok(());
    };
    for relation in parent.schema().child_relations() {
        let (Some(fk), Some(child_schema)) = (relation.foreign_key(), relation.child_schema()) else {
            continue;
        };
        if context.table(&child_schema).is_none() {
            continue;
        }
        let children = parent.children(&relation)?.rows();
        let rule = fk.delete_rule().unwrap_or(DeleteRule::Orphan);
        for child in children {
            if child == *parent || !child.is_attached() {
                continue;
            }
            match rule {
                DeleteRule::Orphan => child.assign(&fk, Value::Null, true)?,
                DeleteRule::Cascade => child.remove()?,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataContext;
    use crate::value::ColumnType;

    struct Family {
        context: DataContext,
        parents: Table,
        children: Table,
        fk: Column,
        relation: ChildRelation,
    }

    fn family(nullable: bool) -> Family {
        let numbers = TableSchema::new("Numbers");
        let id = numbers.add_value_column("Id", ColumnType::Int32, 0).unwrap();
        numbers.set_primary_key(Some(&id)).unwrap();
        let powers = TableSchema::new("Powers");
        powers.add_value_column("Exponent", ColumnType::Int32, 0).unwrap();
        let fk = powers.add_foreign_key("Number", &numbers, "Powers").unwrap();
        if !nullable {
            fk.set_allow_nulls(false).unwrap();
        }
        let context = DataContext::new();
        let parents = context.create_table(&numbers).unwrap();
        let children = context.create_table(&powers).unwrap();
        let relation = numbers.child_relation("Powers").unwrap();
        Family {
            context,
            parents,
            children,
            fk,
            relation,
        }
    }

    fn add_child(f: &Family, parent: &Row, exponent: i32) -> Row {
        let row = Row::new(&f.children.schema());
        row.set(&f.fk, parent).unwrap();
        row.set("Exponent", exponent).unwrap();
        f.children.add(&row).unwrap();
        row
    }

    #[test]
    fn test_collection_tracks_foreign_key_writes() {
        let f = family(true);
        let two = f.parents.add_row_with([("Id", 2)]).unwrap();
        let three = f.parents.add_row_with([("Id", 3)]).unwrap();
        let a = add_child(&f, &two, 1);
        let b = add_child(&f, &three, 1);
        let c = add_child(&f, &two, 2);

        let of_two = two.children(&f.relation).unwrap();
        assert_eq!(of_two.rows(), vec![a.clone(), c.clone()]);

        b.set(&f.fk, &two).unwrap();
        assert_eq!(of_two.rows(), vec![a.clone(), b.clone(), c.clone()]);

        let of_three = three.children(&f.relation).unwrap();
        assert!(of_three.is_empty());
        a.set(&f.fk, &three).unwrap();
        assert_eq!(of_two.rows(), vec![b.clone(), c.clone()]);
        assert_eq!(of_three.rows(), vec![a.clone()]);

        f.children.remove(&c).unwrap();
        assert_eq!(of_two.rows(), vec![b]);
        assert!(f.context.table_by_name("Powers").is_some());
    }

    #[test]
    fn test_sibling_write_is_visible_through_collection() {
        let f = family(true);
        let two = f.parents.add_row_with([("Id", 2)]).unwrap();
        let child = add_child(&f, &two, 1);
        let collection = two.children(&f.relation).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        collection.subscribe(move |event| {
            if let TableEvent::ValueChanged { column, .. } = event {
                sink.borrow_mut().push(column.name());
            }
        });

        child.set("Exponent", 5).unwrap();
        assert_eq!(*seen.borrow(), vec!["Exponent".to_string()]);
    }

    #[test]
    fn test_removing_parent_orphans_nullable_children() {
        let f = family(true);
        let two = f.parents.add_row_with([("Id", 2)]).unwrap();
        let a = add_child(&f, &two, 1);
        let b = add_child(&f, &two, 2);
        let collection = two.children(&f.relation).unwrap();
        assert_eq!(collection.len(), 2);

        f.parents.remove(&two).unwrap();
        assert_eq!(collection.len(), 0);
        assert_eq!(f.children.len(), 2);
        assert_eq!(a.parent(&f.fk).unwrap(), None);
        assert_eq!(b.parent(&f.fk).unwrap(), None);
    }

    #[test]
    fn test_removing_parent_cascades_required_children() {
        let f = family(false);
        let two = f.parents.add_row_with([("Id", 2)]).unwrap();
        let keep = f.parents.add_row_with([("Id", 3)]).unwrap();
        add_child(&f, &two, 1);
        add_child(&f, &two, 2);
        let other = add_child(&f, &keep, 1);
        let collection = two.children(&f.relation).unwrap();

        f.parents.remove(&two).unwrap();
        assert_eq!(collection.len(), 0);
        assert_eq!(f.children.rows(), vec![other]);
    }
}
