/// Live filtered views over a table.
///
/// A `FilteredTable` holds exactly the backing rows that pass its predicate,
/// in backing order. Structural changes and local value changes arrive
/// through the backing table's events; changes to values the predicate reads
/// through foreign keys or child relations arrive through the dependency
/// engine.

use crate::dependency::{Dependency, DependencySpec, DependencyTarget};
use crate::error::Result;
use crate::events::{EventHandlers, SubscriptionId, TableEvent};
use crate::expr::{parse_expr, Expr};
use crate::row::Row;
use crate::table::Table;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type NativePredicate = Box<dyn Fn(&Row) -> Result<bool>>;

enum Predicate {
    Expr(Expr),
    Native(NativePredicate),
}

pub(crate) struct FilteredInner {
    backing: Table,
    predicate: Predicate,
    rows: RefCell<Vec<Row>>,
    subscription: Cell<Option<SubscriptionId>>,
    dependency: RefCell<Option<Dependency>>,
    handlers: EventHandlers<TableEvent>,
}

/// A read-only, order-preserving subset of a table's rows.
///
/// ```
/// use singularity::{ColumnType, FilteredTable, Table, TableSchema};
///
/// let schema = TableSchema::new("Items");
/// schema.add_value_column("Qty", ColumnType::Int32, 0).unwrap();
/// let table = Table::new(&schema);
/// let big = FilteredTable::new(&table, "Qty >= 10").unwrap();
///
/// let row = table.add_row().unwrap();
/// assert!(big.is_empty());
/// row.set("Qty", 12).unwrap();
/// assert_eq!(big.rows(), vec![row]);
/// ```
#[derive(Clone)]
pub struct FilteredTable(Rc<FilteredInner>);

impl FilteredTable {
    /// Filters `backing` by an expression such as `"Amount > 100 AND Family.City == 'Lakewood'"`.
    pub fn new(backing: &Table, expression: &str) -> Result<Self> {
        let expr = parse_expr(expression)?;
        let spec = expr.dependencies();
        Self::create(backing, Predicate::Expr(expr), &spec)
    }

    /// Filters by a closure. `spec` must name every value the closure reads
    /// through foreign keys or child relations.
    pub fn with_predicate<F>(backing: &Table, spec: DependencySpec, predicate: F) -> Result<Self>
    where
        F: Fn(&Row) -> Result<bool> + 'static,
    {
        Self::create(backing, Predicate::Native(Box::new(predicate)), &spec)
    }

    fn create(backing: &Table, predicate: Predicate, spec: &DependencySpec) -> Result<Self> {
        let inner = Rc::new(FilteredInner {
            backing: backing.clone(),
            predicate,
            rows: RefCell::new(Vec::new()),
            subscription: Cell::new(None),
            dependency: RefCell::new(None),
            handlers: EventHandlers::new(),
        });

        let weak: Weak<FilteredInner> = Rc::downgrade(&inner);
        let target: Weak<dyn DependencyTarget> = weak;
        let dependency = Dependency::register(spec, &backing.schema(), target, false)?;
        *inner.dependency.borrow_mut() = Some(dependency);

        let weak = Rc::downgrade(&inner);
        let id = backing.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_backing_event(event);
            }
        });
        inner.subscription.set(Some(id));

        *inner.rows.borrow_mut() = inner.scan();
        Ok(FilteredTable(inner))
    }

    pub fn backing(&self) -> Table {
        self.0.backing.clone()
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

    /// Re-scans the backing table and raises `LoadCompleted`.
    pub fn refresh(&self) {
        self.0.rebuild();
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
}

impl FilteredInner {
    fn passes(&self, row: &Row) -> bool {
        let result = match &self.predicate {
            Predicate::Expr(expr) => expr.matches(row),
            Predicate::Native(func) => func(row),
        };
        result.unwrap_or_else(|err| {
            log::warn!("filter predicate failed on row {}: {}", row.id(), err);
            false
        })
    }

    fn scan(&self) -> Vec<Row> {
        self.backing.rows().into_iter().filter(|row| self.passes(row)).collect()
    }

    fn rebuild(&self) {
        let rows = self.scan();
        *self.rows.borrow_mut() = rows;
        self.handlers.emit(&TableEvent::LoadCompleted);
    }

    fn position(&self, row: &Row) -> Option<usize> {
        self.rows.borrow().iter().position(|r| r == row)
    }

    fn on_backing_event(&self, event: &TableEvent) {
        if self.backing.is_loading() && !matches!(event, TableEvent::LoadCompleted) {
            return;
        }
        match event {
            TableEvent::RowAdded { row, .. } => {
                if self.passes(row) {
                    self.admit(row);
                }
            }
            TableEvent::RowRemoved { row, .. } => self.evict(row),
            TableEvent::ValueChanged { row, column } => {
                let passes = self.passes(row);
                match (passes, self.position(row).is_some()) {
                    (true, true) => self.handlers.emit(&TableEvent::ValueChanged {
                        row: row.clone(),
                        column: column.clone(),
                    }),
                    (true, false) => self.admit(row),
                    (false, true) => self.evict(row),
                    (false, false) => {}
                }
            }
            TableEvent::LoadCompleted => self.rebuild(),
        }
    }

    fn admit(&self, row: &Row) {
        if self.position(row).is_some() {
            return;
        }
        let index = merge_position(&self.backing.rows(), &self.rows.borrow(), row);
        self.rows.borrow_mut().insert(index, row.clone());
        self.handlers.emit(&TableEvent::RowAdded {
            row: row.clone(),
            index,
        });
    }

    fn evict(&self, row: &Row) {
        let Some(index) = self.position(row) else {
            return;
        };
        self.rows.borrow_mut().remove(index);
        self.handlers.emit(&TableEvent::RowRemoved {
            row: row.clone(),
            index,
        });
    }
}

impl DependencyTarget for FilteredInner {
    fn dependency_changed(&self, row: &Row) {
        if self.backing.is_loading() {
            return;
        }
        match row.table() {
            None => self.evict(row),
            Some(table) if table == self.backing => {
                if self.passes(row) {
                    self.admit(row);
                } else {
                    self.evict(row);
                }
            }
            Some(_) => {}
        }
    }
}

impl Drop for FilteredInner {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.backing.unsubscribe(id);
        }
    }
}

impl fmt::Debug for FilteredTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredTable")
            .field("backing", &self.0.backing)
            .field("rows", &self.len())
            .finish()
    }
}

/// Where `row` belongs in `view`, a subsequence of `backing`, so that `view`
/// stays in backing order. Walks both lists in lock-step.
pub(crate) fn merge_position(backing: &[Row], view: &[Row], row: &Row) -> usize {
    let mut j = 0;
    for candidate in backing {
        if candidate == row {
            return j;
        }
        if j < view.len() && view[j] == *candidate {
            j += 1;
        }
    }
    j
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataContext;
    use crate::schema::TableSchema;
    use crate::value::{ColumnType, Value};
    use proptest::prelude::*;

    fn numbers(values: &[i32]) -> Table {
        let schema = TableSchema::new("Numbers");
        schema.add_value_column("Value", ColumnType::Int32, 0).unwrap();
        let table = Table::new(&schema);
        for v in values {
            table.add_row_with([("Value", *v)]).unwrap();
        }
        table
    }

    fn values(rows: &[Row]) -> Vec<i32> {
        rows.iter().map(|r| r.get_as::<i32, _>("Value").unwrap()).collect()
    }

    #[test]
    fn test_merge_position() {
        let table = numbers(&[1, 2, 3, 4, 5]);
        let rows = table.rows();
        let view = vec![rows[1].clone(), rows[3].clone()];
        assert_eq!(merge_position(&rows, &view, &rows[0]), 0);
        assert_eq!(merge_position(&rows, &view, &rows[2]), 1);
        assert_eq!(merge_position(&rows, &view, &rows[4]), 2);
        assert_eq!(merge_position(&rows, &[], &rows[4]), 0);
    }

    #[test]
    fn test_membership_follows_values() {
        let table = numbers(&[5, 50, 7, 70]);
        let view = FilteredTable::new(&table, "Value > 10").unwrap();
        assert_eq!(values(&view.rows()), vec![50, 70]);

        let events = Rc::new(RefCell::new(Vec::new()));
        let log = events.clone();
        view.subscribe(move |e| {
            log.borrow_mut().push(match e {
                TableEvent::RowAdded { index, .. } => format!("add@{}", index),
                TableEvent::RowRemoved { index, .. } => format!("remove@{}", index),
                TableEvent::ValueChanged { .. } => "change".to_string(),
                TableEvent::LoadCompleted => "load".to_string(),
            })
        });

        let seven = table.row(2).unwrap();
        seven.set("Value", 77).unwrap();
        assert_eq!(values(&view.rows()), vec![50, 77, 70]);

        table.row(1).unwrap().set("Value", 1).unwrap();
        seven.set("Value", 78).unwrap();
        table.row(0).unwrap().set("Value", 6).unwrap();
        table.remove_at(3).unwrap();
        table.insert(0, &{
            let r = Row::new(&table.schema());
            r.set("Value", 99).unwrap();
            r
        })
        .unwrap();

        assert_eq!(values(&view.rows()), vec![99, 78]);
        assert_eq!(
            *events.borrow(),
            vec!["add@1", "remove@0", "change", "remove@1", "add@0"]
        );
    }

    #[test]
    fn test_native_predicate_and_refresh() {
        let table = numbers(&[1, 2, 3, 4]);
        let view = FilteredTable::with_predicate(&table, DependencySpec::new(), |row| {
            Ok(row.get_as::<i32, _>("Value")? % 2 == 0)
        })
        .unwrap();
        assert_eq!(values(&view.rows()), vec![2, 4]);

        {
            let _load = table.begin_load();
            table.add_row_with([("Value", 6)]).unwrap();
            table.remove_at(0).unwrap();
            assert_eq!(values(&view.rows()), vec![2, 4]);
        }
        assert_eq!(values(&view.rows()), vec![2, 4, 6]);
    }

    #[test]
    fn test_parent_dependency() {
        let cities = TableSchema::new("Cities");
        cities.add_value_column("Name", ColumnType::String, "").unwrap();
        let people = TableSchema::new("People");
        people.add_value_column("Name", ColumnType::String, "").unwrap();
        people.add_foreign_key("City", &cities, "Residents").unwrap();

        let context = DataContext::new();
        let city_table = context.create_table(&cities).unwrap();
        let people_table = context.create_table(&people).unwrap();
        let lakewood = city_table.add_row_with([("Name", "Lakewood")]).unwrap();
        let other = city_table.add_row_with([("Name", "Passaic")]).unwrap();
        let a = people_table.add_row_with([("Name", Value::from("A")), ("City", Value::from(&lakewood))]).unwrap();
        let b = people_table.add_row_with([("Name", Value::from("B")), ("City", Value::from(&other))]).unwrap();

        let view = FilteredTable::new(&people_table, "City.Name == 'Lakewood'").unwrap();
        assert_eq!(view.rows(), vec![a.clone()]);

        other.set("Name", "Lakewood").unwrap();
        assert_eq!(view.rows(), vec![a.clone(), b.clone()]);

        b.set("City", Value::Null).unwrap();
        assert_eq!(view.rows(), vec![a.clone()]);

        lakewood.remove().unwrap();
        assert!(view.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize, i32),
        Remove(usize),
        Set(usize, i32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<usize>(), 0..100i32).prop_map(|(i, v)| Op::Add(i, v)),
            any::<usize>().prop_map(Op::Remove),
            (any::<usize>(), 0..100i32).prop_map(|(i, v)| Op::Set(i, v)),
        ]
    }

    proptest! {
        #[test]
        fn prop_view_equals_filtered_backing(ops in proptest::collection::vec(op(), 1..60)) {
            let table = numbers(&[]);
            let view = FilteredTable::new(&table, "Value >= 50").unwrap();
            for op in ops {
                let len = table.len();
                match op {
                    Op::Add(i, v) => {
                        let row = Row::new(&table.schema());
                        row.set("Value", v).unwrap();
                        table.insert(i % (len + 1), &row).unwrap();
                    }
                    Op::Remove(i) if len > 0 => {
                        table.remove_at(i % len).unwrap();
                    }
                    Op::Set(i, v) if len > 0 => {
                        table.row(i % len).unwrap().set("Value", v).unwrap();
                    }
                    _ => {}
                }
                let expected: Vec<Row> = table
                    .rows()
                    .into_iter()
                    .filter(|r| r.get_as::<i32, _>("Value").unwrap() >= 50)
                    .collect();
                prop_assert_eq!(view.rows(), expected);
            }
        }
    }
}
