/// Dependency engine: which values a formula or predicate reads, and who to
/// tell when one of them changes.
///
/// A `DependencySpec` names what a formula reads relative to a root row:
/// columns of the row itself, columns reached through parent foreign keys,
/// and columns of child rows reached through child relations. Specs are
/// resolved against live schemas lazily, so a calculated column may refer to
/// relations declared after it.
///
/// Resolution registers watch points on columns. When a watched column
/// changes on some row, the path is walked backwards from that row to the
/// affected root rows and each root is handed to the dependency's target
/// (a calculated column drops its cached value, a filtered view re-checks
/// membership).

use crate::column::Column;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::schema::TableSchema;
use crate::value::Value;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

/// One navigation step of a dependency path, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopSpec {
    /// Follow a foreign-key column to the parent row.
    Parent(String),
    /// Follow a child relation to every child row.
    Children(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PathSpec {
    hops: Vec<HopSpec>,
    columns: Vec<String>,
}

/// Declared reads of a formula, resolved lazily against schemas.
///
/// ```
/// use singularity::DependencySpec;
///
/// let spec = DependencySpec::columns(["Amount", "Rate"])
///     .parent("Family", ["LastName"])
///     .children("Pledges", ["Amount"]);
/// assert!(!spec.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySpec {
    paths: Vec<PathSpec>,
}

impl DependencySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns of the root row itself.
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().path(Vec::new(), columns)
    }

    pub fn column(self, name: &str) -> Self {
        self.path(Vec::new(), [name])
    }

    /// Columns of the parent row reached through foreign key `fk`.
    pub fn parent<I, S>(self, fk: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path(vec![HopSpec::Parent(fk.to_string())], columns)
    }

    /// Columns of every child row reached through `relation`. The set of
    /// children itself is watched too, so an empty column list still reacts
    /// to children being added, removed or re-parented.
    pub fn children<I, S>(self, relation: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path(vec![HopSpec::Children(relation.to_string())], columns)
    }

    /// An arbitrary multi-hop path.
    pub fn path<I, S>(mut self, hops: Vec<HopSpec>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if hops.is_empty() && columns.is_empty() {
            return self;
        }
        let spec = PathSpec { hops, columns };
        if !self.paths.contains(&spec) {
            self.paths.push(spec);
        }
        self
    }

    pub fn merge(mut self, other: DependencySpec) -> Self {
        for spec in other.paths {
            if !self.paths.contains(&spec) {
                self.paths.push(spec);
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn resolve(&self, root: &TableSchema) -> Result<Vec<Rc<WatchPath>>> {
        self.paths.iter().map(|spec| resolve_path(spec, root).map(Rc::new)).collect()
    }
}

fn resolve_path(spec: &PathSpec, root: &TableSchema) -> Result<WatchPath> {
    let mut schema = root.clone();
    let mut hops = Vec::with_capacity(spec.hops.len());
    for hop in &spec.hops {
        match hop {
            HopSpec::Parent(name) => {
                let fk = schema
                    .column(name)
                    .filter(Column::is_foreign_key)
                    .ok_or_else(|| Error::Expression(format!("'{}' is not a foreign key of '{}'", name, schema.name())))?;
                schema = fk
                    .foreign_schema()
                    .ok_or_else(|| Error::Expression(format!("foreign schema of '{}' is gone", name)))?;
                hops.push(Hop::Parent(fk));
            }
            HopSpec::Children(name) => {
                let relation = schema.child_relation(name).ok_or_else(|| {
                    Error::Expression(format!("'{}' is not a child relation of '{}'", name, schema.name()))
                })?;
                let fk = relation
                    .foreign_key()
                    .ok_or_else(|| Error::Expression(format!("relation '{}' has no foreign key", name)))?;
                schema = relation
                    .child_schema()
                    .ok_or_else(|| Error::Expression(format!("child schema of '{}' is gone", name)))?;
                hops.push(Hop::Children(fk));
            }
        }
    }
    let columns = spec
        .columns
        .iter()
        .map(|name| {
            schema
                .column(name)
                .ok_or_else(|| Error::Expression(format!("schema '{}' has no column '{}'", schema.name(), name)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(WatchPath { hops, columns })
}

pub(crate) enum Hop {
    Parent(Column),
    /// Holds the child schema's foreign key.
    Children(Column),
}

/// A resolved path. Rows reached after `k` hops are "at level k"; the root
/// row is level 0 and `columns` are read at level `hops.len()`.
pub(crate) struct WatchPath {
    hops: Vec<Hop>,
    columns: Vec<Column>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// The changed row itself sits at `level`.
    Value,
    /// The changed row is a child at `level`; its old and new parents sit at
    /// `level - 1`.
    ChildKey,
}

/// Receives root rows whose dependencies changed.
pub(crate) trait DependencyTarget {
    fn dependency_changed(&self, row: &Row);
}

/// A registration on one column.
pub(crate) struct WatchPoint {
    path: Rc<WatchPath>,
    level: usize,
    trigger: Trigger,
    target: Weak<dyn DependencyTarget>,
}

/// Live registrations of one resolved spec. Dropping it unregisters.
pub(crate) struct Dependency {
    _points: Vec<Rc<WatchPoint>>,
    _owned: Option<Rc<dyn DependencyTarget>>,
}

impl Dependency {
    /// Resolves `spec` against `root` and registers watch points for `target`.
    /// With `include_local` false, paths without hops are skipped (the caller
    /// already sees those changes through table events).
    pub(crate) fn register(
        spec: &DependencySpec,
        root: &TableSchema,
        target: Weak<dyn DependencyTarget>,
        include_local: bool,
    ) -> Result<Dependency> {
        let mut points = Vec::new();
        for path in spec.resolve(root)? {
            if path.hops.is_empty() && !include_local {
                continue;
            }
            let depth = path.hops.len();
            for column in &path.columns {
                points.push(watch(column, &path, depth, Trigger::Value, &target));
            }
            for (k, hop) in path.hops.iter().enumerate() {
                match hop {
                    Hop::Parent(fk) => points.push(watch(fk, &path, k, Trigger::Value, &target)),
                    Hop::Children(fk) => points.push(watch(fk, &path, k + 1, Trigger::ChildKey, &target)),
                }
            }
        }
        Ok(Dependency { _points: points, _owned: None })
    }

    /// Like `register`, but the dependency keeps `target` alive.
    pub(crate) fn register_owned(
        spec: &DependencySpec,
        root: &TableSchema,
        target: Rc<dyn DependencyTarget>,
    ) -> Result<Dependency> {
        let mut dependency = Self::register(spec, root, Rc::downgrade(&target), true)?;
        dependency._owned = Some(target);
        Ok(dependency)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self._points.len()
    }
}

fn watch(
    column: &Column,
    path: &Rc<WatchPath>,
    level: usize,
    trigger: Trigger,
    target: &Weak<dyn DependencyTarget>,
) -> Rc<WatchPoint> {
    let point = Rc::new(WatchPoint {
        path: path.clone(),
        level,
        trigger,
        target: target.clone(),
    });
    column.add_watcher(&point);
    point
}

/// Walks from `row` at `level` back to the root rows that reach it.
fn roots_from(path: &WatchPath, level: usize, row: &Row) -> Vec<Row> {
    let mut current = vec![row.clone()];
    for k in (0..level).rev() {
        let mut previous = Vec::new();
        let mut seen = HashSet::new();
        for row in &current {
            let reached: Vec<Row> = match &path.hops[k] {
                Hop::Parent(fk) => referencing_rows(row, fk),
                Hop::Children(fk) => row.raw_value(fk).as_row().cloned().into_iter().collect(),
            };
            for r in reached {
                if seen.insert(r.id()) {
                    previous.push(r);
                }
            }
        }
        current = previous;
        if current.is_empty() {
            break;
        }
    }
    current.into_iter().filter(Row::is_attached).collect()
}

/// Attached rows whose `fk` points at `parent`.
fn referencing_rows(parent: &Row, fk: &Column) -> Vec<Row> {
    if let Some(relation) = fk.child_relation() {
        if let Ok(children) = parent.children(&relation) {
            return children.rows();
        }
    }
    let key = Value::Row(parent.clone());
    fk.schema()
        .map(|schema| {
            schema
                .attached_rows()
                .into_iter()
                .filter(|row| row.raw_value(fk) == key)
                .collect()
        })
        .unwrap_or_default()
}

fn dispatch(hits: Vec<(Rc<dyn DependencyTarget>, Row)>) {
    for (target, root) in hits {
        target.dependency_changed(&root);
    }
}

/// A value of `column` changed on `row` from `old` to `new`.
pub(crate) fn notify_value_changed(column: &Column, row: &Row, old: &Value, new: &Value) {
    let mut hits = Vec::new();
    for point in column.live_watchers() {
        let Some(target) = point.target.upgrade() else {
            continue;
        };
        let starts: Vec<(usize, Row)> = match point.trigger {
            Trigger::Value => vec![(point.level, row.clone())],
            Trigger::ChildKey => [old, new]
                .into_iter()
                .filter_map(|v| v.as_row().cloned())
                .map(|parent| (point.level - 1, parent))
                .collect(),
        };
        for (level, start) in starts {
            for root in roots_from(&point.path, level, &start) {
                hits.push((target.clone(), root));
            }
        }
    }
    dispatch(hits);
}

/// `row` was attached to or detached from a table: every parent it points at
/// gained or lost a child.
pub(crate) fn notify_structure_changed(row: &Row) {
    let mut hits = Vec::new();
    for fk in row.schema().foreign_keys() {
        let Some(parent) = row.raw_value(&fk).as_row().cloned() else {
            continue;
        };
        for point in fk.live_watchers() {
            if point.trigger != Trigger::ChildKey {
                continue;
            }
            let Some(target) = point.target.upgrade() else {
                continue;
            };
            for root in roots_from(&point.path, point.level - 1, &parent) {
                hits.push((target.clone(), root));
            }
        }
    }
    dispatch(hits);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataContext;
    use crate::value::ColumnType;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        rows: RefCell<Vec<Row>>,
    }

    impl DependencyTarget for Recorder {
        fn dependency_changed(&self, row: &Row) {
            self.rows.borrow_mut().push(row.clone());
        }
    }

    fn schemas() -> (TableSchema, TableSchema) {
        let families = TableSchema::new("Families");
        families.add_value_column("LastName", ColumnType::String, "").unwrap();
        let people = TableSchema::new("People");
        people.add_value_column("Age", ColumnType::Int32, 0).unwrap();
        people.add_foreign_key("Family", &families, "Members").unwrap();
        (families, people)
    }

    #[test]
    fn test_unknown_names_fail_resolution() {
        let (families, people) = schemas();
        let recorder: Rc<dyn DependencyTarget> = Rc::new(Recorder::default());
        let bad = DependencySpec::columns(["Nope"]);
        assert!(Dependency::register(&bad, &people, Rc::downgrade(&recorder), true).is_err());
        let bad = DependencySpec::new().children("Nope", ["Age"]);
        assert!(Dependency::register(&bad, &families, Rc::downgrade(&recorder), true).is_err());
        let bad = DependencySpec::new().parent("Age", ["LastName"]);
        assert!(Dependency::register(&bad, &people, Rc::downgrade(&recorder), true).is_err());
    }

    #[test]
    fn test_parent_hop_reaches_children() {
        let (families, people) = schemas();
        let context = DataContext::new();
        let family_table = context.create_table(&families).unwrap();
        let people_table = context.create_table(&people).unwrap();
        let cohen = family_table.add_row().unwrap();
        let levi = family_table.add_row().unwrap();
        let a = people_table.add_row_with([("Family", &cohen)]).unwrap();
        let b = people_table.add_row_with([("Family", &cohen)]).unwrap();

        let recorder = Rc::new(Recorder::default());
        let target: Rc<dyn DependencyTarget> = recorder.clone();
        let spec = DependencySpec::new().parent("Family", ["LastName"]);
        let dependency = Dependency::register(&spec, &people, Rc::downgrade(&target), false).unwrap();
        assert_eq!(dependency.len(), 2);

        cohen.set("LastName", "Cohen").unwrap();
        assert_eq!(*recorder.rows.borrow(), vec![a.clone(), b.clone()]);

        recorder.rows.borrow_mut().clear();
        b.set("Family", &levi).unwrap();
        assert_eq!(*recorder.rows.borrow(), vec![b.clone()]);

        recorder.rows.borrow_mut().clear();
        drop(dependency);
        cohen.set("LastName", "Katz").unwrap();
        assert!(recorder.rows.borrow().is_empty());
    }

    #[test]
    fn test_children_hop_reaches_parents() {
        let (families, people) = schemas();
        let context = DataContext::new();
        let family_table = context.create_table(&families).unwrap();
        let people_table = context.create_table(&people).unwrap();
        let cohen = family_table.add_row().unwrap();
        let levi = family_table.add_row().unwrap();

        let recorder = Rc::new(Recorder::default());
        let target: Rc<dyn DependencyTarget> = recorder.clone();
        let spec = DependencySpec::new().children("Members", ["Age"]);
        let _dependency = Dependency::register(&spec, &families, Rc::downgrade(&target), true).unwrap();

        let child = people_table.add_row_with([("Family", &cohen)]).unwrap();
        assert_eq!(*recorder.rows.borrow(), vec![cohen.clone()]);

        recorder.rows.borrow_mut().clear();
        child.set("Age", 30).unwrap();
        assert_eq!(*recorder.rows.borrow(), vec![cohen.clone()]);

        recorder.rows.borrow_mut().clear();
        child.set("Family", &levi).unwrap();
        assert_eq!(*recorder.rows.borrow(), vec![cohen.clone(), levi.clone()]);

        recorder.rows.borrow_mut().clear();
        people_table.remove(&child).unwrap();
        assert_eq!(*recorder.rows.borrow(), vec![levi]);
    }
}
