/// A named collection of tables forming one logical database.
///
/// A context holds at most one table per schema. Child relations, cascading
/// deletes and the XML snapshot all resolve schemas to tables through it.

use crate::error::{Error, Result};
use crate::schema::TableSchema;
use crate::table::{LoadScope, Table};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Default)]
pub(crate) struct ContextInner {
    tables: RefCell<Vec<Table>>,
}

/// ```
/// use singularity::{ColumnType, DataContext, TableSchema};
///
/// let families = TableSchema::new("Families");
/// families.add_value_column("LastName", ColumnType::String, "").unwrap();
/// let people = TableSchema::new("People");
/// people.add_foreign_key("Family", &families, "Members").unwrap();
///
/// let context = DataContext::new();
/// context.create_table(&people).unwrap();
/// context.create_table(&families).unwrap();
/// let order: Vec<String> = context
///     .sorted_tables()
///     .unwrap()
///     .iter()
///     .map(|t| t.schema().name())
///     .collect();
/// assert_eq!(order, ["Families", "People"]);
/// ```
#[derive(Clone, Default)]
pub struct DataContext(pub(crate) Rc<ContextInner>);

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing table. Fails if the table already belongs to a
    /// context or this context already has a table for its schema.
    pub fn add_table(&self, table: &Table) -> Result<()> {
        if table.context().is_some() {
            return Err(Error::invalid(format!(
                "table '{}' already belongs to a data context",
                table.schema().name()
            )));
        }
        if self.table(&table.schema()).is_some() {
            return Err(Error::invalid(format!(
                "data context already has a table for schema '{}'",
                table.schema().name()
            )));
        }
        table.set_context(Rc::downgrade(&self.0));
        self.0.tables.borrow_mut().push(table.clone());
        log::debug!("added table '{}' to data context", table.schema().name());
        Ok(())
    }

    pub fn create_table(&self, schema: &TableSchema) -> Result<Table> {
        let table = Table::new(schema);
        self.add_table(&table)?;
        Ok(table)
    }

    pub fn remove_table(&self, table: &Table) -> Result<()> {
        let mut tables = self.0.tables.borrow_mut();
        let index = tables
            .iter()
            .position(|t| t == table)
            .ok_or_else(|| Error::invalid("table does not belong to this data context"))?;
        tables.remove(index);
        table.set_context(std::rc::Weak::new());
        Ok(())
    }

    /// The table holding rows of `schema`.
    pub fn table(&self, schema: &TableSchema) -> Option<Table> {
        self.0.tables.borrow().iter().find(|t| t.schema() == *schema).cloned()
    }

    pub fn table_by_name(&self, name: &str) -> Option<Table> {
        self.0.tables.borrow().iter().find(|t| t.schema().name() == name).cloned()
    }

    pub fn tables(&self) -> Vec<Table> {
        self.0.tables.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.tables.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.tables.borrow().is_empty()
    }

    /// Tables ordered so that every table comes after the tables its foreign
    /// keys point to. Ties keep insertion order; self references are ignored.
    pub fn sorted_tables(&self) -> Result<Vec<Table>> {
        let tables = self.tables();
        let position: HashMap<_, usize> = tables.iter().enumerate().map(|(i, t)| (t.schema().id(), i)).collect();

        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
        for (i, table) in tables.iter().enumerate() {
            for fk in table.schema().foreign_keys() {
                let Some(foreign) = fk.foreign_schema() else { continue };
                if let Some(&p) = position.get(&foreign.id()) {
                    if p != i && !parents[i].contains(&p) {
                        parents[i].push(p);
                    }
                }
            }
        }

        let mut placed = vec![false; tables.len()];
        let mut order = Vec::with_capacity(tables.len());
        while order.len() < tables.len() {
            let next = (0..tables.len()).find(|&i| !placed[i] && parents[i].iter().all(|&p| placed[p]));
            let Some(i) = next else {
                let stuck: Vec<String> = (0..tables.len())
                    .filter(|&i| !placed[i])
                    .map(|i| tables[i].schema().name())
                    .collect();
                return Err(Error::invalid(format!(
                    "foreign keys form a cycle between tables {}",
                    stuck.join(", ")
                )));
            };
            placed[i] = true;
            order.push(tables[i].clone());
        }
        Ok(order)
    }

    /// Starts a load scope on every table. Each table raises its own
    /// `LoadCompleted` when the returned guard is dropped.
    pub fn begin_load(&self) -> ContextLoadScope {
        ContextLoadScope {
            _scopes: self.tables().iter().map(Table::begin_load).collect(),
        }
    }
}

impl PartialEq for DataContext {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DataContext {}

impl fmt::Debug for DataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.tables.borrow().iter().map(|t| t.schema().name()).collect();
        f.debug_struct("DataContext").field("tables", &names).finish()
    }
}

/// Guard returned by [`DataContext::begin_load`].
pub struct ContextLoadScope {
    _scopes: Vec<LoadScope>,
}
