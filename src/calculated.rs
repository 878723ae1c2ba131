/// Calculated column state: the formula, its declared reads, and the lazily
/// registered dependency that invalidates cached values.

use crate::column::{Column, ColumnInner};
use crate::dependency::{Dependency, DependencySpec, DependencyTarget};
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::row::Row;
use crate::value::{ColumnType, Value};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) type NativeFormula = Rc<dyn Fn(&Row) -> Result<Value>>;

pub(crate) enum Formula {
    Expr(Expr),
    Native(NativeFormula),
}

pub(crate) struct CalculatedState {
    pub(crate) column_type: ColumnType,
    formula: Formula,
    spec: DependencySpec,
    dependency: RefCell<Option<Dependency>>,
}

impl CalculatedState {
    pub(crate) fn new(column_type: ColumnType, formula: Formula, spec: DependencySpec) -> Self {
        CalculatedState {
            column_type,
            formula,
            spec,
            dependency: RefCell::new(None),
        }
    }

    /// Registers the dependency on first use so that schemas referenced by
    /// the formula may be completed after the column is declared.
    fn ensure_dependency(&self, column: &Column) -> Result<()> {
        if self.dependency.borrow().is_some() {
            return Ok(());
        }
        let schema = column.owning_schema()?;
        let target: Rc<dyn DependencyTarget> = Rc::new(CalculatedTarget {
            column: Rc::downgrade(&column.0),
        });
        let dependency = Dependency::register_owned(&self.spec, &schema, target)?;
        log::trace!("registered dependencies of '{}.{}'", schema.name(), column.name());
        *self.dependency.borrow_mut() = Some(dependency);
        Ok(())
    }

    /// Runs the formula for `row` and coerces the result to the column type.
    pub(crate) fn evaluate(&self, column: &Column, row: &Row) -> Result<Value> {
        self.ensure_dependency(column)?;
        let value = match &self.formula {
            Formula::Expr(expr) => expr.eval(row)?,
            Formula::Native(func) => func(row)?,
        };
        if value.is_null() {
            return Ok(Value::Null);
        }
        value.clone().coerce(self.column_type).ok_or_else(|| {
            Error::Expression(format!(
                "'{}' produced {:?}, expected {:?}",
                column.name(),
                value,
                self.column_type
            ))
        })
    }

    /// Drops the registration; the next evaluation re-resolves.
    pub(crate) fn reset(&self) {
        self.dependency.borrow_mut().take();
    }
}

struct CalculatedTarget {
    column: Weak<ColumnInner>,
}

impl DependencyTarget for CalculatedTarget {
    fn dependency_changed(&self, row: &Row) {
        if let Some(column) = self.column.upgrade().map(Column) {
            if row.schema().contains_column(&column) {
                row.invalidate_calculated(&column);
            }
        }
    }
}
