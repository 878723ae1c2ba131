/// Strongly typed access over the dynamically typed row storage.
///
/// A typed row is a thin wrapper holding a `Row` handle; its accessors read
/// and write the same slots as `row.get`/`row.set`, so typed and untyped
/// call sites always observe the same data and events.
///
/// ```
/// use singularity::{ColumnType, Row, Table, TableSchema, TypedRow, TypedTable};
///
/// struct Member(Row);
///
/// impl TypedRow for Member {
///     fn from_row(row: Row) -> Self { Member(row) }
///     fn row(&self) -> &Row { &self.0 }
/// }
///
/// impl Member {
///     fn name(&self) -> String { self.get("Name").unwrap() }
///     fn set_name(&self, name: &str) { self.0.set("Name", name).unwrap() }
/// }
///
/// let schema = TableSchema::new("Members");
/// schema.add_value_column("Name", ColumnType::String, "").unwrap();
/// let members: TypedTable<Member> = TypedTable::new(Table::new(&schema));
/// let m = members.add_new().unwrap();
/// m.set_name("Levi");
/// assert_eq!(members.row(0).unwrap().name(), "Levi");
/// ```

use crate::column::AsColumn;
use crate::error::Result;
use crate::row::Row;
use crate::table::Table;
use crate::value::Value;
use chrono::NaiveDateTime;
use std::marker::PhantomData;
use uuid::Uuid;

/// Conversion from a stored `Value` into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i32()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_guid()
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_datetime()
    }
}

impl FromValue for Row {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_row().cloned()
    }
}

/// Null converts to `None`; anything else must convert to `T`.
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// A typed wrapper over a row handle.
pub trait TypedRow: Sized {
    fn from_row(row: Row) -> Self;

    fn row(&self) -> &Row;

    fn get<T: FromValue, C: AsColumn>(&self, column: C) -> Result<T> {
        self.row().get_as(column)
    }

    /// The parent of a foreign key, wrapped as another typed row.
    fn parent_as<P: TypedRow, C: AsColumn>(&self, foreign_key: C) -> Result<Option<P>> {
        Ok(self.row().parent(foreign_key)?.map(P::from_row))
    }

    /// Child rows of a relation, wrapped.
    fn children_as<R: TypedRow>(&self, relation: &str) -> Result<Vec<R>> {
        Ok(self
            .row()
            .children_by_name(relation)?
            .rows()
            .into_iter()
            .map(R::from_row)
            .collect())
    }
}

/// A typed view over a `Table`.
pub struct TypedTable<T: TypedRow> {
    table: Table,
    _marker: PhantomData<T>,
}

impl<T: TypedRow> TypedTable<T> {
    pub fn new(table: Table) -> Self {
        TypedTable {
            table,
            _marker: PhantomData,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn rows(&self) -> Vec<T> {
        self.table.rows().into_iter().map(T::from_row).collect()
    }

    pub fn row(&self, index: usize) -> Option<T> {
        self.table.row(index).map(T::from_row)
    }

    /// Creates a row with default values, appends it and wraps it.
    pub fn add_new(&self) -> Result<T> {
        self.table.add_row().map(T::from_row)
    }

    pub fn add(&self, row: &T) -> Result<()> {
        self.table.add(row.row())
    }

    pub fn remove(&self, row: &T) -> Result<()> {
        self.table.remove(row.row())
    }

    pub fn find<C: AsColumn>(&self, column: C, value: impl Into<Value>) -> Result<Vec<T>> {
        Ok(self
            .table
            .find(column, value)?
            .into_iter()
            .map(T::from_row)
            .collect())
    }
}

impl<T: TypedRow> Clone for TypedTable<T> {
    fn clone(&self) -> Self {
        TypedTable::new(self.table.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataContext;
    use crate::schema::TableSchema;
    use crate::value::ColumnType;

    struct Family(Row);
    struct Person(Row);

    impl TypedRow for Family {
        fn from_row(row: Row) -> Self {
            Family(row)
        }
        fn row(&self) -> &Row {
            &self.0
        }
    }

    impl TypedRow for Person {
        fn from_row(row: Row) -> Self {
            Person(row)
        }
        fn row(&self) -> &Row {
            &self.0
        }
    }

    impl Person {
        fn age(&self) -> Option<i32> {
            self.get("Age").unwrap()
        }
        fn family(&self) -> Option<Family> {
            self.parent_as("Family").unwrap()
        }
    }

    #[test]
    fn test_from_value() {
        assert_eq!(i32::from_value(&Value::Int32(4)), Some(4));
        assert_eq!(i64::from_value(&Value::Int32(4)), Some(4));
        assert_eq!(String::from_value(&Value::Int32(4)), None);
        assert_eq!(Option::<String>::from_value(&Value::Null), Some(None));
        assert_eq!(Option::<i32>::from_value(&Value::from("x")), None);
        assert_eq!(bool::from_value(&Value::Bool(true)), Some(true));
    }

    #[test]
    fn test_typed_navigation() {
        let families = TableSchema::new("Families");
        families.add_value_column("LastName", ColumnType::String, "").unwrap();
        let people = TableSchema::new("People");
        people.add_value_column("Age", ColumnType::Int32, Value::Null).unwrap();
        people.add_foreign_key("Family", &families, "Members").unwrap();

        let context = DataContext::new();
        let family_table: TypedTable<Family> = TypedTable::new(context.create_table(&families).unwrap());
        let people_table: TypedTable<Person> = TypedTable::new(context.create_table(&people).unwrap());

        let family = family_table.add_new().unwrap();
        family.row().set("LastName", "Katz").unwrap();
        let person = people_table.add_new().unwrap();
        assert_eq!(person.age(), None);
        person.row().set("Age", 40).unwrap();
        person.row().set("Family", family.row()).unwrap();

        assert_eq!(person.age(), Some(40));
        let parent = person.family().unwrap();
        assert_eq!(parent.get::<String, _>("LastName").unwrap(), "Katz");
        let members: Vec<Person> = family.children_as("Members").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(people_table.find("Age", 40).unwrap().len(), 1);
    }
}
