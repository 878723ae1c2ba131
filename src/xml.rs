/// XML snapshot of a `DataContext`.
///
/// ```xml
/// <DataContext>
///   <Families>
///     <Row>
///       <Id>1</Id>
///       <LastName>Cohen</LastName>
///       <Phone><Null/></Phone>
///     </Row>
///   </Families>
/// </DataContext>
/// ```
///
/// Tables are written parents first. Calculated columns are skipped and
/// foreign keys are written as the parent's primary key. Reading reconciles
/// by primary key: existing rows are updated in place, missing rows are
/// created, and rows whose key is absent from the document are removed once
/// every table has been read (children before parents).

use crate::column::Column;
use crate::context::DataContext;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::table::Table;
use crate::value::Value;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{HashMap, HashSet};
use std::io::Write;

const ROOT: &str = "DataContext";
const ROW: &str = "Row";
const NULL: &str = "Null";

/// Writes the whole context as XML.
pub fn write_xml<W: Write>(context: &DataContext, out: W) -> Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    writer.write_event(Event::Start(BytesStart::new(ROOT)))?;
    for table in context.sorted_tables()? {
        write_table(&mut writer, &table)?;
    }
    writer.write_event(Event::End(BytesEnd::new(ROOT)))?;
    Ok(())
}

pub fn to_xml_string(context: &DataContext) -> Result<String> {
    let mut buffer = Vec::new();
    write_xml(context, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::invalid(format!("XML output is not UTF-8: {}", e)))
}

fn write_table<W: Write>(writer: &mut Writer<W>, table: &Table) -> Result<()> {
    let schema = table.schema();
    let table_name = encode_name(&schema.name());
    let columns: Vec<Column> = schema.columns().into_iter().filter(|c| !c.is_calculated()).collect();
    let names: Vec<String> = columns.iter().map(|c| encode_name(&c.name())).collect();

    writer.write_event(Event::Start(BytesStart::new(table_name.as_str())))?;
    for row in table.rows() {
        writer.write_event(Event::Start(BytesStart::new(ROW)))?;
        for (column, name) in columns.iter().zip(&names) {
            writer.write_event(Event::Start(BytesStart::new(name.as_str())))?;
            match key_text(&row.raw_value(column))? {
                Some(text) => writer.write_event(Event::Text(BytesText::new(&text)))?,
                None => writer.write_event(Event::Empty(BytesStart::new(NULL)))?,
            }
            writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
        }
        writer.write_event(Event::End(BytesEnd::new(ROW)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(table_name.as_str())))?;
    log::debug!("wrote {} rows of '{}' to XML", table.len(), schema.name());
    Ok(())
}

/// Text of a value; parent rows are written as their primary key.
fn key_text(value: &Value) -> Result<Option<String>> {
    match value {
        Value::Row(parent) => {
            let schema = parent.schema();
            let key = schema.primary_key().ok_or_else(|| {
                Error::invalid(format!(
                    "cannot write a reference to '{}': it has no primary key",
                    schema.name()
                ))
            })?;
            Ok(parent.raw_value(&key).to_text())
        }
        other => Ok(other.to_text()),
    }
}

struct TableData {
    name: String,
    rows: Vec<Vec<(String, Option<String>)>>,
}

fn parse_document(xml: &str) -> Result<Vec<TableData>> {
    let mut reader = Reader::from_str(xml);
    let mut tables: Vec<TableData> = Vec::new();
    let mut depth = 0usize;
    // (element name, text, saw <Null/>)
    let mut cell: Option<(String, String, bool)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = decode_name(&String::from_utf8_lossy(e.name().as_ref()));
                match depth {
                    0 if name != ROOT => {
                        return Err(Error::invalid(format!("expected <{}>, found <{}>", ROOT, name)))
                    }
                    1 => tables.push(TableData { name, rows: Vec::new() }),
                    2 => push_row(&mut tables)?,
                    3 => cell = Some((name, String::new(), false)),
                    _ => {}
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let name = decode_name(&String::from_utf8_lossy(e.name().as_ref()));
                match depth {
                    0 if name != ROOT => {
                        return Err(Error::invalid(format!("expected <{}>, found <{}>", ROOT, name)))
                    }
                    1 => tables.push(TableData { name, rows: Vec::new() }),
                    2 => push_row(&mut tables)?,
                    3 => push_cell(&mut tables, name, Some(String::new()))?,
                    4 if name == NULL => {
                        if let Some(cell) = cell.as_mut() {
                            cell.2 = true;
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) if depth == 4 => {
                if let Some(cell) = cell.as_mut() {
                    cell.1.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) if depth == 4 => {
                if let Some(cell) = cell.as_mut() {
                    cell.1.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 3 {
                    if let Some((name, text, null)) = cell.take() {
                        push_cell(&mut tables, name, (!null).then_some(text))?;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(tables)
}

fn push_row(tables: &mut [TableData]) -> Result<()> {
    let table = tables
        .last_mut()
        .ok_or_else(|| Error::invalid("<Row> outside of a table element"))?;
    table.rows.push(Vec::new());
    Ok(())
}

fn push_cell(tables: &mut [TableData], name: String, text: Option<String>) -> Result<()> {
    let row = tables
        .last_mut()
        .and_then(|t| t.rows.last_mut())
        .ok_or_else(|| Error::invalid(format!("<{}> outside of a row element", name)))?;
    row.push((name, text));
    Ok(())
}

/// Reconciles `context` with an XML snapshot produced by [`write_xml`].
///
/// The whole read runs in one load scope. Tables named in the document but
/// missing from the context are an error; tables absent from the document
/// are left alone.
pub fn read_xml(context: &DataContext, xml: &str) -> Result<()> {
    let document = parse_document(xml)?;
    let mut by_table: HashMap<String, TableData> = HashMap::new();
    for data in document {
        if context.table_by_name(&data.name).is_none() {
            return Err(Error::invalid(format!("data context has no table '{}'", data.name)));
        }
        by_table.insert(data.name.clone(), data);
    }

    let _load = context.begin_load();
    let ordered = context.sorted_tables()?;
    let mut seen: HashSet<Row> = HashSet::new();
    for table in &ordered {
        if let Some(data) = by_table.get(&table.schema().name()) {
            read_table(context, table, data, &mut seen)?;
        }
    }

    for table in ordered.iter().rev() {
        if !by_table.contains_key(&table.schema().name()) {
            continue;
        }
        let stale: Vec<Row> = table.rows().into_iter().filter(|r| !seen.contains(r)).collect();
        for row in stale {
            if table.contains(&row) {
                table.remove(&row)?;
            }
        }
    }
    Ok(())
}

fn read_table(context: &DataContext, table: &Table, data: &TableData, seen: &mut HashSet<Row>) -> Result<()> {
    let schema = table.schema();
    let primary_key = schema.primary_key();
    let (mut updated, mut created) = (0, 0);

    for cells in &data.rows {
        let mut values = Vec::with_capacity(cells.len());
        for (name, text) in cells {
            let Some(column) = schema.column(name) else {
                log::warn!("ignoring unknown column '{}.{}' in XML", schema.name(), name);
                continue;
            };
            if column.is_calculated() {
                continue;
            }
            let value = match text {
                None => Value::Null,
                Some(text) => parse_cell(context, &column, text)?,
            };
            values.push((column, value));
        }

        let existing = match &primary_key {
            Some(key) => match values.iter().find(|(c, _)| c == key) {
                Some((_, value)) => table.find(key, value.clone())?.into_iter().next(),
                None => None,
            },
            None => None,
        };

        match existing {
            Some(row) => {
                for (column, value) in values {
                    row.assign(&column, value, true)?;
                }
                seen.insert(row);
                updated += 1;
            }
            None => {
                let row = Row::new(&schema);
                for (column, value) in values {
                    row.assign(&column, value, true)?;
                }
                table.add(&row)?;
                seen.insert(row);
                created += 1;
            }
        }
    }
    log::debug!(
        "read '{}' from XML: {} updated, {} created",
        schema.name(),
        updated,
        created
    );
    Ok(())
}

fn parse_cell(context: &DataContext, column: &Column, text: &str) -> Result<Value> {
    if let Some(column_type) = column.column_type() {
        return Value::parse(column_type, text).map_err(|e| with_column(e, column));
    }
    let foreign = column
        .foreign_schema()
        .ok_or_else(|| Error::invalid(format!("'{}' refers to a removed schema", column.name())))?;
    let parent_table = context
        .table(&foreign)
        .ok_or_else(|| Error::invalid(format!("data context has no table for schema '{}'", foreign.name())))?;
    let key = foreign
        .primary_key()
        .ok_or_else(|| Error::invalid(format!("schema '{}' has no primary key", foreign.name())))?;
    let key_type = key
        .column_type()
        .ok_or_else(|| Error::invalid(format!("primary key of '{}' has no type", foreign.name())))?;
    let key_value = Value::parse(key_type, text).map_err(|e| with_column(e, column))?;
    match parent_table.find(&key, key_value)?.into_iter().next() {
        Some(parent) => Ok(Value::Row(parent)),
        None => Err(Error::invalid(format!(
            "'{}' refers to missing {} row with key '{}'",
            column.name(),
            foreign.name(),
            text
        ))),
    }
}

fn with_column(error: Error, column: &Column) -> Error {
    match error {
        Error::Validation { kind, message, .. } => Error::Validation {
            column: column.name(),
            kind,
            message,
        },
        other => other,
    }
}

/// Escapes characters that cannot appear in an XML name as `_xHHHH_`.
pub fn encode_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len());
    for (i, &c) in chars.iter().enumerate() {
        let valid = c.is_alphabetic() || c == '_' || (i > 0 && (c.is_ascii_digit() || c == '-' || c == '.'));
        // a literal "_x" would be mistaken for an escape
        let escape_underscore = c == '_' && chars.get(i + 1) == Some(&'x');
        if valid && !escape_underscore {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("_x{:04X}_", unit));
            }
        }
    }
    out
}

pub fn decode_name(name: &str) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(name.len());
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < name.len() {
        if bytes[i] == b'_' && i + 7 <= name.len() && bytes[i + 1] == b'x' && bytes[i + 6] == b'_' {
            if let Ok(unit) = u16::from_str_radix(&name[i + 2..i + 6], 16) {
                units.push(unit);
                i += 7;
                continue;
            }
        }
        let c = name[i..].chars().next().unwrap_or_default();
        let mut buf = [0u16; 2];
        units.extend_from_slice(c.encode_utf16(&mut buf));
        i += c.len_utf8();
    }
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use crate::value::ColumnType;

    struct Fixture {
        context: DataContext,
        families: Table,
        people: Table,
    }

    fn fixture() -> Fixture {
        let families = TableSchema::new("Families");
        let id = families.add_value_column("Id", ColumnType::Int32, 0).unwrap();
        families.set_primary_key(Some(&id)).unwrap();
        families.add_value_column("Last Name", ColumnType::String, "").unwrap();
        families.add_value_column("Phone", ColumnType::String, Value::Null).unwrap();
        families.add_calculated_column("Size", ColumnType::Int32, "COUNT(Members)").unwrap();

        let people = TableSchema::new("People");
        let pid = people.add_value_column("Id", ColumnType::Guid, Value::Null).unwrap();
        people.set_primary_key(Some(&pid)).unwrap();
        people.add_value_column("Name", ColumnType::String, "").unwrap();
        people.add_foreign_key("Family", &families, "Members").unwrap();

        let context = DataContext::new();
        let people_table = context.create_table(&people).unwrap();
        let family_table = context.create_table(&families).unwrap();
        Fixture {
            context,
            families: family_table,
            people: people_table,
        }
    }

    fn populate(f: &Fixture) {
        for (id, name) in [(1, "Cohen"), (2, "Levi")] {
            f.families
                .add_row_with([("Id", Value::from(id)), ("Last Name", Value::from(name))])
                .unwrap();
        }
        let cohen = f.families.row(0).unwrap();
        for name in ["Avi", "Dina <&>"] {
            f.people
                .add_row_with([("Name", Value::from(name)), ("Family", Value::from(&cohen))])
                .unwrap();
        }
    }

    #[test]
    fn test_name_encoding() {
        assert_eq!(encode_name("Last Name"), "Last_x0020_Name");
        assert_eq!(encode_name("2nd"), "_x0032_nd");
        assert_eq!(encode_name("a_xb"), "a_x005F_xb");
        for name in ["Last Name", "2nd", "a_xb", "plain", "שם"] {
            assert_eq!(decode_name(&encode_name(name)), name);
        }
    }

    #[test]
    fn test_write_format() {
        let f = fixture();
        populate(&f);
        let xml = to_xml_string(&f.context).unwrap();
        let families_at = xml.find("<Families>").unwrap();
        let people_at = xml.find("<People>").unwrap();
        assert!(families_at < people_at);
        assert!(xml.contains("<Last_x0020_Name>Cohen</Last_x0020_Name>"));
        assert!(xml.contains("<Null/>"));
        assert!(xml.contains("<Family>1</Family>"));
        assert!(xml.contains("Dina &lt;&amp;&gt;"));
        assert!(!xml.contains("<Size>"));
    }

    #[test]
    fn test_round_trip_into_empty_context() {
        let source = fixture();
        populate(&source);
        let xml = to_xml_string(&source.context).unwrap();

        let target = fixture();
        read_xml(&target.context, &xml).unwrap();
        assert_eq!(target.families.len(), 2);
        assert_eq!(target.people.len(), 2);
        let dina = target.people.row(1).unwrap();
        assert_eq!(dina.get("Name").unwrap(), Value::from("Dina <&>"));
        let family = dina.parent("Family").unwrap().unwrap();
        assert_eq!(family.get("Id").unwrap(), Value::Int32(1));
        assert_eq!(family.get("Phone").unwrap(), Value::Null);
        assert_eq!(family.get("Size").unwrap(), Value::Int32(2));
        assert_eq!(
            dina.get("Id").unwrap(),
            source.people.row(1).unwrap().get("Id").unwrap()
        );
    }

    #[test]
    fn test_round_trip_preserves_identity() {
        let f = fixture();
        populate(&f);
        let snapshot = to_xml_string(&f.context).unwrap();

        let cohen = f.families.row(0).unwrap();
        let avi = f.people.row(0).unwrap();
        let dina = f.people.row(1).unwrap();
        cohen.set("Last Name", "Changed").unwrap();
        dina.remove().unwrap();
        let extra = f.families.add_row_with([("Id", 3)]).unwrap();

        read_xml(&f.context, &snapshot).unwrap();

        assert_eq!(f.families.row(0).unwrap(), cohen);
        assert_eq!(cohen.get("Last Name").unwrap(), Value::from("Cohen"));
        assert_eq!(f.people.row(0).unwrap(), avi);
        assert!(!extra.is_attached());
        assert_eq!(f.families.len(), 2);
        assert_eq!(f.people.len(), 2);
        assert_ne!(f.people.row(1).unwrap(), dina);
        assert_eq!(cohen.children_by_name("Members").unwrap().len(), 2);
    }

    #[test]
    fn test_bad_documents() {
        let f = fixture();
        assert!(read_xml(&f.context, "<Wrong/>").is_err());
        assert!(read_xml(&f.context, "<DataContext/>").is_ok());
        assert!(read_xml(&f.context, "<Other></Other>").is_err());
        assert!(read_xml(&f.context, "<DataContext><Nope/></DataContext>").is_err());
        let dangling = "<DataContext><People><Row><Family>9</Family></Row></People></DataContext>";
        assert!(read_xml(&f.context, dangling).is_err());
    }
}
