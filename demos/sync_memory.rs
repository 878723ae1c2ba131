/// SQL Synchronization Example (in-memory provider)
///
/// This example demonstrates:
/// - Mapping schemas to SQL tables with a JSON configuration
/// - Recording changes and writing them in one ordered transaction
/// - Detecting a concurrent edit and recovering by re-reading
/// - Snapshotting the context as XML

use singularity::sync::{DataSyncContext, MappingConfig, MemoryProvider, SchemaMapping};
use singularity::{to_xml_string, ColumnType, DataContext, TableSchema, Value};

fn main() -> singularity::Result<()> {
    let _ = env_logger::try_init();
    println!("=== Singularity Sync Example ===\n");

    // 1. Model
    println!("1. Declaring orders and lines...");
    let orders = TableSchema::new("Orders");
    let number = orders.add_value_column("Number", ColumnType::Int32, 0)?;
    orders.set_primary_key(Some(&number))?;
    orders.add_value_column("Customer", ColumnType::String, "")?;
    orders.add_value_column("Notes", ColumnType::String, Value::Null)?;

    let lines = TableSchema::new("OrderLines");
    let line_id = lines.add_value_column("Id", ColumnType::Guid, Value::Null)?;
    lines.set_primary_key(Some(&line_id))?;
    lines.add_value_column("Item", ColumnType::String, "")?;
    lines.add_value_column("Quantity", ColumnType::Int32, 1)?;
    let order = lines.add_foreign_key("Order", &orders, "Lines")?;
    order.set_allow_nulls(false)?;

    let context = DataContext::new();
    let order_table = context.create_table(&orders)?;
    let line_table = context.create_table(&lines)?;

    // 2. Mappings
    println!("2. Mapping to SQL tables...");
    let config = MappingConfig::from_json(
        r#"{
            "table": "tblOrder",
            "schema": "sales",
            "columns": { "Customer": "customer_name" },
            "exclude": ["Notes"]
        }"#,
    )?;
    let mut sync = DataSyncContext::new(&context);
    sync.add_mapping(SchemaMapping::from_config(&orders, &config)?)?;
    sync.add_mapping(SchemaMapping::new(&lines)?)?;
    println!("   {} synchronizers\n", sync.synchronizers().len());

    // 3. Write
    println!("3. Writing new rows...");
    let mut provider = MemoryProvider::default();
    let first = order_table.add_row_with([("Number", Value::from(1001)), ("Customer", Value::from("Acme"))])?;
    for (item, quantity) in [("Bolts", 100), ("Nuts", 100), ("Washers", 50)] {
        line_table.add_row_with([
            ("Item", Value::from(item)),
            ("Quantity", Value::from(quantity)),
            ("Order", Value::from(&first)),
        ])?;
    }
    sync.write_data(&mut provider)?;
    print_statements(&provider);

    // 4. Concurrent edit
    println!("4. Someone else edits the order...");
    provider.clear_statements();
    provider.touch("tblOrder", &Value::Int32(1001));
    first.set("Customer", "Acme Corp")?;
    match sync.write_data(&mut provider) {
        Err(err) if err.is_concurrency_conflict() => println!("   {}", err),
        other => println!("   unexpected: {:?}", other),
    }
    println!("   changes still pending: {}", sync.has_changes());
    sync.read_data(&mut provider)?;
    first.set("Customer", "Acme Corp")?;
    sync.write_data(&mut provider)?;
    println!("   retried after re-reading\n");

    // 5. Delete
    println!("5. Removing the order (lines cascade)...");
    provider.clear_statements();
    first.remove()?;
    sync.write_data(&mut provider)?;
    print_statements(&provider);

    // 6. Snapshot
    println!("6. XML snapshot of the (now empty) context:");
    println!("   {}", to_xml_string(&context)?);

    println!("\n=== Example Complete ===");
    Ok(())
}

fn print_statements(provider: &MemoryProvider) {
    for statement in provider.statements() {
        println!("   {}", statement);
    }
    println!();
}
