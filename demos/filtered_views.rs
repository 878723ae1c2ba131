/// Filtered Views Example
///
/// This example demonstrates:
/// - Expression-based and native FilteredTable views
/// - Views reacting to adds, removes and value changes
/// - Views depending on parent rows
/// - Bulk loading inside a load scope

use singularity::{ColumnType, DataContext, DependencySpec, FilteredTable, TableEvent, TableSchema, Value};

fn main() -> singularity::Result<()> {
    let _ = env_logger::try_init();
    println!("=== Singularity Filtered Views Example ===\n");

    // 1. Schemas
    println!("1. Creating categories and products...");
    let categories = TableSchema::new("Categories");
    let code = categories.add_value_column("Code", ColumnType::String, "")?;
    categories.set_primary_key(Some(&code))?;
    categories.add_value_column("Discontinued", ColumnType::Bool, false)?;

    let products = TableSchema::new("Products");
    products.add_value_column("Name", ColumnType::String, "")?;
    products.add_value_column("Price", ColumnType::Float64, 0.0)?;
    products.add_value_column("Stock", ColumnType::Int32, 0)?;
    products.add_foreign_key("Category", &categories, "Products")?;

    let context = DataContext::new();
    let category_table = context.create_table(&categories)?;
    let product_table = context.create_table(&products)?;
    let electronics = category_table.add_row_with([("Code", "ELEC")])?;
    let furniture = category_table.add_row_with([("Code", "FURN")])?;

    // 2. Views
    println!("2. Creating views...");
    let expensive = FilteredTable::new(&product_table, "Price >= 100 AND NOT Category.Discontinued")?;
    let low_stock = FilteredTable::with_predicate(&product_table, DependencySpec::columns(["Stock"]), |row| {
        Ok(row.get_as::<i32, _>("Stock")? < 5)
    })?;
    expensive.subscribe(|event| match event {
        TableEvent::RowAdded { row, index } => {
            println!("   [expensive] + {} at {}", row.get("Name").unwrap_or(Value::Null), index)
        }
        TableEvent::RowRemoved { row, index } => {
            println!("   [expensive] - {} from {}", row.get("Name").unwrap_or(Value::Null), index)
        }
        _ => {}
    });
    println!();

    // 3. Bulk load
    println!("3. Loading products...");
    {
        let _load = product_table.begin_load();
        let items = [
            ("Laptop", 999.99, 5, &electronics),
            ("Mouse", 29.99, 20, &electronics),
            ("Desk", 299.99, 3, &furniture),
            ("Chair", 199.99, 8, &furniture),
            ("Monitor", 399.99, 2, &electronics),
        ];
        for (name, price, stock, category) in items {
            product_table.add_row_with([
                ("Name", Value::from(name)),
                ("Price", Value::from(price)),
                ("Stock", Value::from(stock)),
                ("Category", Value::from(category)),
            ])?;
        }
    }
    println!("   expensive: {} rows, low stock: {} rows\n", expensive.len(), low_stock.len());

    // 4. Live updates
    println!("4. Changing data...");
    let mouse = product_table.row(1).expect("Mouse was loaded");
    mouse.set("Price", 149.0)?;
    furniture.set("Discontinued", true)?;
    mouse.set("Stock", 1)?;
    println!();

    // 5. Final contents
    println!("5. Final view contents:");
    for row in expensive.rows() {
        println!("   expensive: {} ({})", row.get("Name")?, row.get("Price")?);
    }
    for row in low_stock.rows() {
        println!("   low stock: {} ({})", row.get("Name")?, row.get("Stock")?);
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
