/// Basic Table Example
///
/// This example demonstrates:
/// - Declaring schemas with a primary key, a foreign key and calculated columns
/// - Adding, updating and removing rows
/// - Navigating parent and child rows
/// - Validation errors and unique columns

use singularity::{ColumnType, DataContext, TableSchema, Value};

fn main() -> singularity::Result<()> {
    let _ = env_logger::try_init();
    println!("=== Singularity Basic Table Example ===\n");

    // 1. Declare schemas
    println!("1. Declaring schemas...");
    let families = TableSchema::new("Families");
    let id = families.add_value_column("Id", ColumnType::Int32, 0)?;
    families.set_primary_key(Some(&id))?;
    families.add_value_column("LastName", ColumnType::String, "")?;
    families.add_calculated_column("Pledged", ColumnType::Float64, "SUM(Members.Pledge)")?;

    let people = TableSchema::new("People");
    let email = people.add_value_column("Email", ColumnType::String, Value::Null)?;
    people.add_value_column("FirstName", ColumnType::String, "")?;
    people.add_value_column("Pledge", ColumnType::Float64, 0.0)?;
    people.add_foreign_key("Family", &families, "Members")?;
    people.add_calculated_column("FullName", ColumnType::String, "FirstName + ' ' + Family.LastName")?;
    email.set_unique(true)?;
    println!("   People has {} columns\n", people.columns().len());

    // 2. Create tables
    println!("2. Creating tables in a data context...");
    let context = DataContext::new();
    let family_table = context.create_table(&families)?;
    let people_table = context.create_table(&people)?;
    println!("   Context holds {} tables\n", context.len());

    // 3. Add rows
    println!("3. Adding rows...");
    let smiths = family_table.add_row_with([("Id", Value::from(1)), ("LastName", Value::from("Smith"))])?;
    for (first, mail, pledge) in [("Alice", "alice@example.com", 50.0), ("Bob", "bob@example.com", 25.0)] {
        people_table.add_row_with([
            ("FirstName", Value::from(first)),
            ("Email", Value::from(mail)),
            ("Pledge", Value::from(pledge)),
            ("Family", Value::from(&smiths)),
        ])?;
    }
    println!("   Added {} people\n", people_table.len());

    // 4. Calculated columns
    println!("4. Reading calculated columns...");
    for person in people_table.rows() {
        println!("   {}", person.get("FullName")?);
    }
    println!("   Smith family pledged {}\n", smiths.get("Pledged")?);

    // 5. Updates propagate
    println!("5. Renaming the family...");
    smiths.set("LastName", "Smythe")?;
    let bob = people_table.row(1).expect("Bob was added");
    bob.set("Pledge", 75.0)?;
    println!("   Bob is now {}", bob.get("FullName")?);
    println!("   Family pledged {}\n", smiths.get("Pledged")?);

    // 6. Validation
    println!("6. Rejected writes...");
    match people_table.add_row_with([("Email", "bob@example.com")]) {
        Ok(_) => println!("   unexpected success"),
        Err(err) => println!("   {}", err),
    }
    match bob.set("Pledge", "a lot") {
        Ok(_) => println!("   unexpected success"),
        Err(err) => println!("   {}", err),
    }
    println!("   Table still has {} rows\n", people_table.len());

    // 7. Child navigation
    println!("7. Children of the family...");
    let members = smiths.children_by_name("Members")?;
    println!("   {} members", members.len());
    bob.remove()?;
    println!("   {} members after Bob left\n", members.len());

    println!("=== Example Complete ===");
    Ok(())
}
