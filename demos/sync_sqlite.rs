/// SQLite Synchronization Example
///
/// Run with `--features sqlite`. This example demonstrates:
/// - Creating SQL tables from mappings
/// - Writing a context to SQLite and reading it into a second context

use singularity::sync::{DataSyncContext, SchemaMapping, SqliteProvider};
use singularity::{ColumnType, DataContext, TableSchema, Value};

fn main() -> singularity::Result<()> {
    let _ = env_logger::try_init();
    println!("=== Singularity SQLite Example ===\n");

    let teams = TableSchema::new("Teams");
    let name = teams.add_value_column("Name", ColumnType::String, "")?;
    teams.set_primary_key(Some(&name))?;

    let players = TableSchema::new("Players");
    let id = players.add_value_column("Id", ColumnType::Guid, Value::Null)?;
    players.set_primary_key(Some(&id))?;
    players.add_value_column("Nick", ColumnType::String, "")?;
    players.add_value_column("Active", ColumnType::Bool, true)?;
    players.add_foreign_key("Team", &teams, "Roster")?;
    teams.add_calculated_column("Size", ColumnType::Int32, "COUNT(Roster)")?;

    // 1. Create the database
    println!("1. Creating tables...");
    let mut provider = SqliteProvider::open_in_memory()?;
    for schema in [&teams, &players] {
        provider.create_table(&SchemaMapping::new(schema)?)?;
    }

    // 2. Write
    println!("2. Writing...");
    let writer = DataContext::new();
    let team_table = writer.create_table(&teams)?;
    let player_table = writer.create_table(&players)?;
    let mut writer_sync = DataSyncContext::new(&writer);
    writer_sync.add_all_tables()?;
    let red = team_table.add_row_with([("Name", "Red")])?;
    for nick in ["ace", "blitz", "cobra"] {
        player_table.add_row_with([("Nick", Value::from(nick)), ("Team", Value::from(&red))])?;
    }
    writer_sync.write_data(&mut provider)?;
    println!("   wrote {} players\n", player_table.len());

    // 3. Read into a fresh context
    println!("3. Reading into another context...");
    let reader = DataContext::new();
    let teams_read = reader.create_table(&teams)?;
    reader.create_table(&players)?;
    let mut reader_sync = DataSyncContext::new(&reader);
    reader_sync.add_all_tables()?;
    reader_sync.read_data(&mut provider)?;
    for team in teams_read.rows() {
        println!("   team {} has {} players", team.get("Name")?, team.get("Size")?);
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
