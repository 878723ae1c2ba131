use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use singularity::sync::{DataSyncContext, MemoryProvider};
use singularity::*;

fn orders_schema() -> TableSchema {
    let schema = TableSchema::new("Orders");
    let id = schema.add_value_column("Id", ColumnType::Int32, 0).unwrap();
    schema.set_primary_key(Some(&id)).unwrap();
    schema.add_value_column("Price", ColumnType::Float64, 0.0).unwrap();
    schema.add_value_column("Quantity", ColumnType::Int32, 0).unwrap();
    schema
        .add_calculated_column("Total", ColumnType::Float64, "Price * Quantity")
        .unwrap();
    schema
}

fn filled_table(size: i32) -> Table {
    let table = Table::new(&orders_schema());
    let _load = table.begin_load();
    for i in 0..size {
        table
            .add_row_with([
                ("Id", Value::from(i)),
                ("Price", Value::from(f64::from(i % 100))),
                ("Quantity", Value::from(i % 7)),
            ])
            .unwrap();
    }
    table
}

fn bench_table_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_add");

    for size in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(filled_table(size)));
        });
    }
    group.finish();
}

fn bench_find_by_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_by_key");

    for size in [100, 1000, 10000].iter() {
        let table = filled_table(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| table.find_by_key(black_box(size / 2)).unwrap());
        });
    }
    group.finish();
}

fn bench_calculated_invalidation(c: &mut Criterion) {
    let mut group = c.benchmark_group("calculated_invalidation");

    for size in [100, 1000, 10000].iter() {
        let table = filled_table(*size);
        let row = table.row(0).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let mut quantity = 0;
            b.iter(|| {
                quantity += 1;
                row.set("Quantity", quantity).unwrap();
                black_box(row.get("Total").unwrap())
            });
        });
    }
    group.finish();
}

fn bench_filtered_view(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered_view_update");

    for size in [100, 1000, 10000].iter() {
        let table = filled_table(*size);
        let view = FilteredTable::new(&table, "Total > 100").unwrap();
        let row = table.row(table.len() / 2).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                row.set("Quantity", if flip { 6 } else { 0 }).unwrap();
                black_box(view.len())
            });
        });
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("child_aggregate");

    for size in [100, 1000, 10000].iter() {
        let customers = TableSchema::new("Customers");
        let id = customers.add_value_column("Id", ColumnType::Int32, 0).unwrap();
        customers.set_primary_key(Some(&id)).unwrap();
        customers
            .add_calculated_column("Spent", ColumnType::Float64, "SUM(Orders.Price)")
            .unwrap();
        let orders = orders_schema();
        orders.add_foreign_key("Customer", &customers, "Orders").unwrap();

        let context = DataContext::new();
        let customer_table = context.create_table(&customers).unwrap();
        let order_table = context.create_table(&orders).unwrap();
        let customer = customer_table.add_row().unwrap();
        for i in 0..*size {
            order_table
                .add_row_with([
                    ("Id", Value::from(i)),
                    ("Price", Value::from(1.5)),
                    ("Customer", Value::from(&customer)),
                ])
                .unwrap();
        }
        let first = order_table.row(0).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let mut price = 0.0;
            b.iter(|| {
                price += 1.0;
                first.set("Price", price).unwrap();
                black_box(customer.get("Spent").unwrap())
            });
        });
    }
    group.finish();
}

fn bench_sync_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_write");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let context = DataContext::new();
                let table = context.create_table(&orders_schema()).unwrap();
                let mut sync = DataSyncContext::new(&context);
                sync.add_all_tables().unwrap();
                for i in 0..size {
                    table.add_row_with([("Id", i)]).unwrap();
                }
                let mut provider = MemoryProvider::default();
                sync.write_data(&mut provider).unwrap();
                black_box(provider.statements().len())
            });
        });
    }
    group.finish();
}

fn bench_xml_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("xml_snapshot");

    for size in [100, 1000].iter() {
        let context = DataContext::new();
        let table = context.create_table(&orders_schema()).unwrap();
        for i in 0..*size {
            table.add_row_with([("Id", i)]).unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let xml = to_xml_string(&context).unwrap();
                read_xml(&context, black_box(&xml)).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_table_add,
    bench_find_by_key,
    bench_calculated_invalidation,
    bench_filtered_view,
    bench_aggregate,
    bench_sync_write,
    bench_xml_snapshot,
);

criterion_main!(benches);
