//! Performance benchmarks for reconciliation and coercion

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tablesync::coerce::{coerce, parse_float_prefix};
use tablesync::dedupe::find_duplicates;
use tablesync::reconcile::{reconcile, ReconcileOptions};
use tablesync::schema::{FieldSchema, FieldType};
use tablesync::types::{CellValue, LocalRow, RemoteRecord};

fn schema() -> FieldSchema {
    FieldSchema::new()
        .with_field("Email", FieldType::Email)
        .with_field("Name", FieldType::Name)
        .with_field("Phone", FieldType::PhoneNumber)
        .with_field("Plan", FieldType::SingleSelect)
        .with_field("Tags", FieldType::MultipleSelects)
        .with_field("Last_Payment_Amount", FieldType::Currency)
        .with_field("Customer_LTV", FieldType::Currency)
}

fn rows(n: usize) -> Vec<LocalRow> {
    (0..n)
        .map(|i| {
            LocalRow::new()
                .with("Email", format!("user{}@example.com", i))
                .with("Name", format!("User {}", i))
                .with("Phone", "+55 (11) 99999-0000")
                .with("Plan", " Pro ")
                .with("Tags", "a, b, c")
                .with("Last_Payment_Amount", "$49.90")
                .with("Customer_LTV", (i * 10) as f64)
        })
        .collect()
}

/// Half the rows already exist remotely, a tenth of those twice
fn snapshot(n: usize) -> Vec<RemoteRecord> {
    let mut records = Vec::new();
    for i in (0..n).step_by(2) {
        records.push(
            RemoteRecord::new(format!("rec{}", i)).with_field("Email", format!("user{}@example.com", i)),
        );
        if i % 20 == 0 {
            records.push(
                RemoteRecord::new(format!("dup{}", i))
                    .with_field("Email", format!("user{}@example.com", i)),
            );
        }
    }
    records
}

fn bench_reconcile(c: &mut Criterion) {
    let schema = schema();
    let options = ReconcileOptions::default();

    let mut group = c.benchmark_group("reconcile");
    for size in [100, 1_000, 10_000] {
        let rows = rows(size);
        let remote = snapshot(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| reconcile(black_box(&rows), black_box(&remote), &schema, &options))
        });
    }
    group.finish();
}

fn bench_find_duplicates(c: &mut Criterion) {
    let remote = snapshot(10_000);
    c.bench_function("find_duplicates_10k", |b| {
        b.iter(|| find_duplicates(black_box(&remote), "Email"))
    });
}

fn bench_coerce(c: &mut Criterion) {
    let mut group = c.benchmark_group("coerce");

    let currency = CellValue::from("R$ 1.234,56");
    group.bench_function("currency", |b| {
        b.iter(|| coerce(black_box(&currency), &FieldType::Currency))
    });

    let phone = CellValue::from("+55 (11) 99999-0000");
    group.bench_function("phone", |b| {
        b.iter(|| coerce(black_box(&phone), &FieldType::PhoneNumber))
    });

    group.bench_function("parse_float_prefix", |b| {
        b.iter(|| parse_float_prefix(black_box("1234.5678abc")))
    });

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_find_duplicates, bench_coerce);

criterion_main!(benches);
