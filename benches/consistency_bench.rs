use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scandy::db;
use scandy::lending::consistency::{self, analyze, OpenLendingSnapshot, ToolSnapshot};
use scandy::types::ToolStatus;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::runtime::Runtime;

/// Builds `tools` snapshots where roughly every tenth tool has drifted.
fn create_snapshots(tools: usize) -> (Vec<ToolSnapshot>, Vec<OpenLendingSnapshot>) {
    let mut tool_rows = Vec::with_capacity(tools);
    let mut lendings = Vec::new();
    let mut next_id = 1;

    for i in 0..tools {
        let barcode = format!("T{:05}", i);
        let status = match i % 10 {
            0 => ToolStatus::Ausgeliehen, // no lending
            1 => ToolStatus::Defekt,
            2..=4 => ToolStatus::Ausgeliehen,
            _ => ToolStatus::Verfuegbar,
        };
        if (2..=4).contains(&(i % 10)) || i % 10 == 9 {
            lendings.push(OpenLendingSnapshot {
                id: next_id,
                tool_barcode: barcode.clone(),
                worker_barcode: format!("W{:03}", i % 50),
                lent_at: format!("2024-01-{:02}T08:00:00.000Z", 1 + i % 28),
            });
            next_id += 1;
        }
        if i % 25 == 3 {
            lendings.push(OpenLendingSnapshot {
                id: next_id,
                tool_barcode: barcode.clone(),
                worker_barcode: "W999".to_string(),
                lent_at: "2024-02-01T08:00:00.000Z".to_string(),
            });
            next_id += 1;
        }
        tool_rows.push(ToolSnapshot { barcode, status });
    }

    for i in 0..tools / 20 {
        lendings.push(OpenLendingSnapshot {
            id: next_id,
            tool_barcode: format!("GONE{}", i),
            worker_barcode: "W001".to_string(),
            lent_at: "2023-12-24T08:00:00.000Z".to_string(),
        });
        next_id += 1;
    }

    (tool_rows, lendings)
}

fn benchmark_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze");

    for size in [100usize, 1_000, 10_000].iter() {
        let (tools, lendings) = create_snapshots(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(analyze(black_box(&tools), black_box(&lendings))))
        });
    }
    group.finish();
}

fn benchmark_repair(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (tools, lendings) = create_snapshots(1_000);

    c.bench_function("repair_1000_tools", |b| {
        b.iter(|| {
            rt.block_on(async {
                let pool =
                    SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
                db::init_db(&pool).await.unwrap();

                let now = db::now_iso();
                let mut tx = pool.begin().await.unwrap();
                for tool in &tools {
                    sqlx::query(
                        "INSERT INTO tools (barcode, name, status, created_at, modified_at) VALUES (?1, ?1, ?2, ?3, ?3)",
                    )
                    .bind(&tool.barcode)
                    .bind(tool.status)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await
                    .unwrap();
                }
                for lending in &lendings {
                    sqlx::query("INSERT INTO lendings (tool_barcode, worker_barcode, lent_at) VALUES (?1, ?2, ?3)")
                        .bind(&lending.tool_barcode)
                        .bind(&lending.worker_barcode)
                        .bind(&lending.lent_at)
                        .execute(&mut *tx)
                        .await
                        .unwrap();
                }
                let report = consistency::repair(&mut *tx).await.unwrap();
                tx.commit().await.unwrap();
                black_box(report)
            })
        })
    });
}

criterion_group!(benches, benchmark_analyze, benchmark_repair);
criterion_main!(benches);
