//! End-to-end loader tests against real gzip files and SQLite.

use contractor_etl::config::{ColumnConfig, Config, TableConfig};
use contractor_etl::context::AppContext;
use contractor_etl::db;
use contractor_etl::ingest::{load_table, run_load, LoadArgs};
use contractor_etl::loader::{load_file, LoadOptions, MemorySink};
use contractor_etl::migrate;
use contractor_etl::models::{CellValue, ColumnKind, LoadFailure};
use contractor_etl::progress::{LoadProgressEvent, LoadProgressReporter, NoProgress};
use contractor_etl::stats::cached_mapping_stats;
use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::Row;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

fn write_gz(path: &Path, body: &str) {
    let file = std::fs::File::create(path).unwrap();
    let mut enc = GzEncoder::new(file, Compression::default());
    enc.write_all(body.as_bytes()).unwrap();
    enc.finish().unwrap();
}

fn award_columns() -> Vec<ColumnConfig> {
    vec![
        ColumnConfig {
            name: "award_id".to_string(),
            source: Some("AWARD_ID".to_string()),
            kind: ColumnKind::Text,
            nullable: false,
        },
        ColumnConfig {
            name: "amount".to_string(),
            source: Some("AMOUNT".to_string()),
            kind: ColumnKind::Decimal,
            nullable: false,
        },
        ColumnConfig {
            name: "modifications".to_string(),
            source: Some("MODS".to_string()),
            kind: ColumnKind::Integer,
            nullable: false,
        },
        ColumnConfig {
            name: "ceiling".to_string(),
            source: Some("CEILING".to_string()),
            kind: ColumnKind::Decimal,
            nullable: true,
        },
        ColumnConfig {
            name: "employees".to_string(),
            source: Some("EMPLOYEES".to_string()),
            kind: ColumnKind::Integer,
            nullable: true,
        },
    ]
}

/// `rows` award rows; every third row uses `\N` in all numeric fields.
fn awards_csv(rows: usize) -> String {
    let mut body = String::from("AWARD_ID,AMOUNT,MODS,CEILING,EMPLOYEES\n");
    for i in 1..=rows {
        if i % 3 == 0 {
            body.push_str(&format!("AW{:05},\\N,\\N,\\N,\\N\n", i));
        } else {
            body.push_str(&format!("AW{:05},{}.25,{},{}.00,{}\n", i, i * 10, i % 7, i * 100, i));
        }
    }
    body
}

struct Setup {
    _tmp: TempDir,
    config: Config,
    table: TableConfig,
}

fn setup(rows: usize) -> Setup {
    let tmp = TempDir::new().unwrap();
    let staging = tmp.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();
    write_gz(&staging.join("awards.csv.gz"), &awards_csv(rows));

    let table = TableConfig {
        key: "awards".to_string(),
        file: PathBuf::from("awards.csv.gz"),
        target: "awards".to_string(),
        columns: award_columns(),
    };
    let mut config = Config::minimal(tmp.path().join("data/cetl.sqlite"));
    config.loader.staging_dir = staging;
    config.tables.push(table.clone());

    Setup {
        _tmp: tmp,
        config,
        table,
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<LoadProgressEvent>>,
}

impl LoadProgressReporter for RecordingProgress {
    fn report(&self, event: LoadProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn loads_2500_rows_in_three_batches() {
    let s = setup(2500);
    let pool = db::connect(&s.config).await.unwrap();
    migrate::migrate_pool(&pool, &s.config).await.unwrap();

    let progress = RecordingProgress::default();
    let opts = LoadOptions {
        batch_size: 1000,
        count_first: true,
        ..LoadOptions::default()
    };
    let summary = load_table(&pool, &s.config, &s.table, &opts, &progress)
        .await
        .unwrap();

    assert_eq!(summary.total_processed, 2500);
    assert_eq!(summary.total_inserted, 2500);
    assert_eq!(summary.total_failed, 0);
    assert_eq!(summary.batches, 3);
    assert!(summary.is_success());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM awards")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2500);

    let events = progress.events.lock().unwrap().clone();
    let loading: Vec<(u64, Option<u64>)> = events
        .iter()
        .filter_map(|e| match e {
            LoadProgressEvent::Loading {
                processed, total, ..
            } => Some((*processed, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(
        loading,
        vec![(1000, Some(2500)), (2000, Some(2500)), (2500, Some(2500))]
    );
    assert!(matches!(events[0], LoadProgressEvent::Counting { .. }));

    pool.close().await;
}

#[tokio::test]
async fn progress_without_precount_has_no_total() {
    let s = setup(2500);
    let sink = MemorySink::new();
    let progress = RecordingProgress::default();
    let opts = LoadOptions {
        batch_size: 1000,
        count_first: false,
        ..LoadOptions::default()
    };
    let path = s.config.staging_path(&s.table);

    load_file(&path, "awards", &s.table.columns, &sink, &opts, &progress)
        .await
        .unwrap();

    let events = progress.events.lock().unwrap().clone();
    assert!(!events
        .iter()
        .any(|e| matches!(e, LoadProgressEvent::Counting { .. })));
    let loading: Vec<(u64, Option<u64>)> = events
        .iter()
        .filter_map(|e| match e {
            LoadProgressEvent::Loading {
                processed, total, ..
            } => Some((*processed, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(loading, vec![(1000, None), (2000, None), (2500, None)]);
}

#[tokio::test]
async fn batch_sizes_are_1000_1000_500() {
    let s = setup(2500);
    let sink = MemorySink::new();
    let opts = LoadOptions {
        batch_size: 1000,
        ..LoadOptions::default()
    };
    let path = s.config.staging_path(&s.table);

    let summary = load_file(&path, "awards", &s.table.columns, &sink, &opts, &NoProgress)
        .await
        .unwrap();

    assert_eq!(summary.total_processed, 2500);
    assert_eq!(sink.batch_sizes(), vec![1000, 1000, 500]);
}

#[tokio::test]
async fn null_sentinel_never_reaches_the_table() {
    let s = setup(9);
    let pool = db::connect(&s.config).await.unwrap();
    migrate::migrate_pool(&pool, &s.config).await.unwrap();

    load_table(&pool, &s.config, &s.table, &LoadOptions::default(), &NoProgress)
        .await
        .unwrap();

    let rows = sqlx::query(
        "SELECT award_id, CAST(amount AS TEXT) AS amount, modifications, CAST(ceiling AS REAL) AS ceiling, employees, typeof(ceiling) AS ceiling_type FROM awards ORDER BY award_id",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 9);

    for row in &rows {
        let id: String = row.get("award_id");
        let n: usize = id[2..].parse().unwrap();
        let amount: String = row.get("amount");
        let mods: i64 = row.get("modifications");
        let ceiling: Option<f64> = row.get("ceiling");
        let employees: Option<i64> = row.get("employees");
        assert_ne!(amount, "\\N");

        if n % 3 == 0 {
            // non-nullable columns fall back to defaults
            assert_eq!(amount, "0");
            assert_eq!(mods, 0);
            // nullable columns hold NULL
            assert_eq!(ceiling, None);
            assert_eq!(employees, None);
            let ceiling_type: String = row.get("ceiling_type");
            assert_eq!(ceiling_type, "null");
        } else {
            assert_eq!(amount, format!("{}.25", n * 10));
            assert_eq!(mods, (n % 7) as i64);
            assert_eq!(ceiling, Some((n * 100) as f64));
            assert_eq!(employees, Some(n as i64));
        }
    }

    pool.close().await;
}

#[tokio::test]
async fn failed_middle_batch_keeps_the_others() {
    let s = setup(3000);
    let sink = MemorySink::failing_on(vec![1]);
    let opts = LoadOptions {
        batch_size: 1000,
        ..LoadOptions::default()
    };
    let path = s.config.staging_path(&s.table);

    let summary = load_file(&path, "awards", &s.table.columns, &sink, &opts, &NoProgress)
        .await
        .unwrap();

    assert_eq!(summary.total_processed, 3000);
    assert_eq!(summary.total_inserted, 2000);
    assert!(summary.total_failed > 0);
    assert_eq!(summary.total_failed, 1000);
    assert_eq!(summary.errors.len(), 1);
    match &summary.errors[0] {
        LoadFailure::Batch(e) => {
            assert_eq!((e.first_row, e.last_row), (1001, 2000));
        }
        other => panic!("unexpected failure: {:?}", other),
    }

    let rows = sink.rows();
    let ids: Vec<&CellValue> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(ids.len(), 2000);
    assert_eq!(ids[0], &CellValue::Text("AW00001".to_string()));
    assert_eq!(ids[999], &CellValue::Text("AW01000".to_string()));
    assert_eq!(ids[1000], &CellValue::Text("AW02001".to_string()));
    assert_eq!(ids[1999], &CellValue::Text("AW03000".to_string()));
}

#[tokio::test]
async fn database_rejection_is_scoped_to_one_batch() {
    let s = setup(30);
    let pool = db::connect(&s.config).await.unwrap();
    sqlx::query(
        "CREATE TABLE awards (award_id TEXT PRIMARY KEY, amount NUMERIC NOT NULL, modifications INTEGER NOT NULL, ceiling NUMERIC, employees INTEGER)",
    )
    .execute(&pool)
    .await
    .unwrap();
    // collides with row 15, which lands in the second batch of ten
    sqlx::query("INSERT INTO awards (award_id, amount, modifications) VALUES ('AW00015', 0, 0)")
        .execute(&pool)
        .await
        .unwrap();

    let opts = LoadOptions {
        batch_size: 10,
        ..LoadOptions::default()
    };
    let summary = load_table(&pool, &s.config, &s.table, &opts, &NoProgress)
        .await
        .unwrap();

    assert_eq!(summary.total_processed, 30);
    assert_eq!(summary.total_inserted, 20);
    assert_eq!(summary.total_failed, 10);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].to_string().starts_with("rows 11-20:"));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM awards")
        .fetch_one(&pool)
        .await
        .unwrap();
    // batches one and three plus the pre-existing row
    assert_eq!(count, 21);
    let partial: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM awards WHERE award_id BETWEEN 'AW00011' AND 'AW00020'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(partial, 1);

    pool.close().await;
}

#[tokio::test]
async fn truncate_replaces_previous_load() {
    let s = setup(5);
    let pool = db::connect(&s.config).await.unwrap();
    migrate::migrate_pool(&pool, &s.config).await.unwrap();

    load_table(&pool, &s.config, &s.table, &LoadOptions::default(), &NoProgress)
        .await
        .unwrap();
    let opts = LoadOptions {
        truncate: true,
        ..LoadOptions::default()
    };
    load_table(&pool, &s.config, &s.table, &opts, &NoProgress)
        .await
        .unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM awards")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 5);

    pool.close().await;
}

#[tokio::test]
async fn missing_staging_file_is_fatal() {
    let s = setup(1);
    let sink = MemorySink::new();
    let result = load_file(
        &s.config.loader.staging_dir.join("absent.csv.gz"),
        "absent",
        &s.table.columns,
        &sink,
        &LoadOptions::default(),
        &NoProgress,
    )
    .await;
    assert!(matches!(
        result,
        Err(contractor_etl::error::EtlError::FatalIo { .. })
    ));
}

#[tokio::test]
async fn loading_ueis_refreshes_cached_mapping_stats() {
    let tmp = TempDir::new().unwrap();
    let staging = tmp.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();
    write_gz(
        &staging.join("ueis.csv.gz"),
        "UEI,LEGAL_NAME\nUEI000000001,Acme Systems\nUEI000000002,Zephyr Holdings\n",
    );

    let mut config = Config::minimal(tmp.path().join("cetl.sqlite"));
    config.loader.staging_dir = staging;
    config.tables.push(TableConfig {
        key: "ueis".to_string(),
        file: PathBuf::from("ueis.csv.gz"),
        target: "ueis".to_string(),
        columns: vec![
            ColumnConfig {
                name: "uei_id".to_string(),
                source: Some("UEI".to_string()),
                kind: ColumnKind::Text,
                nullable: false,
            },
            ColumnConfig {
                name: "raw_name".to_string(),
                source: Some("LEGAL_NAME".to_string()),
                kind: ColumnKind::Text,
                nullable: false,
            },
        ],
    });

    let pool = db::connect(&config).await.unwrap();
    migrate::migrate_pool(&pool, &config).await.unwrap();
    let ctx = AppContext::with_pool(config, pool);

    let before = cached_mapping_stats(&ctx.pool, &ctx.cache).await.unwrap();
    assert_eq!(before.total_ueis, 0);

    run_load(&ctx, "ueis", &LoadArgs::default(), &NoProgress)
        .await
        .unwrap();

    let after = cached_mapping_stats(&ctx.pool, &ctx.cache).await.unwrap();
    assert_eq!(after.total_ueis, 2);
    assert_eq!(after.unmapped_ueis, 2);

    ctx.close().await;
}
