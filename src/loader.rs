//! Batched staging loader.
//!
//! Streams a staging file through [`transform_row`] and writes rows to a
//! [`BatchSink`] in fixed-size batches, one INSERT per batch.
//!
//! Failure handling is per batch, not per file:
//!
//! | Failure | Effect |
//! |---------|--------|
//! | file missing / corrupt gzip | [`EtlError::FatalIo`], run aborts |
//! | malformed row | row skipped, recorded, load continues |
//! | batch rejected by the database | batch recorded with row range, load continues |
//!
//! There is no transaction spanning batches: a failure in batch N leaves
//! batches 1..N-1 in place.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ColumnConfig;
use crate::error::{EtlError, Result};
use crate::models::{BatchInsertError, CellValue, LoadFailure};
use crate::progress::{LoadProgressEvent, LoadProgressReporter};
use crate::staging;
use crate::transform::transform_row;

/// SQLite's default bind-parameter ceiling (3.32+).
const SQLITE_MAX_VARIABLES: usize = 32_766;

/// A group of transformed rows inserted together.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Zero-based batch number within the load.
    pub index: usize,
    pub first_row: u64,
    pub last_row: u64,
    pub rows: Vec<Vec<CellValue>>,
}

/// Destination for loaded batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Insert all rows of `batch`; either every row lands or none do.
    async fn insert_batch(&self, batch: &Batch) -> anyhow::Result<u64>;

    /// Remove existing rows before a `--truncate` load.
    async fn clear(&self) -> anyhow::Result<()>;
}

/// Writes batches into a SQLite table with multi-row INSERTs.
pub struct SqliteSink {
    pool: SqlitePool,
    target: String,
    columns: Vec<String>,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool, target: &str, columns: &[ColumnConfig]) -> Self {
        Self {
            pool,
            target: target.to_string(),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
        }
    }

    fn rows_per_statement(&self) -> usize {
        (SQLITE_MAX_VARIABLES / self.columns.len().max(1)).max(1)
    }
}

#[async_trait]
impl BatchSink for SqliteSink {
    async fn insert_batch(&self, batch: &Batch) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for rows in batch.rows.chunks(self.rows_per_statement()) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                self.target,
                self.columns.join(", ")
            ));
            qb.push_values(rows, |mut b, row| {
                for cell in row {
                    match cell {
                        CellValue::Null => b.push_bind(None::<String>),
                        CellValue::Text(s) | CellValue::Decimal(s) => b.push_bind(s.clone()),
                        CellValue::Integer(n) => b.push_bind(*n),
                    };
                }
            });
            let result = qb.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        sqlx::query(&format!("DELETE FROM {}", self.target))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory sink that can be told to reject specific batches.
///
/// Used to exercise partial-failure handling without a database.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<Vec<Vec<CellValue>>>,
    batch_sizes: Mutex<Vec<usize>>,
    fail_batches: Vec<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the batches with these zero-based indexes.
    pub fn failing_on(fail_batches: Vec<usize>) -> Self {
        Self {
            fail_batches,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<Vec<CellValue>> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Sizes of the batches that were accepted, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BatchSink for MemorySink {
    async fn insert_batch(&self, batch: &Batch) -> anyhow::Result<u64> {
        if self.fail_batches.contains(&batch.index) {
            anyhow::bail!("simulated insert failure in batch {}", batch.index + 1);
        }
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?;
        rows.extend(batch.rows.iter().cloned());
        if let Ok(mut sizes) = self.batch_sizes.lock() {
            sizes.push(batch.rows.len());
        }
        Ok(batch.rows.len() as u64)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        if let Ok(mut rows) = self.rows.lock() {
            rows.clear();
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub max_reported_errors: usize,
    /// Count rows first so progress can show a total.
    pub count_first: bool,
    /// Parse and transform only; nothing is written.
    pub dry_run: bool,
    /// Clear the target before loading.
    pub truncate: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_reported_errors: 20,
            count_first: false,
            dry_run: false,
            truncate: false,
        }
    }
}

/// Result of one staging load. Partial failure is a normal outcome.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub total_processed: u64,
    pub total_inserted: u64,
    pub total_failed: u64,
    pub batches: usize,
    /// First `max_reported_errors` failures, in order.
    pub errors: Vec<LoadFailure>,
    /// Failures beyond the reporting limit.
    pub errors_dropped: usize,
}

impl LoadSummary {
    pub fn is_success(&self) -> bool {
        self.total_failed == 0
    }

    fn record(&mut self, failure: LoadFailure, limit: usize) {
        if self.errors.len() < limit {
            self.errors.push(failure);
        } else {
            self.errors_dropped += 1;
        }
    }
}

/// Load one staging file through `sink`.
///
/// Only fatal conditions return `Err`: the file cannot be opened or
/// decompressed, a configured column has no matching header, or the
/// target cannot be cleared for a truncating load.
pub async fn load_file(
    path: &Path,
    label: &str,
    columns: &[ColumnConfig],
    sink: &dyn BatchSink,
    opts: &LoadOptions,
    progress: &dyn LoadProgressReporter,
) -> Result<LoadSummary> {
    let batch_size = opts.batch_size.max(1);

    let total = if opts.count_first {
        progress.report(LoadProgressEvent::Counting {
            table: label.to_string(),
        });
        Some(staging::count_rows(path)?)
    } else {
        None
    };

    let mut reader = staging::open(path)?;
    check_headers(reader.headers(), columns)?;

    if opts.truncate && !opts.dry_run {
        sink.clear()
            .await
            .map_err(|e| EtlError::Sink(e.to_string()))?;
    }

    info!(table = label, path = %path.display(), batch_size, "loading staging file");

    let mut summary = LoadSummary::default();
    let mut pending: Vec<Vec<CellValue>> = Vec::with_capacity(batch_size);
    let mut first_row: Option<u64> = None;
    let mut last_row = 0u64;

    while let Some(next) = reader.next_row()? {
        summary.total_processed += 1;

        let transformed = next.and_then(|row| {
            transform_row(columns, &row).map(|values| (row.row_number, values))
        });
        match transformed {
            Ok((row_number, values)) => {
                first_row.get_or_insert(row_number);
                last_row = row_number;
                pending.push(values);
            }
            Err(e) => {
                debug!(table = label, row = e.row, error = %e.message, "skipping row");
                summary.total_failed += 1;
                summary.record(LoadFailure::Row(e), opts.max_reported_errors);
            }
        }

        if pending.len() >= batch_size {
            let batch = Batch {
                index: summary.batches,
                first_row: first_row.take().unwrap_or(last_row),
                last_row,
                rows: std::mem::take(&mut pending),
            };
            write_batch(sink, batch, opts, &mut summary, label).await;
            progress.report(LoadProgressEvent::Loading {
                table: label.to_string(),
                processed: summary.total_processed,
                total,
            });
        }
    }

    if !pending.is_empty() {
        let batch = Batch {
            index: summary.batches,
            first_row: first_row.take().unwrap_or(last_row),
            last_row,
            rows: pending,
        };
        write_batch(sink, batch, opts, &mut summary, label).await;
        progress.report(LoadProgressEvent::Loading {
            table: label.to_string(),
            processed: summary.total_processed,
            total,
        });
    }

    info!(
        table = label,
        processed = summary.total_processed,
        inserted = summary.total_inserted,
        failed = summary.total_failed,
        batches = summary.batches,
        "load finished"
    );

    Ok(summary)
}

async fn write_batch(
    sink: &dyn BatchSink,
    batch: Batch,
    opts: &LoadOptions,
    summary: &mut LoadSummary,
    label: &str,
) {
    summary.batches += 1;
    let size = batch.rows.len() as u64;

    if opts.dry_run {
        return;
    }

    match sink.insert_batch(&batch).await {
        Ok(inserted) => {
            debug!(table = label, batch = batch.index + 1, rows = size, "batch inserted");
            summary.total_inserted += inserted;
        }
        Err(e) => {
            warn!(
                table = label,
                first_row = batch.first_row,
                last_row = batch.last_row,
                error = %e,
                "batch insert failed"
            );
            summary.total_failed += size;
            summary.record(
                LoadFailure::Batch(BatchInsertError {
                    first_row: batch.first_row,
                    last_row: batch.last_row,
                    message: e.to_string(),
                }),
                opts.max_reported_errors,
            );
        }
    }
}

fn check_headers(headers: &[String], columns: &[ColumnConfig]) -> Result<()> {
    let missing: Vec<&str> = columns
        .iter()
        .map(|c| c.source_header())
        .filter(|h| !headers.iter().any(|have| have == h))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EtlError::Config(format!(
            "staging file is missing column(s): {}",
            missing.join(", ")
        )))
    }
}
